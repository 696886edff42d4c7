//! One task per upgraded WebSocket connection.
//!
//! The connection owns its socket and framing buffer, runs the heartbeat,
//! and bridges frames to the core: inbound text becomes `CoreEvent::Inbound`,
//! outbound JSON arrives on a per-connection queue.  Pings and pongs are
//! handled here; they never reach the state store.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use origin_wire::{heartbeat_payload, Frame, WireError, WsCodec};

use crate::config::SimulatorConfig;
use crate::core::CoreEvent;

/// Close status sent after three consecutive missed pongs.
pub const CLOSE_STATUS_PING_TIMEOUT: u16 = 1011;

const MAX_MISSED_PONGS: u32 = 3;
/// Grace period between sending a close frame and dropping the socket.
const CLOSE_GRACE: Duration = Duration::from_secs(1);
/// The first ping goes out shortly after the handshake settles.
const FIRST_PING_DELAY: Duration = Duration::from_millis(1100);

/// Messages the core queues for a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close(Vec<u8>),
}

/// Heartbeat-driven lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Handshaking,
    Live,
    TimedOut,
    Closed,
}

pub struct Connection {
    conn_id: u64,
    framed: Framed<TcpStream, WsCodec>,
    events: mpsc::Sender<CoreEvent>,
    outbound: mpsc::Receiver<Outbound>,
    heartbeat_interval: Duration,
    pong_timeout: Duration,
    state: ConnectionState,
    ping_counter: u64,
    missed_pongs: u32,
    pong_deadline: Option<Instant>,
}

impl Connection {
    pub fn new(
        conn_id: u64,
        framed: Framed<TcpStream, WsCodec>,
        events: mpsc::Sender<CoreEvent>,
        outbound: mpsc::Receiver<Outbound>,
        cfg: &SimulatorConfig,
    ) -> Self {
        Connection {
            conn_id,
            framed,
            events,
            outbound,
            heartbeat_interval: cfg.heartbeat_interval,
            pong_timeout: cfg.pong_timeout,
            state: ConnectionState::Handshaking,
            ping_counter: 0,
            missed_pongs: 0,
            pong_deadline: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Drive the connection until it closes, then tell the core.
    pub async fn run(mut self) {
        self.state = ConnectionState::Live;
        let first_ping = Instant::now() + FIRST_PING_DELAY;
        let mut pings = tokio::time::interval_at(first_ping, self.heartbeat_interval);

        loop {
            let pong_deadline = self.pong_deadline;
            tokio::select! {
                _ = pings.tick() => {
                    if self.send_ping().await.is_err() {
                        break;
                    }
                }
                () = wait_for(pong_deadline) => {
                    if self.on_pong_timeout().await {
                        break;
                    }
                }
                queued = self.outbound.recv() => match queued {
                    Some(Outbound::Text(text)) => {
                        if self.framed.send(Frame::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Some(Outbound::Close(payload)) => {
                        let _ = self.framed.send(Frame::Close(payload)).await;
                        tokio::time::sleep(CLOSE_GRACE).await;
                        break;
                    }
                    // The core dropped us.
                    None => break,
                },
                frame = self.framed.next() => match frame {
                    Some(Ok(frame)) => {
                        if self.on_frame(frame).await {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        self.on_protocol_error(&e);
                        break;
                    }
                    None => break,
                },
            }
        }

        if self.state != ConnectionState::TimedOut {
            self.state = ConnectionState::Closed;
        }
        let _ = self
            .events
            .send(CoreEvent::Disconnected { conn_id: self.conn_id })
            .await;
    }

    async fn send_ping(&mut self) -> Result<(), WireError> {
        let payload = heartbeat_payload(self.ping_counter);
        self.ping_counter += 1;
        self.framed.send(Frame::Ping(payload)).await?;
        self.pong_deadline = Some(Instant::now() + self.pong_timeout);
        Ok(())
    }

    /// Returns true when the connection must terminate.
    async fn on_pong_timeout(&mut self) -> bool {
        self.pong_deadline = None;
        self.missed_pongs += 1;
        warn!(
            conn_id = self.conn_id,
            missed = self.missed_pongs,
            "pong timeout"
        );
        if self.missed_pongs < MAX_MISSED_PONGS {
            return false;
        }

        self.state = ConnectionState::TimedOut;
        let _ = self
            .framed
            .send(Frame::close_with_status(
                CLOSE_STATUS_PING_TIMEOUT,
                "Ping timeout",
            ))
            .await;
        tokio::time::sleep(CLOSE_GRACE).await;
        true
    }

    /// Returns true when the connection must terminate.
    async fn on_frame(&mut self, frame: Frame) -> bool {
        match frame {
            Frame::Text(text) => self
                .events
                .send(CoreEvent::Inbound {
                    conn_id: self.conn_id,
                    text,
                })
                .await
                .is_err(),
            Frame::Ping(payload) => {
                // Echo immediately with the same payload.
                self.framed.send(Frame::Pong(payload)).await.is_err()
            }
            Frame::Pong(_) => {
                self.pong_deadline = None;
                self.missed_pongs = 0;
                false
            }
            Frame::Close(payload) => {
                debug!(conn_id = self.conn_id, "close frame received");
                let _ = self.framed.send(Frame::Close(payload)).await;
                tokio::time::sleep(CLOSE_GRACE).await;
                true
            }
            Frame::Other(opcode) => {
                debug!(
                    conn_id = self.conn_id,
                    opcode, "discarding unsupported frame"
                );
                false
            }
        }
    }

    fn on_protocol_error(&mut self, error: &WireError) {
        warn!(
            conn_id = self.conn_id,
            error = %error,
            "closing connection after protocol error"
        );
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

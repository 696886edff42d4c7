// origin-test-utils: a raw WebSocket client for exercising the simulator.
//
// Deliberately hand-rolled: tests need to observe the handshake bytes, send
// masked frames, withhold pongs, and inspect server pings -- things a
// full-featured client library hides.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use origin_wire::{accept_key, find_head_end, Frame, WsCodec};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, FramedParts};

/// The RFC 6455 sample key; handy for asserting the exact accept value.
pub const SAMPLE_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

/// A server bound to the wildcard address is reached via loopback.
pub fn loopback(mut addr: SocketAddr) -> SocketAddr {
    if addr.ip().is_unspecified() {
        addr.set_ip(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST));
    }
    addr
}

/// A connected, upgraded WebSocket client.
///
/// By default incoming server pings are answered automatically so the
/// heartbeat keeps the connection alive; set `auto_pong(false)` to simulate
/// a dead client.
pub struct SimClient {
    framed: Framed<TcpStream, WsCodec>,
    auto_pong: bool,
    /// `Sec-WebSocket-Accept` value the server returned.
    pub accept: String,
}

impl SimClient {
    /// Connect and upgrade using the RFC sample key.
    pub async fn connect(addr: SocketAddr) -> std::io::Result<Self> {
        Self::connect_with_key(addr, SAMPLE_KEY).await
    }

    /// Connect and upgrade with a specific `Sec-WebSocket-Key`.
    pub async fn connect_with_key(addr: SocketAddr, key: &str) -> std::io::Result<Self> {
        let addr = loopback(addr);
        let mut stream = TcpStream::connect(addr).await?;
        let request = format!(
            "GET /SmartScope-1.0/mountControlEndpoint HTTP/1.1\r\n\
             Host: {addr}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: {key}\r\n\
             Sec-WebSocket-Version: 13\r\n\
             \r\n"
        );
        stream.write_all(request.as_bytes()).await?;

        // Read the 101 response head; anything buffered beyond it already
        // belongs to the frame stream.
        let mut buf = BytesMut::with_capacity(1024);
        let head_end = loop {
            if let Some(pos) = find_head_end(&buf) {
                break pos;
            }
            if stream.read_buf(&mut buf).await? == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed during handshake",
                ));
            }
        };
        let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
        if !head.starts_with("HTTP/1.1 101") {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("upgrade refused: {head}"),
            ));
        }
        let accept = head
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("Sec-WebSocket-Accept")
                    .then(|| value.trim().to_owned())
            })
            .unwrap_or_default();

        let mut leftover = buf;
        let _ = leftover.split_to(head_end + 4);
        let mut parts = FramedParts::new::<Frame>(stream, WsCodec::client());
        parts.read_buf = leftover;
        Ok(SimClient {
            framed: Framed::from_parts(parts),
            auto_pong: true,
            accept,
        })
    }

    /// Check the server's accept value against the key we sent.
    pub fn accept_matches(&self, key: &str) -> bool {
        self.accept == accept_key(key)
    }

    pub fn auto_pong(&mut self, enabled: bool) {
        self.auto_pong = enabled;
    }

    pub async fn send_frame(&mut self, frame: Frame) -> std::io::Result<()> {
        self.framed
            .send(frame)
            .await
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::BrokenPipe, e.to_string()))
    }

    /// Send a JSON command as a masked text frame.
    pub async fn send_json(&mut self, value: &Value) -> std::io::Result<()> {
        self.send_frame(Frame::Text(value.to_string())).await
    }

    /// Next raw frame, pings included.  `None` on timeout or close.
    pub async fn next_frame(&mut self, wait: Duration) -> Option<Frame> {
        match tokio::time::timeout(wait, self.framed.next()).await {
            Ok(Some(Ok(frame))) => Some(frame),
            _ => None,
        }
    }

    /// Next text frame parsed as JSON, transparently answering pings when
    /// auto-pong is on.
    pub async fn next_json(&mut self, wait: Duration) -> Option<Value> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let remaining = deadline.checked_duration_since(tokio::time::Instant::now())?;
            match self.next_frame(remaining).await? {
                Frame::Text(text) => match serde_json::from_str(&text) {
                    Ok(value) => return Some(value),
                    Err(_) => continue,
                },
                Frame::Ping(payload) => {
                    if self.auto_pong {
                        self.send_frame(Frame::Pong(payload)).await.ok()?;
                    }
                }
                Frame::Close(_) => return None,
                Frame::Pong(_) | Frame::Other(_) => {}
            }
        }
    }

    /// Skip notifications until the response echoing `sequence_id` arrives.
    pub async fn response_for(&mut self, sequence_id: i64, wait: Duration) -> Option<Value> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let remaining = deadline.checked_duration_since(tokio::time::Instant::now())?;
            let value = self.next_json(remaining).await?;
            if value["Type"] == "Response" && value["SequenceID"] == sequence_id {
                return Some(value);
            }
        }
    }

    /// Collect every JSON message seen inside the window.
    pub async fn collect_json_for(&mut self, window: Duration) -> Vec<Value> {
        let deadline = tokio::time::Instant::now() + window;
        let mut seen = Vec::new();
        loop {
            let Some(remaining) = deadline.checked_duration_since(tokio::time::Instant::now())
            else {
                break;
            };
            match self.next_json(remaining).await {
                Some(value) => seen.push(value),
                None => break,
            }
        }
        seen
    }

    /// Wait for a notification from `source` satisfying `predicate`.
    pub async fn notification_from(
        &mut self,
        source: &str,
        wait: Duration,
        mut predicate: impl FnMut(&Value) -> bool,
    ) -> Option<Value> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let remaining = deadline.checked_duration_since(tokio::time::Instant::now())?;
            let value = self.next_json(remaining).await?;
            if value["Type"] == "Notification" && value["Source"] == source && predicate(&value) {
                return Some(value);
            }
        }
    }
}

//! The core event loop.
//!
//! One task owns the telescope state, the connection table and every
//! simulated activity.  Everything that mutates state arrives here as a
//! `CoreEvent`: inbound commands, connection lifecycle, emitter ticks,
//! activity ticks and image-provider results.  Connection tasks perform the
//! socket I/O and never touch shared state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use origin_wire::close_payload;

use crate::activity::{InitRun, SlewRun, Ticker};
use crate::clock::Clock;
use crate::config::SimulatorConfig;
use crate::connection::Outbound;
use crate::images::{ImageProvider, PreviewImage, ProviderImage};
use crate::state::TelescopeState;

/// Close status sent on orderly server shutdown.
pub const CLOSE_STATUS_NORMAL: u16 = 1000;

/// Subsystem groups the emitter schedules on its coprime pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusGroup {
    Mount,
    Focuser,
    Camera,
    EnvironmentDisk,
    DewHeater,
    Orientation,
    TaskController,
}

/// Everything the core reacts to.
#[derive(Debug)]
pub enum CoreEvent {
    Connected(ClientHandle),
    Disconnected { conn_id: u64 },
    Inbound { conn_id: u64, text: String },
    /// Initial status burst for a freshly upgraded connection.
    InitialBurst { conn_id: u64 },
    /// Staggered emission of one subsystem group.
    Emit(StatusGroup),
    SlewTick,
    /// Ask the image provider for the post-slew position.
    SlewImageRequest,
    ImagingTick,
    InitTick,
    /// Fake initialization resolves without the ticker.
    InitComplete,
    /// Delayed transition back to IDLE after a successful initialization.
    InitIdle,
    ImageReady(ProviderImage),
    ImageFailed(String),
    Shutdown,
}

/// The core's handle to one live connection: an id plus the outbound queue.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    pub conn_id: u64,
    pub outbound: mpsc::Sender<Outbound>,
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

pub struct Core {
    pub(crate) cfg: SimulatorConfig,
    pub(crate) clock: Clock,
    pub(crate) state: TelescopeState,
    pub(crate) connections: HashMap<u64, ClientHandle>,
    pub(crate) events: mpsc::Sender<CoreEvent>,
    pub(crate) preview: PreviewImage,
    pub(crate) provider: Arc<dyn ImageProvider>,
    pub(crate) rng: StdRng,
    pub(crate) emit_counter: u64,
    pub(crate) slew: Option<SlewRun>,
    pub(crate) imaging: Option<Ticker>,
    pub(crate) init: Option<InitRun>,
}

impl Core {
    pub fn new(
        cfg: SimulatorConfig,
        clock: Clock,
        provider: Arc<dyn ImageProvider>,
        preview: PreviewImage,
        events: mpsc::Sender<CoreEvent>,
    ) -> Self {
        Core {
            cfg,
            state: TelescopeState::new(clock.now_ms()),
            clock,
            connections: HashMap::new(),
            events,
            preview,
            provider,
            rng: StdRng::from_entropy(),
            emit_counter: 0,
            slew: None,
            imaging: None,
            init: None,
        }
    }

    pub async fn run(mut self, mut events: mpsc::Receiver<CoreEvent>) {
        // Fetch a sky image for the starting position right away so the
        // preview endpoint has something current to serve.
        self.request_sky_image(crate::images::SkyPosition {
            ra_deg: self.state.ra.to_degrees(),
            dec_deg: self.state.dec.to_degrees(),
            name: "Initial_Position".to_owned(),
            description: "Telescope starting position".to_owned(),
        });

        let start = tokio::time::Instant::now() + Duration::from_secs(1);
        let mut emit = tokio::time::interval_at(start, Duration::from_secs(1));
        emit.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => {
                        if self.handle_event(event).await == Flow::Stop {
                            break;
                        }
                    }
                    None => break,
                },
                _ = emit.tick() => self.on_emit_tick(),
            }
        }
        info!("core loop stopped");
    }

    async fn handle_event(&mut self, event: CoreEvent) -> Flow {
        match event {
            CoreEvent::Connected(handle) => {
                let conn_id = handle.conn_id;
                self.connections.insert(conn_id, handle);
                self.schedule(Duration::from_secs(1), CoreEvent::InitialBurst { conn_id });
            }
            CoreEvent::Disconnected { conn_id } => {
                if self.connections.remove(&conn_id).is_some() {
                    debug!(conn_id, "connection removed");
                }
            }
            CoreEvent::Inbound { conn_id, text } => self.dispatch_inbound(conn_id, &text),
            CoreEvent::InitialBurst { conn_id } => self.send_initial_burst(conn_id),
            CoreEvent::Emit(group) => self.handle_emit(group),
            CoreEvent::SlewTick => self.on_slew_tick(),
            CoreEvent::SlewImageRequest => self.on_slew_image_request(),
            CoreEvent::ImagingTick => self.on_imaging_tick(),
            CoreEvent::InitTick => self.on_init_tick(),
            CoreEvent::InitComplete => self.complete_initialization(),
            CoreEvent::InitIdle => self.on_init_idle(),
            CoreEvent::ImageReady(image) => self.on_image_ready(image).await,
            CoreEvent::ImageFailed(message) => self.on_image_failed(&message),
            CoreEvent::Shutdown => {
                self.shutdown();
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    /// Post an event back onto the core timeline after a delay.
    pub(crate) fn schedule(&self, delay: Duration, event: CoreEvent) {
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(event).await;
        });
    }

    /// Hand a sky-position request to the image provider; the result comes
    /// back as `ImageReady` or `ImageFailed`.
    pub(crate) fn request_sky_image(&self, position: crate::images::SkyPosition) {
        let fetch = self.provider.fetch(position);
        let events = self.events.clone();
        tokio::spawn(async move {
            let event = match fetch.await {
                Ok(image) => CoreEvent::ImageReady(image),
                Err(e) => CoreEvent::ImageFailed(e.to_string()),
            };
            let _ = events.send(event).await;
        });
    }

    async fn on_image_ready(&mut self, image: ProviderImage) {
        self.preview.replace(image.bytes).await;
        self.state.file_location = image.file_location;
        self.state.image_type = crate::state::ImageType::HipsImage;
        self.send_new_image_ready(crate::emitter::Target::Broadcast);
        debug!(file = %self.state.file_location, "preview image updated");
    }

    fn on_image_failed(&mut self, message: &str) {
        warn!(%message, "image provider failure");
        let value = serde_json::json!({
            "Command": "Warning",
            "Destination": "All",
            "Source": "HipsImageServer",
            "Type": "Notification",
            "Message": format!("HiPS Observatory data unavailable: {message}"),
            "ExpiredAt": self.clock.expired_at(),
            "SequenceID": self.state.next_sequence_id(),
        });
        self.broadcast_value(&value);
    }

    fn shutdown(&mut self) {
        info!(connections = self.connections.len(), "shutting down");
        self.slew = None;
        self.imaging = None;
        self.init = None;
        for handle in self.connections.values() {
            let _ = handle
                .outbound
                .try_send(Outbound::Close(close_payload(CLOSE_STATUS_NORMAL, "")));
        }
        self.connections.clear();
    }
}

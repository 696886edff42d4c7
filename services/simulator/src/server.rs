//! The dual-protocol listener: one TCP port serving HTTP image requests and
//! WebSocket control traffic via in-place upgrade.
//!
//! Every accepted socket starts in sniffing mode, accumulating bytes until
//! the header terminator.  WebSocket upgrades hand the socket (and any bytes
//! that arrived behind the handshake) to a `Connection`; image paths get a
//! one-shot HTTP response; everything else is a 404.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use origin_protocol::{ASTRO_IMAGE_MARKER, MOUNT_CONTROL_ENDPOINT, TEMP_IMAGE_PREFIX};
use origin_wire::{
    accept_key, find_head_end, http_response, switching_protocols_response, Frame, RequestHead,
    WsCodec, MAX_HEAD_BYTES,
};
use tokio_util::codec::{Framed, FramedParts};

use crate::clock::Clock;
use crate::config::SimulatorConfig;
use crate::connection::Connection;
use crate::core::{ClientHandle, Core, CoreEvent};
use crate::discovery;
use crate::images::{ImageProvider, PreviewImage, StaticImageProvider, PLACEHOLDER_JPEG};

/// A running simulator instance.
pub struct Simulator {
    local_addr: SocketAddr,
    events: mpsc::Sender<CoreEvent>,
    preview: PreviewImage,
    core_task: JoinHandle<()>,
    listener_task: JoinHandle<()>,
    discovery_task: Option<JoinHandle<()>>,
}

impl Simulator {
    /// Start with the system clock and the built-in image provider.
    pub async fn start(cfg: SimulatorConfig) -> std::io::Result<Simulator> {
        Self::start_with(cfg, Clock::system(), Arc::new(StaticImageProvider)).await
    }

    /// Start with an injected clock and image provider.
    pub async fn start_with(
        cfg: SimulatorConfig,
        clock: Clock,
        provider: Arc<dyn ImageProvider>,
    ) -> std::io::Result<Simulator> {
        let listener = TcpListener::bind(("0.0.0.0", cfg.port)).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "Origin simulator listening");
        info!("WebSocket control: ws://{local_addr}{MOUNT_CONTROL_ENDPOINT}");
        info!("HTTP images: http://{local_addr}{TEMP_IMAGE_PREFIX}");

        let (events, events_rx) = mpsc::channel(256);
        let preview = PreviewImage::new(bytes::Bytes::from_static(PLACEHOLDER_JPEG));
        let core = Core::new(
            cfg.clone(),
            clock,
            provider,
            preview.clone(),
            events.clone(),
        );
        let core_task = tokio::spawn(core.run(events_rx));
        let listener_task = tokio::spawn(accept_loop(
            listener,
            cfg.clone(),
            events.clone(),
            preview.clone(),
        ));
        let discovery_task = cfg
            .enable_discovery
            .then(|| tokio::spawn(discovery::run(cfg.clone())));

        Ok(Simulator {
            local_addr,
            events,
            preview,
            core_task,
            listener_task,
            discovery_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The blob HTTP preview requests currently serve.
    pub async fn preview_snapshot(&self) -> bytes::Bytes {
        self.preview.snapshot().await
    }

    /// Close all connections (status 1000), stop activities and the
    /// listener.
    pub async fn shutdown(self) {
        let _ = self.events.send(CoreEvent::Shutdown).await;
        self.listener_task.abort();
        if let Some(task) = self.discovery_task {
            task.abort();
        }
        let _ = self.core_task.await;
    }
}

async fn accept_loop(
    listener: TcpListener,
    cfg: SimulatorConfig,
    events: mpsc::Sender<CoreEvent>,
    preview: PreviewImage,
) {
    let mut next_conn_id: u64 = 0;
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                next_conn_id += 1;
                let conn_id = next_conn_id;
                debug!(%peer, conn_id, "accepted connection");
                tokio::spawn(sniff(
                    stream,
                    conn_id,
                    cfg.clone(),
                    events.clone(),
                    preview.clone(),
                ));
            }
            Err(e) => warn!(error = %e, "accept failed"),
        }
    }
}

/// Accumulate bytes until the HTTP head is complete, then route the socket.
async fn sniff(
    mut stream: TcpStream,
    conn_id: u64,
    cfg: SimulatorConfig,
    events: mpsc::Sender<CoreEvent>,
    preview: PreviewImage,
) {
    let mut buf = BytesMut::with_capacity(1024);
    let head_end = loop {
        if let Some(pos) = find_head_end(&buf) {
            break pos;
        }
        if buf.len() > MAX_HEAD_BYTES {
            debug!(conn_id, "dropping connection with oversized request head");
            return;
        }
        match stream.read_buf(&mut buf).await {
            Ok(0) => return,
            Ok(_) => {}
            Err(e) => {
                debug!(conn_id, error = %e, "socket error while sniffing");
                return;
            }
        }
    };

    let head = match RequestHead::parse(&buf[..head_end]) {
        Ok(head) => head,
        // Malformed request line: close without a response.
        Err(_) => return,
    };
    debug!(conn_id, method = %head.method, target = %head.target, "request sniffed");

    if head.is_websocket_upgrade() && head.target == MOUNT_CONTROL_ENDPOINT {
        upgrade(stream, buf, head_end + 4, &head, conn_id, cfg, events).await;
    } else if head.method == "GET" && head.target.starts_with(TEMP_IMAGE_PREFIX) {
        let body = preview.snapshot().await;
        respond(&mut stream, 200, "image/jpeg", &body).await;
    } else if head.method == "GET" && head.target.contains(ASTRO_IMAGE_MARKER) {
        serve_astro_image(&mut stream, &cfg, &head.target).await;
    } else {
        respond(&mut stream, 404, "text/plain", b"Not Found").await;
    }
}

async fn upgrade(
    mut stream: TcpStream,
    buf: BytesMut,
    body_start: usize,
    head: &RequestHead,
    conn_id: u64,
    cfg: SimulatorConfig,
    events: mpsc::Sender<CoreEvent>,
) {
    let Some(key) = head.header("Sec-WebSocket-Key") else {
        respond(&mut stream, 400, "text/plain", b"Bad WebSocket Request").await;
        return;
    };
    let response = switching_protocols_response(&accept_key(key));
    if stream.write_all(response.as_bytes()).await.is_err() {
        return;
    }

    // Bytes that arrived behind the handshake already belong to the frame
    // stream; seed them into the connection's inbound buffer.
    let mut leftover = buf;
    leftover.advance(body_start);
    let mut parts = FramedParts::new::<Frame>(stream, WsCodec::server());
    parts.read_buf = leftover;
    let framed = Framed::from_parts(parts);

    let (outbound_tx, outbound_rx) = mpsc::channel(64);
    let handle = ClientHandle {
        conn_id,
        outbound: outbound_tx,
    };
    if events.send(CoreEvent::Connected(handle)).await.is_err() {
        return;
    }
    info!(conn_id, "WebSocket connection established");

    Connection::new(conn_id, framed, events, outbound_rx, &cfg)
        .run()
        .await;
}

/// Resolve `<dir>/<file>` from the trailing path segments against the
/// on-disk astrophotography store.
async fn serve_astro_image(stream: &mut TcpStream, cfg: &SimulatorConfig, target: &str) {
    let parts: Vec<&str> = target.split('/').collect();
    if parts.len() < 6 {
        respond(stream, 404, "text/plain", b"Invalid path").await;
        return;
    }
    let directory = parts[parts.len() - 2];
    let file = parts[parts.len() - 1];
    if directory.contains("..") || file.contains("..") {
        respond(stream, 404, "text/plain", b"Image not found").await;
        return;
    }

    let path = cfg
        .data_dir
        .join("Images")
        .join("Astrophotography")
        .join(directory)
        .join(file);
    match tokio::fs::read(&path).await {
        Ok(body) => {
            let content_type = if file.to_ascii_lowercase().ends_with(".jpg") {
                "image/jpeg"
            } else {
                "image/tiff"
            };
            respond(stream, 200, content_type, &body).await;
            debug!(%target, bytes = body.len(), "served astrophotography image");
        }
        Err(_) => respond(stream, 404, "text/plain", b"Image not found").await,
    }
}

async fn respond(stream: &mut TcpStream, status: u16, content_type: &str, body: &[u8]) {
    let response = http_response(status, content_type, body);
    let _ = stream.write_all(&response).await;
    let _ = stream.shutdown().await;
}

//! The image-provider seam and the preview blob served over HTTP.
//!
//! Sky-image fetching (HiPS/DSS mosaicking) lives outside this crate; the
//! core only hands a provider a sky position and eventually receives an
//! encoded blob plus a file-location string.  The preview blob is a single
//! snapshot replaced atomically whenever the provider yields a new image.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::RwLock;

/// Where the telescope is pointing, degrees, as handed to the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct SkyPosition {
    pub ra_deg: f64,
    pub dec_deg: f64,
    pub name: String,
    pub description: String,
}

/// An encoded image produced by a provider.
#[derive(Debug, Clone)]
pub struct ProviderImage {
    pub bytes: Bytes,
    /// Relative location reported in `NewImageReady` notifications.
    pub file_location: String,
}

#[derive(Debug, Error)]
#[error("sky image fetch failed: {0}")]
pub struct ImageFetchError(pub String);

pub type ImageFuture = Pin<Box<dyn Future<Output = Result<ProviderImage, ImageFetchError>> + Send>>;

/// Asynchronous source of sky images.  Implementations run off the core
/// timeline; results come back as events.
pub trait ImageProvider: Send + Sync {
    fn fetch(&self, position: SkyPosition) -> ImageFuture;
}

/// Built-in provider returning an embedded placeholder, so the simulator
/// works stand-alone without any survey access.
pub struct StaticImageProvider;

impl ImageProvider for StaticImageProvider {
    fn fetch(&self, position: SkyPosition) -> ImageFuture {
        Box::pin(async move {
            Ok(ProviderImage {
                bytes: Bytes::from_static(PLACEHOLDER_JPEG),
                file_location: format!("Images/HiPS/{}.jpg", position.name),
            })
        })
    }
}

/// The preview blob currently served for `Images/Temp/` requests.
#[derive(Clone)]
pub struct PreviewImage {
    blob: Arc<RwLock<Bytes>>,
}

impl PreviewImage {
    pub fn new(initial: Bytes) -> Self {
        PreviewImage {
            blob: Arc::new(RwLock::new(initial)),
        }
    }

    pub async fn snapshot(&self) -> Bytes {
        self.blob.read().await.clone()
    }

    pub async fn replace(&self, bytes: Bytes) {
        *self.blob.write().await = bytes;
    }
}

/// Minimal grayscale JFIF blob used until a provider delivers real data.
pub const PLACEHOLDER_JPEG: &[u8] = &[
    0xFF, 0xD8, // SOI
    0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00, 0x01, 0x01, 0x00, 0x00, 0x01, 0x00,
    0x01, 0x00, 0x00, // APP0
    0xFF, 0xDB, 0x00, 0x43, 0x00, // DQT, table 0
    0x10, 0x0B, 0x0C, 0x0E, 0x0C, 0x0A, 0x10, 0x0E, 0x0D, 0x0E, 0x12, 0x11, 0x10, 0x13, 0x18,
    0x28, 0x1A, 0x18, 0x16, 0x16, 0x18, 0x31, 0x23, 0x25, 0x1D, 0x28, 0x3A, 0x33, 0x3D, 0x3C,
    0x39, 0x33, 0x38, 0x37, 0x40, 0x48, 0x5C, 0x4E, 0x40, 0x44, 0x57, 0x45, 0x37, 0x38, 0x50,
    0x6D, 0x51, 0x57, 0x5F, 0x62, 0x67, 0x68, 0x67, 0x3E, 0x4D, 0x71, 0x79, 0x70, 0x64, 0x78,
    0x5C, 0x65, 0x67, 0x63,
    0xFF, 0xC0, 0x00, 0x0B, 0x08, 0x00, 0x01, 0x00, 0x01, 0x01, 0x01, 0x11, 0x00, // SOF0 1x1
    0xFF, 0xC4, 0x00, 0x1F, 0x00, // DHT, DC table 0
    0x00, 0x01, 0x05, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B,
    0xFF, 0xC4, 0x00, 0x14, 0x10, // DHT, AC table 0 (single code)
    0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00,
    0xFF, 0xDA, 0x00, 0x08, 0x01, 0x01, 0x00, 0x00, 0x3F, 0x00, // SOS
    0xD2, 0xCF, 0x20, // entropy-coded data
    0xFF, 0xD9, // EOI
];

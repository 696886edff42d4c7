// origin-wire: WebSocket framing and the plain-HTTP edge of the shared port.
//
// The simulator serves HTTP and WebSocket traffic on one TCP listener, so
// this crate covers both sides of the sniff: request-head parsing, the
// upgrade handshake, raw HTTP responses, and the frame codec used after the
// upgrade.

pub mod frame;
pub mod handshake;
pub mod http;

pub use frame::{close_payload, heartbeat_payload, Frame, Role, WsCodec, HEARTBEAT_PAYLOAD_LEN};
pub use handshake::{accept_key, switching_protocols_response};
pub use http::{find_head_end, http_response, RequestHead, MAX_HEAD_BYTES};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("fragmented frames are not supported")]
    FragmentedFrame,
    #[error("client-to-server frame is not masked")]
    UnmaskedClientFrame,
    #[error("frame payload of {0} bytes exceeds the limit")]
    PayloadTooLarge(u64),
    #[error("malformed HTTP request head")]
    BadRequestHead,
}

//! WebSocket frame codec.
//!
//! Non-fragmented frames only: `FIN=0` is a protocol error.  Client frames
//! must be masked, server frames must not be.  Payload length encodings
//! 0-125, 126 (16-bit) and 127 (64-bit) are all supported.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::WireError;

const OP_TEXT: u8 = 0x1;
const OP_CLOSE: u8 = 0x8;
const OP_PING: u8 = 0x9;
const OP_PONG: u8 = 0xA;

/// Upper bound on a single frame payload; control traffic is tiny and the
/// largest data frames are status JSON.
pub const MAX_FRAME_PAYLOAD: usize = 1 << 20;

/// Heartbeat ping payloads are always exactly this long.
pub const HEARTBEAT_PAYLOAD_LEN: usize = 29;

/// Build the heartbeat ping payload: `ixwebsocket::heartbeat::5s::<n>`
/// NUL-padded to exactly 29 bytes, the shape Origin clients expect.
pub fn heartbeat_payload(counter: u64) -> Vec<u8> {
    let mut payload = format!("ixwebsocket::heartbeat::5s::{counter}").into_bytes();
    payload.resize(HEARTBEAT_PAYLOAD_LEN, 0);
    payload
}

/// Build a close payload: two status bytes (big endian) plus a reason.
pub fn close_payload(status: u16, reason: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(2 + reason.len());
    payload.extend_from_slice(&status.to_be_bytes());
    payload.extend_from_slice(reason.as_bytes());
    payload
}

/// A single decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close(Vec<u8>),
    /// Any opcode the protocol does not use; callers log and discard.
    Other(u8),
}

impl Frame {
    pub fn close_with_status(status: u16, reason: &str) -> Frame {
        Frame::Close(close_payload(status, reason))
    }

    /// Status code of a close frame, when the payload carries one.
    pub fn close_status(&self) -> Option<u16> {
        match self {
            Frame::Close(payload) if payload.len() >= 2 => {
                Some(u16::from_be_bytes([payload[0], payload[1]]))
            }
            _ => None,
        }
    }
}

/// Which end of the connection this codec speaks for.  The server rejects
/// unmasked inbound frames and sends unmasked; the client masks outbound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

#[derive(Debug, Clone, Copy)]
pub struct WsCodec {
    role: Role,
}

impl WsCodec {
    pub fn server() -> Self {
        WsCodec { role: Role::Server }
    }

    pub fn client() -> Self {
        WsCodec { role: Role::Client }
    }
}

impl Decoder for WsCodec {
    type Item = Frame;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, WireError> {
        if src.len() < 2 {
            return Ok(None);
        }
        let first = src[0];
        let second = src[1];

        if first & 0x80 == 0 {
            return Err(WireError::FragmentedFrame);
        }
        let opcode = first & 0x0F;
        let masked = second & 0x80 != 0;
        if self.role == Role::Server && !masked {
            return Err(WireError::UnmaskedClientFrame);
        }

        let mut payload_len = u64::from(second & 0x7F);
        let mut header = 2usize;
        if payload_len == 126 {
            if src.len() < 4 {
                return Ok(None);
            }
            payload_len = u64::from(u16::from_be_bytes([src[2], src[3]]));
            header = 4;
        } else if payload_len == 127 {
            if src.len() < 10 {
                return Ok(None);
            }
            let mut be = [0u8; 8];
            be.copy_from_slice(&src[2..10]);
            payload_len = u64::from_be_bytes(be);
            header = 10;
        }
        if payload_len > MAX_FRAME_PAYLOAD as u64 {
            return Err(WireError::PayloadTooLarge(payload_len));
        }
        if masked {
            header += 4;
        }

        let total = header + payload_len as usize;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let mut payload = src[header..total].to_vec();
        if masked {
            let key = [src[header - 4], src[header - 3], src[header - 2], src[header - 1]];
            for (i, byte) in payload.iter_mut().enumerate() {
                *byte ^= key[i % 4];
            }
        }
        src.advance(total);

        let frame = match opcode {
            OP_TEXT => Frame::Text(String::from_utf8_lossy(&payload).into_owned()),
            OP_CLOSE => Frame::Close(payload),
            OP_PING => Frame::Ping(payload),
            OP_PONG => Frame::Pong(payload),
            other => Frame::Other(other),
        };
        Ok(Some(frame))
    }
}

impl Encoder<Frame> for WsCodec {
    type Error = WireError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), WireError> {
        let (opcode, payload) = match item {
            Frame::Text(text) => (OP_TEXT, text.into_bytes()),
            Frame::Ping(payload) => (OP_PING, payload),
            Frame::Pong(payload) => (OP_PONG, payload),
            Frame::Close(payload) => (OP_CLOSE, payload),
            Frame::Other(op) => (op & 0x0F, Vec::new()),
        };
        let masked = self.role == Role::Client;
        let mask_bit: u8 = if masked { 0x80 } else { 0x00 };

        dst.put_u8(0x80 | opcode);
        if payload.len() < 126 {
            dst.put_u8(mask_bit | payload.len() as u8);
        } else if payload.len() < 65536 {
            dst.put_u8(mask_bit | 126);
            dst.put_u16(payload.len() as u16);
        } else {
            dst.put_u8(mask_bit | 127);
            dst.put_u64(payload.len() as u64);
        }

        if masked {
            let key: [u8; 4] = rand::random();
            dst.put_slice(&key);
            for (i, byte) in payload.iter().enumerate() {
                dst.put_u8(byte ^ key[i % 4]);
            }
        } else {
            dst.put_slice(&payload);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(codec: &mut WsCodec, bytes: &[u8]) -> Vec<Frame> {
        let mut buf = BytesMut::from(bytes);
        let mut frames = Vec::new();
        while let Some(frame) = codec.decode(&mut buf).expect("decode should succeed") {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn client_encoded_frames_decode_on_the_server() {
        let mut client = WsCodec::client();
        let mut server = WsCodec::server();
        let mut buf = BytesMut::new();
        client
            .encode(Frame::Text("{\"Command\":\"GetVersion\"}".to_owned()), &mut buf)
            .unwrap();
        assert!(buf[1] & 0x80 != 0, "client frames must set the mask bit");

        let frames = decode_all(&mut server, &buf);
        assert_eq!(frames, vec![Frame::Text("{\"Command\":\"GetVersion\"}".to_owned())]);
    }

    #[test]
    fn server_frames_are_unmasked() {
        let mut server = WsCodec::server();
        let mut buf = BytesMut::new();
        server.encode(Frame::Text("hi".to_owned()), &mut buf).unwrap();
        assert_eq!(&buf[..], &[0x81, 0x02, b'h', b'i']);
    }

    #[test]
    fn unmasked_client_frame_is_a_protocol_error() {
        let mut server = WsCodec::server();
        let mut buf = BytesMut::from(&[0x81u8, 0x02, b'h', b'i'][..]);
        assert!(matches!(
            server.decode(&mut buf),
            Err(WireError::UnmaskedClientFrame)
        ));
    }

    #[test]
    fn fragmented_frame_is_a_protocol_error() {
        let mut client = WsCodec::client();
        let mut buf = BytesMut::from(&[0x01u8, 0x02, b'h', b'i'][..]);
        assert!(matches!(client.decode(&mut buf), Err(WireError::FragmentedFrame)));
    }

    #[test]
    fn partial_frames_wait_for_more_bytes() {
        let mut client = WsCodec::client();
        let mut server = WsCodec::server();
        let mut wire = BytesMut::new();
        client.encode(Frame::Text("x".repeat(300)), &mut wire).unwrap();

        // Feed one byte at a time; the decoder must never error on partials.
        let mut buf = BytesMut::new();
        let mut decoded = None;
        for byte in wire.iter() {
            buf.put_u8(*byte);
            if let Some(frame) = server.decode(&mut buf).expect("partial input is not an error") {
                decoded = Some(frame);
            }
        }
        assert_eq!(decoded, Some(Frame::Text("x".repeat(300))));
    }

    #[test]
    fn sixteen_bit_and_sixty_four_bit_lengths_round_trip() {
        let mut client = WsCodec::client();
        let mut server = WsCodec::server();

        for len in [125usize, 126, 300, 65535, 65536, 70000] {
            let mut buf = BytesMut::new();
            client.encode(Frame::Text("y".repeat(len)), &mut buf).unwrap();
            let frames = decode_all(&mut server, &buf);
            assert_eq!(frames.len(), 1, "length {len}");
            assert_eq!(frames[0], Frame::Text("y".repeat(len)));
        }
    }

    #[test]
    fn control_frames_round_trip_with_payloads() {
        let mut client = WsCodec::client();
        let mut server = WsCodec::server();
        let mut buf = BytesMut::new();
        client.encode(Frame::Ping(b"abc".to_vec()), &mut buf).unwrap();
        client
            .encode(Frame::Close(close_payload(1000, "bye")), &mut buf)
            .unwrap();

        let frames = decode_all(&mut server, &buf);
        assert_eq!(frames[0], Frame::Ping(b"abc".to_vec()));
        assert_eq!(frames[1].close_status(), Some(1000));
    }

    #[test]
    fn unknown_opcodes_decode_as_other() {
        let mut client = WsCodec::client();
        let mut server = WsCodec::server();
        let mut buf = BytesMut::new();
        client.encode(Frame::Other(0x2), &mut buf).unwrap();
        let frames = decode_all(&mut server, &buf);
        assert_eq!(frames, vec![Frame::Other(0x2)]);
    }

    #[test]
    fn heartbeat_payload_is_always_exactly_29_bytes() {
        // Single-digit counters fill the 29 bytes exactly.
        assert_eq!(heartbeat_payload(0), b"ixwebsocket::heartbeat::5s::0".to_vec());
        assert_eq!(heartbeat_payload(7).len(), HEARTBEAT_PAYLOAD_LEN);

        // Longer counters truncate rather than grow the payload, like the
        // device firmware does.
        let payload = heartbeat_payload(1234);
        assert_eq!(payload.len(), HEARTBEAT_PAYLOAD_LEN);
        assert_eq!(payload, b"ixwebsocket::heartbeat::5s::1".to_vec());
    }

    #[test]
    fn oversized_payload_length_is_rejected() {
        // 64-bit length far beyond the cap.
        let mut header = vec![0x81u8, 0x80 | 127];
        header.extend_from_slice(&(u64::MAX).to_be_bytes());
        header.extend_from_slice(&[0, 0, 0, 0]);
        let mut buf = BytesMut::from(&header[..]);
        let mut server = WsCodec::server();
        assert!(matches!(
            server.decode(&mut buf),
            Err(WireError::PayloadTooLarge(_))
        ));
    }
}

// src/agents/diameter/codec.rs
//! Length prefixed framing of Diameter messages over a byte stream.

use bytes::BytesMut;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use super::message::{Message, HEADER_LEN};
use crate::error::ChargingError;

/// Upper bound for a single message.
pub const MAX_MESSAGE_LEN: usize = 1 << 20;

#[derive(Debug, Error)]
pub enum DiameterError {
    #[error("truncated {0}")]
    Truncated(&'static str),

    #[error("unsupported diameter version {0}")]
    UnsupportedVersion(u8),

    #[error("message too large: {0} bytes")]
    TooLarge(usize),

    #[error("unknown AVP {0}")]
    UnknownAvp(String),

    #[error("invalid AVP value: {0}")]
    InvalidValue(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<DiameterError> for ChargingError {
    fn from(e: DiameterError) -> Self {
        match e {
            DiameterError::Io(io) => ChargingError::Io(io.to_string()),
            other => ChargingError::ParserError(other.to_string()),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DiameterCodec;

impl Decoder for DiameterCodec {
    type Item = Message;
    type Error = DiameterError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, DiameterError> {
        if src.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes([0, src[1], src[2], src[3]]) as usize;
        if len > MAX_MESSAGE_LEN {
            return Err(DiameterError::TooLarge(len));
        }
        if len < HEADER_LEN {
            return Err(DiameterError::Truncated("message length"));
        }
        if src.len() < len {
            src.reserve(len - src.len());
            return Ok(None);
        }
        let frame = src.split_to(len);
        Message::decode(&frame).map(Some)
    }
}

impl Encoder<Message> for DiameterCodec {
    type Error = DiameterError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), DiameterError> {
        item.encode(dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::diameter::dictionary::{APP_ID_BASE, CMD_DEVICE_WATCHDOG};

    fn dwr() -> Message {
        Message::request(CMD_DEVICE_WATCHDOG, APP_ID_BASE, 1, 2)
            .with_avp("Origin-Host", "client.cgrates.org")
            .unwrap()
            .with_avp("Origin-Realm", "cgrates.org")
            .unwrap()
    }

    #[test]
    fn test_decode_waits_for_full_frame() {
        let mut codec = DiameterCodec;
        let bytes = dwr().to_bytes();
        let mut buf = BytesMut::from(&bytes[..10]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&bytes[10..]);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), dwr());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_two_frames_in_one_read() {
        let mut codec = DiameterCodec;
        let mut buf = BytesMut::new();
        codec.encode(dwr(), &mut buf).unwrap();
        codec.encode(dwr().answer(), &mut buf).unwrap();
        assert!(codec.decode(&mut buf).unwrap().unwrap().is_request());
        assert!(!codec.decode(&mut buf).unwrap().unwrap().is_request());
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_rejects_oversized() {
        let mut codec = DiameterCodec;
        let mut buf = BytesMut::from(&[1u8, 0xff, 0xff, 0xff][..]);
        assert!(matches!(codec.decode(&mut buf), Err(DiameterError::TooLarge(_))));
        let mut buf = BytesMut::from(&[1u8, 0, 0, 8][..]);
        assert!(matches!(codec.decode(&mut buf), Err(DiameterError::Truncated(_))));
    }
}

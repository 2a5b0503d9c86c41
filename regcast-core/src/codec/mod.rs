//! Length-prefixed framing for stream transports.
//!
//! A TCP connection carries both channels of a [`Transport`]: JSON
//! control text and binary delta buffers. Each frame is tagged so the
//! receiver can tell them apart:
//!
//! ```text
//! kind:    u8   (0x01 = text, 0x02 = binary)
//! length:  u32  (little-endian, payload bytes)
//! payload: [u8; length]
//! ```
//!
//! [`Transport`]: crate::transport::Transport

use bytes::{Buf, BufMut, BytesMut};

use crate::error::RegcastError;
use crate::transport::Frame;

/// Frame header size: kind + length.
pub const FRAME_HEADER_LEN: usize = 5;

/// Largest payload accepted in either direction.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

const KIND_TEXT: u8 = 0x01;
const KIND_BINARY: u8 = 0x02;

/// `tokio_util` codec for [`Frame`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl tokio_util::codec::Decoder for FrameCodec {
    type Item = Frame;
    type Error = RegcastError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }

        let kind = src[0];
        let len = u32::from_le_bytes([src[1], src[2], src[3], src[4]]) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(RegcastError::FrameTooLarge {
                size: len,
                max: MAX_FRAME_SIZE,
            });
        }
        if kind != KIND_TEXT && kind != KIND_BINARY {
            return Err(RegcastError::UnknownFrameKind(kind));
        }

        if src.len() < FRAME_HEADER_LEN + len {
            src.reserve(FRAME_HEADER_LEN + len - src.len());
            return Ok(None);
        }

        src.advance(FRAME_HEADER_LEN);
        let payload = src.split_to(len).freeze();

        let frame = if kind == KIND_TEXT {
            Frame::Text(String::from_utf8(payload.to_vec())?)
        } else {
            Frame::Binary(payload)
        };
        Ok(Some(frame))
    }
}

impl tokio_util::codec::Encoder<Frame> for FrameCodec {
    type Error = RegcastError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (kind, payload): (u8, &[u8]) = match &item {
            Frame::Text(t) => (KIND_TEXT, t.as_bytes()),
            Frame::Binary(b) => (KIND_BINARY, b),
        };
        if payload.len() > MAX_FRAME_SIZE {
            return Err(RegcastError::FrameTooLarge {
                size: payload.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        dst.reserve(FRAME_HEADER_LEN + payload.len());
        dst.put_u8(kind);
        dst.put_u32_le(payload.len() as u32);
        dst.put_slice(payload);
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio_util::codec::{Decoder, Encoder};

    #[test]
    fn text_and_binary_frames() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::new();
        codec
            .encode(Frame::Text("{}".into()), &mut buf)
            .unwrap();
        codec
            .encode(Frame::Binary(Bytes::from_static(&[1, 2, 0, 9])), &mut buf)
            .unwrap();
        assert_eq!(&buf[..7], &[0x01, 2, 0, 0, 0, b'{', b'}']);

        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Frame::Text("{}".into()))
        );
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Frame::Binary(Bytes::from_static(&[1, 2, 0, 9])))
        );
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn partial_frame_waits_for_more() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::from(&[0x02, 3, 0, 0, 0, 7][..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(&[8, 9]);
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Frame::Binary(Bytes::from_static(&[7, 8, 9])))
        );
    }

    #[test]
    fn rejects_bad_frames() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::from(&[0x09, 0, 0, 0, 0][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(RegcastError::UnknownFrameKind(0x09))
        ));

        let mut buf = BytesMut::from(&[0x01, 0xFF, 0xFF, 0xFF, 0xFF][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(RegcastError::FrameTooLarge { .. })
        ));

        let mut buf = BytesMut::from(&[0x01, 2, 0, 0, 0, 0xC3, 0x28][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(RegcastError::InvalidUtf8(_))
        ));
    }
}

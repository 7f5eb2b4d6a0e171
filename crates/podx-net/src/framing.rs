//! Secure-channel framing
//!
//! Length-prefixed frames tagged with a one-byte message code.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Largest data chunk carried by one frame (16 MiB)
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Largest encoded frame: a full chunk plus code, AEAD tag, and slack
pub const MAX_FRAME_SIZE: usize = MAX_CHUNK_SIZE + 1024;

/// Framing errors
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Frame too large: {0} bytes (max {MAX_FRAME_SIZE})")]
    TooLarge(usize),
    #[error("Empty frame")]
    Empty,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Channel message codes
pub mod code {
    /// Ephemeral X25519 public key
    pub const HELLO: u8 = 0x01;
    /// Identity key and transcript signature
    pub const AUTH: u8 = 0x02;
    /// Total size of the following chunked transfer (u64 LE)
    pub const SIZE: u8 = 0x10;
    /// One chunk of a transfer
    pub const CHUNK: u8 = 0x11;
}

/// A framed channel message
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub code: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(code: u8, payload: Vec<u8>) -> Self {
        Self { code, payload }
    }
}

/// Codec for length-prefixed frames
///
/// Wire format:
/// - 4 bytes: length (big-endian, includes code byte)
/// - 1 byte: code
/// - N bytes: payload
#[derive(Debug, Default)]
pub struct FrameCodec;

impl FrameCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 4 {
            return Ok(None);
        }

        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if length > MAX_FRAME_SIZE {
            return Err(FrameError::TooLarge(length));
        }
        if length == 0 {
            return Err(FrameError::Empty);
        }

        if src.len() < 4 + length {
            src.reserve(4 + length - src.len());
            return Ok(None);
        }

        src.advance(4);
        let code = src.get_u8();
        let payload = src.split_to(length - 1).to_vec();

        Ok(Some(Frame { code, payload }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let length = 1 + item.payload.len();
        if length > MAX_FRAME_SIZE {
            return Err(FrameError::TooLarge(length));
        }

        dst.reserve(4 + length);
        dst.put_u32(length as u32);
        dst.put_u8(item.code);
        dst.put_slice(&item.payload);

        Ok(())
    }
}

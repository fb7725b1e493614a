//! Wire framing
//!
//! Messages are length-prefixed UTF-8: `[len: u32 BE][payload: len bytes]`.
//! The explicit prefix keeps message boundaries independent of how the
//! transport chunks the stream, and embedded newlines need no escaping.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Size of the length prefix in bytes
pub const LEN_PREFIX: usize = 4;

/// Framing errors on the receive path
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// Declared frame length exceeds the configured maximum
    #[error("frame of {len} bytes exceeds maximum of {max}")]
    FrameTooLarge { len: usize, max: usize },
    /// Frame payload is not valid UTF-8
    #[error("frame payload is not valid UTF-8")]
    InvalidUtf8,
}

/// Encode a message as a length-prefixed frame
pub fn encode_message(text: &str) -> Bytes {
    let payload = text.as_bytes();
    let mut buf = BytesMut::with_capacity(LEN_PREFIX + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    buf.freeze()
}

/// Incremental frame decoder
///
/// Bytes are fed in as they arrive from the transport; complete frames are
/// popped one at a time. Partial input is buffered until the rest arrives.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    max_frame_len: usize,
}

impl FrameDecoder {
    /// Create a decoder that rejects frames larger than `max_frame_len`
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_frame_len,
        }
    }

    /// Append raw bytes from the transport
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Pop the next complete message, or `None` if more input is needed
    pub fn next_message(&mut self) -> Result<Option<String>, DecodeError> {
        if self.buf.len() < LEN_PREFIX {
            return Ok(None);
        }

        let len = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
        if len > self.max_frame_len {
            return Err(DecodeError::FrameTooLarge {
                len,
                max: self.max_frame_len,
            });
        }

        if self.buf.len() < LEN_PREFIX + len {
            return Ok(None);
        }

        self.buf.advance(LEN_PREFIX);
        let payload = self.buf.split_to(len);
        String::from_utf8(payload.to_vec())
            .map(Some)
            .map_err(|_| DecodeError::InvalidUtf8)
    }
}

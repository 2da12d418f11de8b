//! Length-prefixed frame codec.
//!
//! Frames look like `<decimal-length>#<body>`. The decoder buffers prefix
//! bytes until it sees `#`, then waits for exactly `length` body bytes.
//!
//! Two classes of bad prefix are distinguished:
//!
//! - A prefix that never terminates within [`MAX_PREFIX_LEN`] bytes (or that
//!   declares a body above the configured limit) is a fatal [`CodecError`];
//!   the stream cannot be resynchronised.
//! - A terminated prefix that does not parse as a positive integer yields
//!   [`Frame::InvalidLength`] so the caller can reply with an error and keep
//!   reading.

use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CodecError;
use crate::messages::Response;

/// Maximum number of bytes buffered while looking for the `#` delimiter.
pub const MAX_PREFIX_LEN: usize = 32;

/// Default upper bound on a frame body: 16 MiB.
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// A unit produced by the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete frame body.
    Body(Bytes),
    /// A delimited prefix that is not a positive length. Holds the prefix text.
    InvalidLength(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Prefix,
    Body(usize),
}

/// Codec for `<length>#<json>` frames.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    state: DecodeState,
    max_frame_len: usize,
}

impl FrameCodec {
    /// Create a codec with the default frame size limit.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: DecodeState::Prefix,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    /// Set the maximum accepted body length.
    #[must_use]
    pub const fn with_max_frame_len(mut self, max: usize) -> Self {
        self.max_frame_len = max;
        self
    }

    /// The maximum accepted body length.
    #[must_use]
    pub const fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }

    /// Parse a length prefix. Returns `None` unless it is a positive integer.
    #[must_use]
    pub fn parse_length(prefix: &[u8]) -> Option<usize> {
        std::str::from_utf8(prefix)
            .ok()?
            .parse::<usize>()
            .ok()
            .filter(|len| *len > 0)
    }

    /// Build a complete frame around an already serialized body.
    #[must_use]
    pub fn frame_bytes(body: &[u8]) -> Bytes {
        let mut dst = BytesMut::new();
        write_frame(body, &mut dst);
        dst.freeze()
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn write_frame(body: &[u8], dst: &mut BytesMut) {
    let prefix = body.len().to_string();
    dst.reserve(prefix.len() + 1 + body.len());
    dst.put_slice(prefix.as_bytes());
    dst.put_u8(b'#');
    dst.put_slice(body);
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, CodecError> {
        loop {
            match self.state {
                DecodeState::Prefix => {
                    let delimiter = src
                        .iter()
                        .take(MAX_PREFIX_LEN + 1)
                        .position(|b| *b == b'#');

                    let Some(pos) = delimiter else {
                        if src.len() > MAX_PREFIX_LEN {
                            return Err(CodecError::PrefixTooLong { len: src.len() });
                        }
                        return Ok(None);
                    };

                    let prefix = src.split_to(pos);
                    src.advance(1);

                    match Self::parse_length(&prefix) {
                        None => {
                            let text = String::from_utf8_lossy(&prefix).into_owned();
                            return Ok(Some(Frame::InvalidLength(text)));
                        }
                        Some(len) if len > self.max_frame_len => {
                            return Err(CodecError::FrameTooLarge {
                                len,
                                max: self.max_frame_len,
                            });
                        }
                        Some(len) => self.state = DecodeState::Body(len),
                    }
                }
                DecodeState::Body(len) => {
                    if src.len() < len {
                        src.reserve(len - src.len());
                        return Ok(None);
                    }
                    let body = src.split_to(len).freeze();
                    self.state = DecodeState::Prefix;
                    return Ok(Some(Frame::Body(body)));
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, CodecError> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }

        match self.state {
            DecodeState::Body(expected) => Err(CodecError::Truncated {
                expected,
                received: src.len(),
            }),
            DecodeState::Prefix if src.is_empty() => Ok(None),
            DecodeState::Prefix => Err(CodecError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed inside length prefix",
            ))),
        }
    }
}

impl Encoder<Response> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Response, dst: &mut BytesMut) -> Result<(), CodecError> {
        let body = serde_json::to_vec(&item).map_err(|e| CodecError::Encode(e.to_string()))?;
        write_frame(&body, dst);
        Ok(())
    }
}

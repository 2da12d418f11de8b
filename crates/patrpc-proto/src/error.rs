//! Error types for the patrpc-proto crate.

use thiserror::Error;

/// Errors that can occur while decoding or encoding message envelopes.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// The frame body is not valid JSON for a request envelope.
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    /// The `pattern` field resolves to neither `{cmd}` nor a JSON string holding `{cmd}`.
    #[error("invalid pattern format")]
    InvalidPattern,

    /// Failed to encode a message.
    #[error("encoding error: {0}")]
    Encoding(String),
}

/// Result type for envelope operations.
pub type ProtoResult<T> = Result<T, ProtoError>;

/// Errors raised by the frame codec.
///
/// Every variant except `Encode` is fatal to the connection: the byte stream
/// can no longer be resynchronised.
#[derive(Debug, Error)]
pub enum CodecError {
    /// More prefix bytes arrived than a length can hold without a `#` delimiter.
    #[error("invalid length prefix (too long): {len} bytes without delimiter")]
    PrefixTooLong {
        /// Number of bytes buffered without a delimiter.
        len: usize,
    },

    /// The declared body length exceeds the configured maximum.
    #[error("frame too large: {len} bytes exceeds limit of {max}")]
    FrameTooLarge {
        /// Declared body length.
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// The peer closed the stream part way through a frame.
    #[error("connection closed mid-frame: expected {expected} bytes, received {received}")]
    Truncated {
        /// Bytes the frame still needed.
        expected: usize,
        /// Bytes actually buffered at EOF.
        received: usize,
    },

    /// A response could not be serialized.
    #[error("encoding error: {0}")]
    Encode(String),

    /// Underlying transport error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CodecError {
    /// Whether the error was caused by malformed framing from the peer, as
    /// opposed to a transport failure.
    #[must_use]
    pub const fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::PrefixTooLong { .. } | Self::FrameTooLarge { .. })
    }
}

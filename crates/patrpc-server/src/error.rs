//! Error types for the pattern server.

use std::time::Duration;

use patrpc_proto::CodecError;
use thiserror::Error;

/// Errors that can occur in the pattern server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to the specified address.
    #[error("failed to listen on {0}: {1}")]
    BindFailed(String, std::io::Error),

    /// `start` was called on a server that is already running.
    #[error("server already started")]
    AlreadyStarted,

    /// Tasks were still running when the shutdown deadline expired.
    #[error("shutdown deadline of {0:?} exceeded")]
    ShutdownTimeout(Duration),

    /// A frame could not be written within the I/O timeout.
    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),

    /// The connection was closed while a write was pending.
    #[error("connection closed")]
    ConnectionClosed,

    /// Frame encoding or transport error.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Failure reported by a message handler.
///
/// Failures are retried by default. Use [`HandlerError::permanent`] for
/// failures that must not be replayed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
    retryable: bool,
}

impl HandlerError {
    /// A failure the dispatcher may retry.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// A failure returned to the client without further attempts.
    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    /// The failure text.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the dispatcher may retry after this failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.retryable
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Errors produced while dispatching a request to its handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// No handler is registered for the pattern.
    #[error("Unknown pattern: {0}")]
    UnknownPattern(String),

    /// The handler failed on its last permitted attempt.
    #[error("{message}")]
    HandlerFailed {
        /// Pattern that was dispatched.
        pattern: String,
        /// Number of invocations made.
        attempts: u32,
        /// Failure text of the last attempt.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_failed_error_display() {
        let io_err = std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use");
        let err = ServerError::BindFailed("127.0.0.1:8080".into(), io_err);

        let msg = err.to_string();
        assert!(msg.contains("127.0.0.1:8080"));
        assert!(msg.contains("address in use"));
    }

    #[test]
    fn test_shutdown_timeout_display() {
        let err = ServerError::ShutdownTimeout(Duration::from_millis(250));
        assert!(err.to_string().contains("250ms"));
    }

    #[test]
    fn test_codec_error_is_transparent() {
        let err: ServerError = CodecError::Encode("bad".into()).into();
        assert_eq!(err.to_string(), "encoding error: bad");
    }

    #[test]
    fn test_handler_error_defaults_to_retryable() {
        let err = HandlerError::new("db unavailable");
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "db unavailable");

        let from_str: HandlerError = "boom".into();
        assert!(from_str.is_retryable());
    }

    #[test]
    fn test_permanent_handler_error() {
        let err = HandlerError::permanent("invalid input");
        assert!(!err.is_retryable());
        assert_eq!(err.message(), "invalid input");
    }

    #[test]
    fn test_unknown_pattern_display() {
        let err = DispatchError::UnknownPattern("nope".into());
        assert_eq!(err.to_string(), "Unknown pattern: nope");
    }

    #[test]
    fn test_handler_failed_display_is_last_message() {
        let err = DispatchError::HandlerFailed {
            pattern: "sum".into(),
            attempts: 4,
            message: "third strike".into(),
        };
        assert_eq!(err.to_string(), "third strike");
    }
}

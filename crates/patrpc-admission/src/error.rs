//! Error types for admission control.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during admission control.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdmissionError {
    /// No token is available right now.
    #[error("rate limit exceeded, retry after {retry_after:?}")]
    RateLimited {
        /// Time until the next token becomes available.
        retry_after: Duration,
    },
}

/// Result type for admission operations.
pub type AdmissionResult<T> = Result<T, AdmissionError>;

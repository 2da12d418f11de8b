//! # patrpc-admission
//!
//! Admission control for the patrpc server.
//!
//! The acceptor consults a single server-wide [`RateLimiter`] before every
//! accept attempt. The limiter is a token bucket: it admits a steady
//! `rate_per_sec` with bursts of up to `burst` back-to-back admissions.
//!
//! # Example
//!
//! ```rust
//! use patrpc_admission::{RateLimitConfig, RateLimiter};
//!
//! let limiter = RateLimiter::from_config(&RateLimitConfig::default());
//! assert!(limiter.try_acquire().is_ok());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod rate_limit;

pub use config::{RateLimitConfig, DEFAULT_BURST, DEFAULT_RATE_PER_SEC};
pub use error::{AdmissionError, AdmissionResult};
pub use rate_limit::RateLimiter;

//! Request dispatch with retries.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{DispatchError, HandlerError};
use crate::metrics::MetricsCollector;
use crate::registry::PatternRegistry;

/// How often and how patiently a failing handler is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first failed invocation.
    pub attempts: u32,
    /// Pause between invocations.
    pub delay: Duration,
}

impl RetryPolicy {
    /// Create a retry policy.
    #[must_use]
    pub const fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    /// A policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Upper bound on handler invocations for one request.
    #[must_use]
    pub const fn max_invocations(&self) -> u32 {
        self.attempts.saturating_add(1)
    }
}

/// Routes a request to its handler and retries failures.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<PatternRegistry>,
    metrics: Arc<MetricsCollector>,
    policy: RetryPolicy,
}

impl Dispatcher {
    /// Create a dispatcher.
    #[must_use]
    pub const fn new(
        registry: Arc<PatternRegistry>,
        metrics: Arc<MetricsCollector>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            registry,
            metrics,
            policy,
        }
    }

    /// The retry policy in use.
    #[must_use]
    pub const fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Invoke the handler for `pattern`.
    ///
    /// Every invocation gets a fresh copy of `data`. Successful invocations add
    /// their duration to the processing time counter.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::UnknownPattern` when no handler is registered
    /// and `DispatchError::HandlerFailed` when the last permitted attempt fails.
    pub async fn dispatch(&self, pattern: &str, data: &Value) -> Result<Value, DispatchError> {
        let handler = self
            .registry
            .lookup(pattern)
            .ok_or_else(|| DispatchError::UnknownPattern(pattern.to_string()))?;

        let max = self.policy.max_invocations();
        let mut attempt = 1;
        loop {
            let started = Instant::now();
            let outcome = AssertUnwindSafe(handler.handle(data.clone()))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(HandlerError::new("handler panicked")));

            match outcome {
                Ok(result) => {
                    self.metrics.record_processing_time(started.elapsed());
                    debug!(pattern, attempt, "Handler succeeded");
                    return Ok(result);
                }
                Err(err) if err.is_retryable() && attempt < max => {
                    warn!(pattern, attempt, error = %err, "Handler failed, retrying");
                    tokio::time::sleep(self.policy.delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    return Err(DispatchError::HandlerFailed {
                        pattern: pattern.to_string(),
                        attempts: attempt,
                        message: err.message().to_string(),
                    });
                }
            }
        }
    }
}

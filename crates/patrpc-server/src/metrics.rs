//! Server counters and the periodic metrics log.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Point-in-time copy of the server counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Dispatched requests, excluding `ping`.
    pub requests_total: u64,
    /// Failed requests plus read and write failures.
    pub errors_total: u64,
    /// Connections currently registered.
    pub active_conns: u64,
    /// Accumulated handler time of successful dispatches.
    pub processing_time: Duration,
    /// `ping` commands answered.
    pub heartbeats_total: u64,
    /// Heartbeat send failures and heartbeat timeouts.
    pub heartbeat_fails: u64,
}

/// Lock-protected server counters.
///
/// All counters live under one lock so a snapshot is always consistent.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    inner: Mutex<MetricsSnapshot>,
}

impl MetricsCollector {
    /// Create a collector with every counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a dispatched request. Returns the new total.
    pub fn record_request(&self) -> u64 {
        let mut inner = self.inner.lock();
        inner.requests_total += 1;
        inner.requests_total
    }

    /// Count an error. Returns the new total.
    pub fn record_error(&self) -> u64 {
        let mut inner = self.inner.lock();
        inner.errors_total += 1;
        inner.errors_total
    }

    /// Count an answered `ping`. Returns the new total.
    pub fn record_heartbeat(&self) -> u64 {
        let mut inner = self.inner.lock();
        inner.heartbeats_total += 1;
        inner.heartbeats_total
    }

    /// Count a heartbeat failure. Returns the new total.
    pub fn record_heartbeat_failure(&self) -> u64 {
        let mut inner = self.inner.lock();
        inner.heartbeat_fails += 1;
        inner.heartbeat_fails
    }

    /// Increment the active connection gauge. Returns the new value.
    pub fn connection_opened(&self) -> u64 {
        let mut inner = self.inner.lock();
        inner.active_conns += 1;
        inner.active_conns
    }

    /// Decrement the active connection gauge. Returns the new value.
    pub fn connection_closed(&self) -> u64 {
        let mut inner = self.inner.lock();
        inner.active_conns = inner.active_conns.saturating_sub(1);
        inner.active_conns
    }

    /// Add handler time of a successful dispatch.
    pub fn record_processing_time(&self, elapsed: Duration) {
        let mut inner = self.inner.lock();
        inner.processing_time = inner.processing_time.saturating_add(elapsed);
    }

    /// Copy the current counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        *self.inner.lock()
    }
}

/// Log a metrics snapshot every `interval` until `shutdown` fires.
pub async fn run_reporter(
    metrics: Arc<MetricsCollector>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let snapshot = metrics.snapshot();
                info!(
                    requests_total = snapshot.requests_total,
                    errors_total = snapshot.errors_total,
                    active_conns = snapshot.active_conns,
                    processing_time_ms = snapshot.processing_time.as_millis(),
                    heartbeats_total = snapshot.heartbeats_total,
                    heartbeat_fails = snapshot.heartbeat_fails,
                    "Server metrics"
                );
            }
        }
    }
}

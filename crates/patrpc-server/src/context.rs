//! Shared server state: configuration, registries and connection tracking.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use patrpc_admission::RateLimiter;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tokio_util::task::TaskTracker;
use tracing::debug;

use crate::config::ServerConfig;
use crate::dispatcher::{Dispatcher, RetryPolicy};
use crate::metrics::MetricsCollector;
use crate::registry::PatternRegistry;

/// Handle to one live connection.
///
/// Closing the handle asks the owning session to stop and aborts any write
/// in progress; the session then deregisters itself. Server shutdown closes
/// every handle.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: u64,
    peer: SocketAddr,
    opened_at: Instant,
    closer: CancellationToken,
}

impl ConnectionHandle {
    /// Connection id, unique per server.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Remote address.
    #[must_use]
    pub const fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Time the connection was registered.
    #[must_use]
    pub const fn opened_at(&self) -> Instant {
        self.opened_at
    }

    /// Ask the session to stop. Returns `false` if it was already asked.
    pub fn close(&self) -> bool {
        if self.closer.is_cancelled() {
            return false;
        }
        self.closer.cancel();
        true
    }

    /// Whether a close was requested.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closer.is_cancelled()
    }

    /// Resolves once a close is requested.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closer.cancelled()
    }

    /// Token cancelled when a close is requested.
    #[must_use]
    pub fn close_token(&self) -> CancellationToken {
        self.closer.clone()
    }
}

/// Registry of live connections.
///
/// Keeps the active connection gauge in step with its own membership: the
/// gauge moves only while the membership lock is held.
#[derive(Debug)]
pub struct ConnectionSet {
    connections: RwLock<HashMap<u64, ConnectionHandle>>,
    next_id: AtomicU64,
    metrics: Arc<MetricsCollector>,
    shutdown: CancellationToken,
}

impl ConnectionSet {
    /// Create an empty set reporting to `metrics`.
    ///
    /// Cancelling `shutdown` closes every registered connection.
    #[must_use]
    pub fn new(metrics: Arc<MetricsCollector>, shutdown: CancellationToken) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            metrics,
            shutdown,
        }
    }

    /// Register a new connection.
    pub fn register(&self, peer: SocketAddr) -> ConnectionHandle {
        let handle = ConnectionHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            peer,
            opened_at: Instant::now(),
            closer: self.shutdown.child_token(),
        };

        let mut connections = self.connections.write();
        connections.insert(handle.id, handle.clone());
        let active = self.metrics.connection_opened();
        drop(connections);

        debug!(connection_id = handle.id, peer = %peer, active, "Connection registered");
        handle
    }

    /// Remove a connection. Returns `false` if it was not registered.
    pub fn deregister(&self, id: u64) -> bool {
        let mut connections = self.connections.write();
        let removed = connections.remove(&id).is_some();
        if removed {
            self.metrics.connection_closed();
        }
        removed
    }

    /// Number of live connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// Whether no connection is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Whether a connection is registered.
    #[must_use]
    pub fn contains(&self, id: u64) -> bool {
        self.connections.read().contains_key(&id)
    }

    /// Ask every live connection to close. Returns how many were asked.
    pub fn close_all(&self) -> usize {
        self.connections
            .read()
            .values()
            .filter(|handle| handle.close())
            .count()
    }
}

/// State shared by the acceptor, every session and the shutdown path.
#[derive(Debug)]
pub struct ServerContext {
    config: ServerConfig,
    registry: Arc<PatternRegistry>,
    metrics: Arc<MetricsCollector>,
    connections: ConnectionSet,
    limiter: RateLimiter,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl ServerContext {
    /// Build the shared state. The configuration is normalized.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        let config = config.normalized();
        let metrics = Arc::new(MetricsCollector::new());
        let shutdown = CancellationToken::new();
        Self {
            limiter: RateLimiter::from_config(&config.rate_limit),
            connections: ConnectionSet::new(metrics.clone(), shutdown.clone()),
            registry: Arc::new(PatternRegistry::new()),
            metrics,
            shutdown,
            tasks: TaskTracker::new(),
            config,
        }
    }

    /// Effective configuration.
    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Handler registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<PatternRegistry> {
        &self.registry
    }

    /// Server counters.
    #[must_use]
    pub const fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// Live connections.
    #[must_use]
    pub const fn connections(&self) -> &ConnectionSet {
        &self.connections
    }

    /// Accept rate limiter.
    #[must_use]
    pub const fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Token cancelled when shutdown begins.
    #[must_use]
    pub const fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Tracker owning the acceptor, sessions and heartbeat tasks.
    #[must_use]
    pub const fn tasks(&self) -> &TaskTracker {
        &self.tasks
    }

    /// Whether shutdown has begun.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Flip into shutdown. Returns `false` if shutdown had already begun.
    pub fn begin_shutdown(&self) -> bool {
        if self.shutdown.is_cancelled() {
            return false;
        }
        self.shutdown.cancel();
        true
    }

    /// A dispatcher bound to this server's registry and retry policy.
    #[must_use]
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(
            self.registry.clone(),
            self.metrics.clone(),
            RetryPolicy::new(self.config.retry_attempts, self.config.retry_delay),
        )
    }
}

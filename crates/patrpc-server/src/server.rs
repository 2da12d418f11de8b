//! Pattern server facade.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpListener;
use tracing::info;

use crate::acceptor::run_acceptor;
use crate::config::ServerConfig;
use crate::context::ServerContext;
use crate::error::{ServerError, ServerResult};
use crate::metrics::{run_reporter, MetricsSnapshot};
use crate::registry::{HandlerResult, PatternRegistry, SharedHandler};
use crate::shutdown::ShutdownCoordinator;

/// TCP server routing framed JSON requests to pattern handlers.
#[derive(Debug)]
pub struct PatternServer {
    ctx: Arc<ServerContext>,
    local_addr: Mutex<Option<SocketAddr>>,
    started: AtomicBool,
}

impl PatternServer {
    /// Create a server. Zero or empty configuration fields take their defaults.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self {
            ctx: Arc::new(ServerContext::new(config)),
            local_addr: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    /// The effective (normalized) configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        self.ctx.config()
    }

    /// The handler registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<PatternRegistry> {
        self.ctx.registry()
    }

    /// Register a handler for a command. Returns `true` if it replaced one.
    ///
    /// Handlers may be registered before or after [`start`](Self::start).
    pub fn register_handler<F, Fut>(&self, pattern: impl Into<String>, handler: F) -> bool
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.ctx.registry().register(pattern, handler)
    }

    /// Register a shared handler for a command. Returns `true` if it replaced one.
    pub fn register_shared(&self, pattern: impl Into<String>, handler: SharedHandler) -> bool {
        self.ctx.registry().register_shared(pattern, handler)
    }

    /// Bind the listener and start accepting connections.
    ///
    /// Returns the bound address, which differs from the configured one when
    /// the configured port is 0.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::AlreadyStarted` on a second call and
    /// `ServerError::BindFailed` if the address cannot be bound.
    pub async fn start(&self) -> ServerResult<SocketAddr> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyStarted);
        }

        let listener = match self.bind().await {
            Ok(listener) => listener,
            Err(e) => {
                self.started.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        let local = listener.local_addr().map_err(|e| {
            self.started.store(false, Ordering::SeqCst);
            ServerError::Io(e)
        })?;
        *self.local_addr.lock() = Some(local);

        let config = self.ctx.config();
        info!(
            addr = %local,
            max_connections = config.max_connections,
            rate_limit = config.rate_limit.rate_per_sec,
            burst = config.rate_limit.burst,
            patterns = self.ctx.registry().len(),
            "Pattern server listening"
        );

        let tasks = self.ctx.tasks();
        tasks.spawn(run_acceptor(listener, self.ctx.clone()));
        tasks.spawn(run_reporter(
            self.ctx.metrics().clone(),
            config.metrics_log_interval,
            self.ctx.shutdown_token().clone(),
        ));

        Ok(local)
    }

    async fn bind(&self) -> ServerResult<TcpListener> {
        let addr = self.ctx.config().bind_addr();
        TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::BindFailed(addr, e))
    }

    /// Stop accepting, close every connection and wait for all tasks, at
    /// most `deadline`.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::ShutdownTimeout` if tasks outlive the deadline.
    pub async fn shutdown(&self, deadline: Duration) -> ServerResult<()> {
        ShutdownCoordinator::new(self.ctx.clone())
            .shutdown(deadline)
            .await
    }

    /// Consistent copy of the server counters.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.ctx.metrics().snapshot()
    }

    /// The bound address, once started.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Number of live connections.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.ctx.connections().len()
    }

    /// Whether shutdown has begun.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.ctx.is_shutting_down()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;

    fn server() -> PatternServer {
        PatternServer::new(ServerConfig::new("127.0.0.1:0"))
    }

    #[test]
    fn test_new_server_normalizes_config() {
        let server = PatternServer::new(ServerConfig::new("").with_retry(0, Duration::ZERO));
        assert_eq!(server.config().addr, ":8080");
        assert_eq!(server.config().retry_attempts, 0);
        assert_eq!(server.config().retry_delay, Duration::from_millis(500));
        assert!(server.local_addr().is_none());
        assert!(!server.is_shutting_down());
    }

    #[test]
    fn test_register_handler() {
        let server = server();
        assert!(!server.register_handler("echo", |data| async move { Ok::<_, HandlerError>(data) }));
        assert!(server.register_handler("echo", |_| async move { Ok::<_, HandlerError>(Value::Null) }));
        assert_eq!(server.registry().patterns(), vec!["echo"]);
    }

    #[tokio::test]
    async fn test_start_reports_bound_addr() {
        let server = server();
        let addr = server.start().await.unwrap();

        assert_ne!(addr.port(), 0);
        assert_eq!(server.local_addr(), Some(addr));

        server.shutdown(Duration::from_secs(5)).await.unwrap();
        assert!(server.is_shutting_down());
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let server = server();
        server.start().await.unwrap();

        assert!(matches!(server.start().await, Err(ServerError::AlreadyStarted)));
        server.shutdown(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_failure_surfaces() {
        let holder = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let taken = holder.local_addr().unwrap();

        let server = PatternServer::new(ServerConfig::new(taken.to_string()));
        let err = server.start().await.unwrap_err();

        assert!(matches!(err, ServerError::BindFailed(ref addr, _) if *addr == taken.to_string()));
        assert!(server.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_metrics_start_empty() {
        let server = server();
        assert_eq!(server.metrics(), MetricsSnapshot::default());
        assert_eq!(server.active_connections(), 0);
    }
}

//! Coordinated server shutdown.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::context::ServerContext;
use crate::error::{ServerError, ServerResult};

/// Drains the acceptor and every session within a deadline.
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    ctx: Arc<ServerContext>,
}

impl ShutdownCoordinator {
    /// Create a coordinator for a server context.
    #[must_use]
    pub const fn new(ctx: Arc<ServerContext>) -> Self {
        Self { ctx }
    }

    /// Stop accepting, close every connection and wait for all tasks.
    ///
    /// Calling this again after a previous call is harmless: it waits on the
    /// same task set.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::ShutdownTimeout` if tasks are still running when
    /// `deadline` expires. They keep unwinding in the background.
    pub async fn shutdown(&self, deadline: Duration) -> ServerResult<()> {
        if self.ctx.begin_shutdown() {
            info!(deadline_ms = deadline.as_millis(), "Shutting down");
        }

        // Cancelling the shutdown token already closed every handle.
        self.ctx.connections().close_all();
        self.ctx.tasks().close();
        info!(
            connections = self.ctx.connections().len(),
            tasks = self.ctx.tasks().len(),
            "Waiting for tasks to finish"
        );

        if tokio::time::timeout(deadline, self.ctx.tasks().wait()).await.is_err() {
            warn!(
                remaining = self.ctx.tasks().len(),
                "Shutdown deadline exceeded"
            );
            return Err(ServerError::ShutdownTimeout(deadline));
        }

        info!("Shutdown complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use std::net::SocketAddr;

    fn ctx() -> Arc<ServerContext> {
        Arc::new(ServerContext::new(ServerConfig::new("127.0.0.1:0")))
    }

    #[tokio::test]
    async fn test_shutdown_with_no_tasks() {
        let ctx = ctx();
        let coordinator = ShutdownCoordinator::new(ctx.clone());

        coordinator.shutdown(Duration::from_secs(1)).await.unwrap();
        assert!(ctx.is_shutting_down());
        assert!(ctx.tasks().is_closed());
    }

    #[tokio::test]
    async fn test_shutdown_closes_connections() {
        let ctx = ctx();
        let handle = ctx
            .connections()
            .register(SocketAddr::from(([127, 0, 0, 1], 1)));

        let task_ctx = ctx.clone();
        let waiter = handle.clone();
        ctx.tasks().spawn(async move {
            waiter.closed().await;
            task_ctx.connections().deregister(waiter.id());
        });

        ShutdownCoordinator::new(ctx.clone())
            .shutdown(Duration::from_secs(1))
            .await
            .unwrap();

        assert!(handle.is_closed());
        assert!(ctx.connections().is_empty());
        assert_eq!(ctx.metrics().snapshot().active_conns, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_deadline_exceeded() {
        let ctx = ctx();
        ctx.tasks().spawn(async {
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let result = ShutdownCoordinator::new(ctx.clone())
            .shutdown(Duration::from_millis(100))
            .await;

        assert!(matches!(result, Err(ServerError::ShutdownTimeout(d)) if d == Duration::from_millis(100)));
        assert_eq!(ctx.tasks().len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let coordinator = ShutdownCoordinator::new(ctx());
        coordinator.shutdown(Duration::from_secs(1)).await.unwrap();
        coordinator.shutdown(Duration::from_secs(1)).await.unwrap();
    }
}

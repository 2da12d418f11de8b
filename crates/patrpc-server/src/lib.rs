//! # patrpc-server
//!
//! TCP server for the patrpc message-pattern protocol.
//!
//! Clients hold a persistent connection, send `<length>#<json>` frames naming
//! a pattern, and receive one framed response per request. The server also
//! pushes heartbeat frames and retries failing handlers.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   accept    ┌────────────┐  spawn   ┌──────────────────┐
//! │ Listener │────────────►│  Acceptor  │─────────►│     Session      │
//! └──────────┘             │  cap/rate  │          │  ┌────────────┐  │
//!                          └────────────┘          │  │ Heartbeat  │  │
//!                                                  │  └────────────┘  │
//!                                                  └────────┬─────────┘
//!                                                           │
//!                          ┌────────────┐  lookup  ┌────────▼─────────┐
//!                          │  Pattern   │◄─────────│    Dispatcher    │
//!                          │  Registry  │          │     (retry)      │
//!                          └────────────┘          └──────────────────┘
//! ```
//!
//! Every component shares one [`ServerContext`]: configuration, registry,
//! metrics, connection set, rate limiter and the shutdown signal.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use patrpc_server::{HandlerError, PatternServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = PatternServer::new(ServerConfig::new(":8080"));
//!     server.register_handler("echo", |data| async move { Ok::<_, HandlerError>(data) });
//!
//!     server.start().await?;
//!     tokio::signal::ctrl_c().await?;
//!     server.shutdown(Duration::from_secs(10)).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Replies
//!
//! - `ping` is answered with `"pong"` without consulting the registry.
//! - A registered pattern is answered with its handler's result.
//! - Unknown patterns, failed handlers and malformed requests get an error
//!   reply; the connection stays open.
//! - Unrecoverable framing errors get an error reply, then the connection is
//!   closed.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod acceptor;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod session;
pub mod shutdown;

// Re-export main types
pub use config::{
    ServerConfig, DEFAULT_ACCEPT_TIMEOUT, DEFAULT_ADDR, DEFAULT_HEARTBEAT_INTERVAL,
    DEFAULT_HEARTBEAT_TIMEOUT, DEFAULT_MAX_CONNECTIONS, DEFAULT_METRICS_LOG_INTERVAL,
    DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_DELAY, DEFAULT_TIMEOUT,
};
pub use context::{ConnectionHandle, ConnectionSet, ServerContext};
pub use dispatcher::{Dispatcher, RetryPolicy};
pub use error::{DispatchError, HandlerError, ServerError, ServerResult};
pub use metrics::{MetricsCollector, MetricsSnapshot};
pub use registry::{HandlerResult, MessageHandler, PatternRegistry, SharedHandler};
pub use server::PatternServer;
pub use session::{CloseReason, FrameWriter, Session};
pub use shutdown::ShutdownCoordinator;

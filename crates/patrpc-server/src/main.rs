//! patrpc-server binary.
//!
//! Runs a pattern server with two demo handlers until Ctrl-C.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use patrpc_server::{HandlerError, PatternServer, ServerConfig};
use serde_json::Value;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "patrpc-server")]
#[command(about = "TCP message-pattern server")]
#[command(version)]
struct Cli {
    /// Listen address (`host:port` or `:port`)
    #[arg(long, env = "PATRPC_ADDR", default_value = ":8080")]
    addr: String,

    /// Write timeout in seconds
    #[arg(long, env = "PATRPC_TIMEOUT_SECS", default_value_t = 30)]
    timeout_secs: u64,

    /// Maximum concurrent connections
    #[arg(long, env = "PATRPC_MAX_CONNECTIONS", default_value_t = 1000)]
    max_connections: usize,

    /// Accepted connections per second
    #[arg(long, env = "PATRPC_RATE_LIMIT", default_value_t = 100)]
    rate_limit: u32,

    /// Accept burst size
    #[arg(long, env = "PATRPC_RATE_BURST", default_value_t = 200)]
    rate_burst: u32,

    /// Retries after a failed handler invocation
    #[arg(long, env = "PATRPC_RETRY_ATTEMPTS", default_value_t = 3)]
    retry_attempts: u32,

    /// Pause between retries in milliseconds
    #[arg(long, env = "PATRPC_RETRY_DELAY_MS", default_value_t = 500)]
    retry_delay_ms: u64,

    /// Interval between heartbeat frames in seconds
    #[arg(long, env = "PATRPC_HEARTBEAT_INTERVAL_SECS", default_value_t = 15)]
    heartbeat_interval_secs: u64,

    /// Idle time before a connection is closed, in seconds
    #[arg(long, env = "PATRPC_HEARTBEAT_TIMEOUT_SECS", default_value_t = 45)]
    heartbeat_timeout_secs: u64,

    /// Time allowed for a graceful shutdown, in seconds
    #[arg(long, env = "PATRPC_SHUTDOWN_TIMEOUT_SECS", default_value_t = 10)]
    shutdown_timeout_secs: u64,

    /// Emit logs as JSON
    #[arg(long, env = "PATRPC_LOG_JSON")]
    log_json: bool,
}

impl Cli {
    fn server_config(&self) -> ServerConfig {
        ServerConfig::new(self.addr.clone())
            .with_timeout(Duration::from_secs(self.timeout_secs))
            .with_max_connections(self.max_connections)
            .with_rate_limit(self.rate_limit, self.rate_burst)
            .with_retry(self.retry_attempts, Duration::from_millis(self.retry_delay_ms))
            .with_heartbeat_interval(Duration::from_secs(self.heartbeat_interval_secs))
            .with_heartbeat_timeout(Duration::from_secs(self.heartbeat_timeout_secs))
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn sum(data: &Value) -> Result<Value, HandlerError> {
    let items = data
        .as_array()
        .ok_or_else(|| HandlerError::permanent("sum expects an array of numbers"))?;
    let mut total = 0.0;
    for item in items {
        total += item
            .as_f64()
            .ok_or_else(|| HandlerError::permanent(format!("not a number: {item}")))?;
    }
    Ok(Value::from(total))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    let server = PatternServer::new(cli.server_config());
    server.register_handler("echo", |data| async move { Ok::<_, HandlerError>(data) });
    server.register_handler("sum", |data| async move { sum(&data) });

    let addr = match server.start().await {
        Ok(addr) => addr,
        Err(e) => {
            error!(error = %e, "Failed to start server");
            return ExitCode::FAILURE;
        }
    };
    info!(addr = %addr, patterns = ?server.registry().patterns(), "Ready");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }

    let metrics = server.metrics();
    info!(metrics = ?metrics, "Shutdown requested");

    match server
        .shutdown(Duration::from_secs(cli.shutdown_timeout_secs))
        .await
    {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Shutdown incomplete");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["patrpc-server"]);
        let config = cli.server_config();

        assert_eq!(config, ServerConfig::default());
        assert_eq!(cli.shutdown_timeout_secs, 10);
        assert!(!cli.log_json);
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "patrpc-server",
            "--addr",
            "127.0.0.1:4061",
            "--retry-attempts",
            "0",
            "--rate-limit",
            "5",
        ]);
        let config = cli.server_config();

        assert_eq!(config.addr, "127.0.0.1:4061");
        assert_eq!(config.retry_attempts, 0);
        assert_eq!(config.rate_limit.rate_per_sec, 5);
    }

    #[test]
    fn test_sum_handler() {
        assert_eq!(sum(&json!([1, 2, 3.5])).unwrap(), json!(6.5));
        assert!(!sum(&json!("nope")).unwrap_err().is_retryable());
        assert!(sum(&json!([1, "x"])).is_err());
    }
}

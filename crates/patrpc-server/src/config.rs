//! Server configuration.

use std::time::Duration;

use patrpc_admission::RateLimitConfig;
use patrpc_proto::DEFAULT_MAX_FRAME_LEN;

/// Default listen address (all interfaces, port 8080).
pub const DEFAULT_ADDR: &str = ":8080";

/// Default I/O timeout applied to every frame write.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default maximum number of concurrent connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 1000;

/// Default number of retries after a failed handler invocation.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Default pause between handler retries.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Default interval between server heartbeat frames.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Default time a connection may stay silent before it is closed.
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(45);

/// Default bound on a single accept call.
pub const DEFAULT_ACCEPT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default interval of the periodic metrics log.
pub const DEFAULT_METRICS_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// Configuration for the pattern server.
///
/// Zero or empty fields are replaced by their defaults when the server is
/// constructed (see [`ServerConfig::normalized`]). `retry_attempts = 0` is
/// meaningful and disables retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to listen on. Accepts `host:port` or a bare `:port`.
    pub addr: String,
    /// Bound on every frame write.
    pub timeout: Duration,
    /// Maximum number of concurrent connections.
    pub max_connections: usize,
    /// Accept rate limit.
    pub rate_limit: RateLimitConfig,
    /// Retries after a failed handler invocation.
    pub retry_attempts: u32,
    /// Pause between retries.
    pub retry_delay: Duration,
    /// Interval between heartbeat frames sent to each client.
    pub heartbeat_interval: Duration,
    /// Time a connection may stay silent before it is closed.
    pub heartbeat_timeout: Duration,
    /// Bound on a single accept call so the acceptor can observe shutdown.
    pub accept_timeout: Duration,
    /// Largest frame body accepted from clients.
    pub max_frame_len: usize,
    /// Interval of the periodic metrics log.
    pub metrics_log_interval: Duration,
}

impl ServerConfig {
    /// Create a configuration with default tunables for the given address.
    #[must_use]
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            timeout: DEFAULT_TIMEOUT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            rate_limit: RateLimitConfig::default(),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            accept_timeout: DEFAULT_ACCEPT_TIMEOUT,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            metrics_log_interval: DEFAULT_METRICS_LOG_INTERVAL,
        }
    }

    /// Set the I/O timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub const fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the accept rate limit.
    #[must_use]
    pub const fn with_rate_limit(mut self, rate_per_sec: u32, burst: u32) -> Self {
        self.rate_limit = RateLimitConfig::new(rate_per_sec, burst);
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub const fn with_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.retry_attempts = attempts;
        self.retry_delay = delay;
        self
    }

    /// Set the heartbeat interval.
    #[must_use]
    pub const fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the heartbeat timeout.
    #[must_use]
    pub const fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    /// Set the accept timeout.
    #[must_use]
    pub const fn with_accept_timeout(mut self, timeout: Duration) -> Self {
        self.accept_timeout = timeout;
        self
    }

    /// Set the maximum frame body length.
    #[must_use]
    pub const fn with_max_frame_len(mut self, max: usize) -> Self {
        self.max_frame_len = max;
        self
    }

    /// Set the metrics log interval.
    #[must_use]
    pub const fn with_metrics_log_interval(mut self, interval: Duration) -> Self {
        self.metrics_log_interval = interval;
        self
    }

    /// Replace every zero or empty field with its default.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.addr.trim().is_empty() {
            self.addr = DEFAULT_ADDR.to_string();
        }
        self.timeout = or_default(self.timeout, DEFAULT_TIMEOUT);
        if self.max_connections == 0 {
            self.max_connections = DEFAULT_MAX_CONNECTIONS;
        }
        self.rate_limit = self.rate_limit.normalized();
        self.retry_delay = or_default(self.retry_delay, DEFAULT_RETRY_DELAY);
        self.heartbeat_interval = or_default(self.heartbeat_interval, DEFAULT_HEARTBEAT_INTERVAL);
        self.heartbeat_timeout = or_default(self.heartbeat_timeout, DEFAULT_HEARTBEAT_TIMEOUT);
        self.accept_timeout = or_default(self.accept_timeout, DEFAULT_ACCEPT_TIMEOUT);
        if self.max_frame_len == 0 {
            self.max_frame_len = DEFAULT_MAX_FRAME_LEN;
        }
        self.metrics_log_interval =
            or_default(self.metrics_log_interval, DEFAULT_METRICS_LOG_INTERVAL);
        self
    }

    /// Address in a form `TcpListener::bind` resolves. A bare `:port` binds
    /// all IPv4 interfaces.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        let addr = self.addr.trim();
        if addr.starts_with(':') {
            format!("0.0.0.0{addr}")
        } else {
            addr.to_string()
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_ADDR)
    }
}

fn or_default(value: Duration, default: Duration) -> Duration {
    if value.is_zero() { default } else { value }
}

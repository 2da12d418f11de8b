//! Token-bucket rate limiting.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::trace;

use crate::config::RateLimitConfig;
use crate::error::{AdmissionError, AdmissionResult};

/// Shortest pause between two admission attempts while waiting.
const MIN_WAIT: Duration = Duration::from_millis(1);

/// Token bucket state.
#[derive(Debug)]
struct TokenBucket {
    /// Current tokens available. Fractional so slow rates still refill smoothly.
    tokens: f64,
    /// Last time tokens were refilled.
    last_refill: Instant,
    /// Tokens added per second.
    rate: f64,
    /// Maximum tokens (burst size).
    capacity: f64,
}

impl TokenBucket {
    /// Create a new token bucket, starting full.
    fn new(rate: u32, capacity: u32) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            tokens: capacity,
            last_refill: Instant::now(),
            rate: f64::from(rate.max(1)),
            capacity,
        }
    }

    /// Refill tokens based on elapsed time.
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = elapsed.mul_add(self.rate, self.tokens).min(self.capacity);
        self.last_refill = now;
    }

    /// Take one token, or report how long until one is available.
    fn try_consume(&mut self) -> Result<(), Duration> {
        self.refill();

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let missing = 1.0 - self.tokens;
            Err(Duration::from_secs_f64(missing / self.rate))
        }
    }

    /// Whole tokens currently available.
    fn available(&mut self) -> u32 {
        self.refill();
        self.tokens.floor() as u32
    }
}

/// Server-wide admission limiter using the token bucket algorithm.
#[derive(Debug)]
pub struct RateLimiter {
    rate_per_sec: u32,
    burst: u32,
    bucket: Mutex<TokenBucket>,
}

impl RateLimiter {
    /// Create a limiter admitting `rate_per_sec` with bursts of `burst`.
    ///
    /// Zero values are clamped to 1.
    #[must_use]
    pub fn new(rate_per_sec: u32, burst: u32) -> Self {
        Self {
            rate_per_sec: rate_per_sec.max(1),
            burst: burst.max(1),
            bucket: Mutex::new(TokenBucket::new(rate_per_sec, burst)),
        }
    }

    /// Create from configuration.
    #[must_use]
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.rate_per_sec, config.burst)
    }

    /// Take a token if one is available.
    ///
    /// # Errors
    ///
    /// Returns `AdmissionError::RateLimited` with the time until the next token.
    pub fn try_acquire(&self) -> AdmissionResult<()> {
        self.bucket
            .lock()
            .try_consume()
            .map_err(|retry_after| AdmissionError::RateLimited { retry_after })
    }

    /// Wait until a token is available and take it.
    pub async fn acquire(&self) {
        loop {
            match self.try_acquire() {
                Ok(()) => return,
                Err(AdmissionError::RateLimited { retry_after }) => {
                    trace!(retry_after_ms = retry_after.as_millis(), "Waiting for admission token");
                    tokio::time::sleep(retry_after.max(MIN_WAIT)).await;
                }
            }
        }
    }

    /// Whole tokens currently available.
    #[must_use]
    pub fn available(&self) -> u32 {
        self.bucket.lock().available()
    }

    /// Configured steady rate.
    #[must_use]
    pub const fn rate_per_sec(&self) -> u32 {
        self.rate_per_sec
    }

    /// Configured burst size.
    #[must_use]
    pub const fn burst(&self) -> u32 {
        self.burst
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::from_config(&RateLimitConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_starts_full() {
        let limiter = RateLimiter::new(10, 5);
        assert_eq!(limiter.available(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_limited() {
        let limiter = RateLimiter::new(10, 3);

        for _ in 0..3 {
            assert!(limiter.try_acquire().is_ok());
        }

        match limiter.try_acquire() {
            Err(AdmissionError::RateLimited { retry_after }) => {
                assert!(retry_after > Duration::ZERO);
                assert!(retry_after <= Duration::from_millis(100));
            }
            Ok(()) => panic!("expected rate limit after burst"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_refills_over_time() {
        let limiter = RateLimiter::new(10, 2);
        assert!(limiter.try_acquire().is_ok());
        assert!(limiter.try_acquire().is_ok());
        assert!(limiter.try_acquire().is_err());

        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(limiter.try_acquire().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_caps_at_burst() {
        let limiter = RateLimiter::new(100, 4);
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(limiter.available(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_token() {
        let limiter = RateLimiter::new(10, 1);
        limiter.acquire().await;

        let start = Instant::now();
        limiter.acquire().await;
        let waited = start.elapsed();

        assert!(waited >= Duration::from_millis(99), "waited {waited:?}");
        assert!(waited < Duration::from_millis(150), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_acquire_respects_rate() {
        let limiter = Arc::new(RateLimiter::new(20, 1));
        let start = Instant::now();

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.acquire().await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        // One token up front, four more at 50ms each.
        assert!(start.elapsed() >= Duration::from_millis(195));
    }

    #[test]
    fn test_zero_values_clamped() {
        let limiter = RateLimiter::new(0, 0);
        assert_eq!(limiter.rate_per_sec(), 1);
        assert_eq!(limiter.burst(), 1);
    }

    #[test]
    fn test_from_config() {
        let limiter = RateLimiter::from_config(&RateLimitConfig::new(7, 9));
        assert_eq!(limiter.rate_per_sec(), 7);
        assert_eq!(limiter.burst(), 9);
    }
}

//! Rate limit configuration.

use serde::{Deserialize, Serialize};

/// Default steady admission rate.
pub const DEFAULT_RATE_PER_SEC: u32 = 100;

/// Default burst allowance.
pub const DEFAULT_BURST: u32 = 200;

/// Configuration for the token-bucket rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Tokens added per second.
    pub rate_per_sec: u32,
    /// Bucket capacity (maximum burst).
    pub burst: u32,
}

impl RateLimitConfig {
    /// Create a configuration.
    #[must_use]
    pub const fn new(rate_per_sec: u32, burst: u32) -> Self {
        Self {
            rate_per_sec,
            burst,
        }
    }

    /// Replace zero fields with their defaults.
    #[must_use]
    pub const fn normalized(self) -> Self {
        Self {
            rate_per_sec: if self.rate_per_sec == 0 {
                DEFAULT_RATE_PER_SEC
            } else {
                self.rate_per_sec
            },
            burst: if self.burst == 0 {
                DEFAULT_BURST
            } else {
                self.burst
            },
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new(DEFAULT_RATE_PER_SEC, DEFAULT_BURST)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default() {
        let config = RateLimitConfig::default();
        assert_eq!(config.rate_per_sec, 100);
        assert_eq!(config.burst, 200);
    }

    #[test]
    fn test_normalized_fills_zeroes() {
        let config = RateLimitConfig::new(0, 0).normalized();
        assert_eq!(config, RateLimitConfig::default());
    }

    #[test]
    fn test_normalized_keeps_explicit_values() {
        let config = RateLimitConfig::new(5, 0).normalized();
        assert_eq!(config.rate_per_sec, 5);
        assert_eq!(config.burst, DEFAULT_BURST);
    }
}

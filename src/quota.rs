//! The resolved per-request limit.
//!
//! A `Quota` is what the limiter enforces for one request: how many hits a
//! key may make per fixed window, how long it is blocked after breaking that
//! ceiling, and the prefix that namespaces its keys. The configured quota is
//! the starting point; resolvers derive stricter or looser ones per request.
//!
//! # Examples
//!
//! ```ignore
//! use flowgate::Quota;
//! use std::time::Duration;
//!
//! // 100 requests per minute
//! let quota = Quota::per_minute(100);
//!
//! // Login endpoint: 5 attempts per 15 minutes, then an hour out
//! let quota = Quota::new(5, Duration::from_secs(900))
//!     .with_block_duration(Duration::from_secs(3600))
//!     .with_key_prefix("auth");
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Prefix used when none is configured.
pub const DEFAULT_KEY_PREFIX: &str = "rl";

/// Limit applied to one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quota {
    /// Maximum number of hits in the window.
    max: u64,

    /// Fixed window length.
    window: Duration,

    /// Cool-down after the first violation in a window. Zero means none.
    block_duration: Duration,

    /// Namespace for keys counted under this quota.
    key_prefix: String,
}

impl Quota {
    /// Create a new quota with the given ceiling and window.
    ///
    /// # Panics
    ///
    /// Panics if `max` is 0 or `window` is zero. Use [`Quota::try_new`] for
    /// values that come from configuration.
    pub fn new(max: u64, window: Duration) -> Self {
        assert!(max > 0, "max must be greater than 0");
        assert!(!window.is_zero(), "window must be non-zero");
        Self::unchecked(max, window)
    }

    /// Try to create a new quota, returning an error if invalid.
    pub fn try_new(max: u64, window: Duration) -> Result<Self> {
        if max == 0 {
            return Err(ConfigError::InvalidQuota("max must be greater than 0".into()).into());
        }
        if window.is_zero() {
            return Err(ConfigError::InvalidQuota("window must be non-zero".into()).into());
        }
        Ok(Self::unchecked(max, window))
    }

    fn unchecked(max: u64, window: Duration) -> Self {
        Self {
            max,
            window,
            block_duration: Duration::ZERO,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }

    /// Create a quota allowing `n` requests per second.
    pub fn per_second(n: u64) -> Self {
        Self::new(n, Duration::from_secs(1))
    }

    /// Create a quota allowing `n` requests per minute.
    pub fn per_minute(n: u64) -> Self {
        Self::new(n, Duration::from_secs(60))
    }

    /// Create a quota allowing `n` requests per hour.
    pub fn per_hour(n: u64) -> Self {
        Self::new(n, Duration::from_secs(3600))
    }

    /// Set the cool-down applied after the first violation.
    pub fn with_block_duration(mut self, duration: Duration) -> Self {
        self.block_duration = duration;
        self
    }

    /// Set the key namespace.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Replace the ceiling, keeping everything else. Zero is raised to one.
    pub fn with_max(mut self, max: u64) -> Self {
        self.max = max.max(1);
        self
    }

    /// Replace the window, keeping everything else. A zero window is ignored.
    pub fn with_window(mut self, window: Duration) -> Self {
        if !window.is_zero() {
            self.window = window;
        }
        self
    }

    /// Get the maximum hits allowed per window.
    pub fn max(&self) -> u64 {
        self.max
    }

    /// Get the window duration.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Get the block duration.
    pub fn block_duration(&self) -> Duration {
        self.block_duration
    }

    /// Whether violations lead to a block.
    pub fn blocks(&self) -> bool {
        !self.block_duration.is_zero()
    }

    /// Get the key prefix.
    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    /// Smallest even spacing between hits, `window / max`.
    pub fn spacing(&self) -> Duration {
        self.window / u32::try_from(self.max.max(1)).unwrap_or(u32::MAX)
    }
}

impl Default for Quota {
    fn default() -> Self {
        Self::per_minute(100)
    }
}

/// Builder for creating quotas with validation.
#[derive(Debug, Default)]
pub struct QuotaBuilder {
    max: Option<u64>,
    window: Option<Duration>,
    block_duration: Option<Duration>,
    key_prefix: Option<String>,
}

impl QuotaBuilder {
    /// Create a new quota builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum hits per window.
    pub fn max(mut self, n: u64) -> Self {
        self.max = Some(n);
        self
    }

    /// Set the window duration.
    pub fn window(mut self, duration: Duration) -> Self {
        self.window = Some(duration);
        self
    }

    /// Set the block duration.
    pub fn block_duration(mut self, duration: Duration) -> Self {
        self.block_duration = Some(duration);
        self
    }

    /// Set the key prefix.
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// Build the quota, returning an error if invalid.
    pub fn build(self) -> Result<Quota> {
        let max = self.max.ok_or_else(|| ConfigError::MissingRequired("max".into()))?;
        let window = self
            .window
            .ok_or_else(|| ConfigError::MissingRequired("window".into()))?;

        let mut quota = Quota::try_new(max, window)?;

        if let Some(duration) = self.block_duration {
            quota = quota.with_block_duration(duration);
        }
        if let Some(prefix) = self.key_prefix {
            if prefix.is_empty() {
                return Err(ConfigError::InvalidQuota("key prefix must not be empty".into()).into());
            }
            quota = quota.with_key_prefix(prefix);
        }

        Ok(quota)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_per_minute() {
        let quota = Quota::per_minute(60);
        assert_eq!(quota.max(), 60);
        assert_eq!(quota.window(), Duration::from_secs(60));
        assert_eq!(quota.key_prefix(), "rl");
        assert!(!quota.blocks());
    }

    #[test]
    fn test_quota_overrides() {
        let quota = Quota::per_minute(100)
            .with_block_duration(Duration::from_secs(30))
            .with_max(0)
            .with_window(Duration::ZERO);
        assert_eq!(quota.max(), 1);
        assert_eq!(quota.window(), Duration::from_secs(60));
        assert!(quota.blocks());
    }

    #[test]
    fn test_quota_spacing() {
        assert_eq!(Quota::per_second(10).spacing(), Duration::from_millis(100));
    }

    #[test]
    fn test_quota_builder() {
        let quota = QuotaBuilder::new()
            .max(5)
            .window(Duration::from_secs(900))
            .block_duration(Duration::from_secs(3600))
            .key_prefix("auth")
            .build()
            .unwrap();

        assert_eq!(quota.max(), 5);
        assert_eq!(quota.block_duration(), Duration::from_secs(3600));
        assert_eq!(quota.key_prefix(), "auth");
    }

    #[test]
    fn test_quota_builder_rejects_invalid() {
        assert!(QuotaBuilder::new().max(100).build().is_err());
        assert!(QuotaBuilder::new().window(Duration::from_secs(60)).build().is_err());
        assert!(QuotaBuilder::new().max(0).window(Duration::from_secs(60)).build().is_err());
        assert!(
            QuotaBuilder::new()
                .max(1)
                .window(Duration::from_secs(1))
                .key_prefix("")
                .build()
                .is_err()
        );
    }

    #[test]
    #[should_panic]
    fn test_quota_zero_max_panics() {
        Quota::new(0, Duration::from_secs(60));
    }
}

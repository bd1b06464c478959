//! Limiter configuration.
//!
//! Every field has a default, so a config file only names what it changes:
//!
//! ```json
//! { "window_ms": 900000, "max": 5, "block_duration_ms": 3600000,
//!   "key_strategy": { "composite": { "field": "email" } }, "key_prefix": "auth" }
//! ```
//!
//! Validation runs once when the limiter is built; a bad configuration is a
//! startup error, never a per-request one.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::extensions::DEFAULT_MESSAGE;
use crate::headers::HeaderStyle;
use crate::key::KeyStrategy;
use crate::quota::{DEFAULT_KEY_PREFIX, Quota};

/// Options for one mounted limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterConfig {
    /// Window length in milliseconds.
    pub window_ms: u64,
    /// Hits per window. With `enable_distributed`, the ceiling for the
    /// whole cluster.
    pub max: u64,
    /// How keys are derived.
    pub key_strategy: KeyStrategy,
    /// Namespace for this limiter's keys.
    pub key_prefix: String,
    /// Read the caller address from `X-Forwarded-For`. Only safe behind a
    /// proxy that overwrites the header.
    pub trust_proxy: bool,
    /// Cool-down after the first violation in a window. Zero means none.
    pub block_duration_ms: u64,
    /// Emit `RateLimit-*` headers.
    pub standard_headers: bool,
    /// Emit `X-RateLimit-*` headers.
    pub legacy_headers: bool,
    /// Refund hits whose response status is below 400.
    pub skip_successful_requests: bool,
    /// Refund hits whose response status is 400 or above.
    pub skip_failed_requests: bool,
    /// Divide `max` across live cluster nodes.
    pub enable_distributed: bool,
    /// This process's node id. A random UUID when absent.
    pub node_id: Option<String>,
    /// Message in the rejection body.
    pub message: String,
    /// Space admitted hits evenly across the window.
    pub execute_evenly: bool,
    /// HTTP status for requests under a live block.
    pub blocked_status: u16,
    /// Time budget of each quota resolver step, in milliseconds.
    pub resolver_timeout_ms: u64,
    /// Largest request body buffered for key derivation and cost scoring.
    pub buffer_body_limit: usize,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            window_ms: 60_000,
            max: 100,
            key_strategy: KeyStrategy::Ip,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            trust_proxy: false,
            block_duration_ms: 0,
            standard_headers: true,
            legacy_headers: false,
            skip_successful_requests: false,
            skip_failed_requests: false,
            enable_distributed: false,
            node_id: None,
            message: DEFAULT_MESSAGE.to_string(),
            execute_evenly: false,
            blocked_status: 403,
            resolver_timeout_ms: 100,
            buffer_body_limit: 64 * 1024,
        }
    }
}

impl LimiterConfig {
    /// Default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ConfigError::InvalidQuota(format!("unreadable configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values no request could be served with.
    pub fn validate(&self) -> Result<()> {
        if self.max == 0 {
            return Err(ConfigError::InvalidQuota("max must be greater than 0".into()).into());
        }
        if self.window_ms == 0 {
            return Err(ConfigError::InvalidQuota("window_ms must be greater than 0".into()).into());
        }
        if self.key_prefix.is_empty() {
            return Err(ConfigError::InvalidKeyStrategy("key_prefix must not be empty".into()).into());
        }
        if let KeyStrategy::Composite { field } = &self.key_strategy {
            if field.trim().is_empty() {
                return Err(ConfigError::InvalidKeyStrategy(
                    "composite strategy needs a body field".into(),
                )
                .into());
            }
        }
        if !(400..=599).contains(&self.blocked_status) {
            return Err(ConfigError::InvalidResponse(format!(
                "blocked_status {} is not an error status",
                self.blocked_status
            ))
            .into());
        }
        Ok(())
    }

    /// The configured window.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// The static quota this configuration describes.
    pub fn quota(&self) -> Result<Quota> {
        Ok(Quota::try_new(self.max, self.window())?
            .with_block_duration(Duration::from_millis(self.block_duration_ms))
            .with_key_prefix(self.key_prefix.clone()))
    }

    /// The header sets to emit.
    pub fn header_style(&self) -> HeaderStyle {
        HeaderStyle {
            standard: self.standard_headers,
            legacy: self.legacy_headers,
        }
    }

    /// Resolver step budget.
    pub fn resolver_timeout(&self) -> Duration {
        Duration::from_millis(self.resolver_timeout_ms)
    }
}

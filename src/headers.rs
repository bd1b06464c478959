//! HTTP headers for rate limiting.
//!
//! Two header sets can be emitted, separately or together:
//! - standard: `RateLimit-Limit`, `RateLimit-Remaining`, `RateLimit-Reset`
//!   (seconds until reset) and `RateLimit-Policy` (`"{max};w={seconds}"`)
//! - legacy: `X-RateLimit-Limit`, `X-RateLimit-Remaining` and
//!   `X-RateLimit-Reset` (Unix epoch second of the reset)
//!
//! `Retry-After` is added to every rejection whatever the style.

use serde::{Deserialize, Serialize};

use crate::decision::{RateLimitInfo, Verdict};

/// Header names.
pub mod names {
    /// Maximum requests allowed per window.
    pub const RATE_LIMIT_LIMIT: &str = "RateLimit-Limit";

    /// Remaining requests in current window.
    pub const RATE_LIMIT_REMAINING: &str = "RateLimit-Remaining";

    /// Seconds until the rate limit resets.
    pub const RATE_LIMIT_RESET: &str = "RateLimit-Reset";

    /// Quota in effect, `"{max};w={window seconds}"`.
    pub const RATE_LIMIT_POLICY: &str = "RateLimit-Policy";

    /// Legacy limit header.
    pub const X_RATE_LIMIT_LIMIT: &str = "X-RateLimit-Limit";

    /// Legacy remaining header.
    pub const X_RATE_LIMIT_REMAINING: &str = "X-RateLimit-Remaining";

    /// Legacy reset header, as a Unix epoch second.
    pub const X_RATE_LIMIT_RESET: &str = "X-RateLimit-Reset";

    /// Seconds until the client should retry (standard HTTP header).
    pub const RETRY_AFTER: &str = "Retry-After";
}

/// Which header sets to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderStyle {
    /// Emit the `RateLimit-*` set.
    pub standard: bool,
    /// Emit the `X-RateLimit-*` set.
    pub legacy: bool,
}

impl Default for HeaderStyle {
    fn default() -> Self {
        Self::standard()
    }
}

impl HeaderStyle {
    /// Standard headers only.
    pub fn standard() -> Self {
        Self {
            standard: true,
            legacy: false,
        }
    }

    /// Legacy headers only.
    pub fn legacy() -> Self {
        Self {
            standard: false,
            legacy: true,
        }
    }

    /// Both sets.
    pub fn both() -> Self {
        Self {
            standard: true,
            legacy: true,
        }
    }

    /// No limit headers; `Retry-After` is still sent on rejections.
    pub fn none() -> Self {
        Self {
            standard: false,
            legacy: false,
        }
    }
}

/// Builder for rate limit headers.
#[derive(Debug, Default)]
pub struct RateLimitHeaders {
    limit: Option<u64>,
    remaining: Option<u64>,
    reset: Option<u64>,
    reset_epoch: Option<u64>,
    policy: Option<String>,
    retry_after: Option<u64>,
    style: HeaderStyle,
}

impl RateLimitHeaders {
    /// Create a new header builder emitting standard headers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Choose the header sets.
    pub fn style(mut self, style: HeaderStyle) -> Self {
        self.style = style;
        self
    }

    /// Set the limit header.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the remaining header.
    pub fn remaining(mut self, remaining: u64) -> Self {
        self.remaining = Some(remaining);
        self
    }

    /// Set the reset as seconds from now and as an epoch second.
    pub fn reset(mut self, reset_seconds: u64, reset_epoch: u64) -> Self {
        self.reset = Some(reset_seconds);
        self.reset_epoch = Some(reset_epoch);
        self
    }

    /// Set the policy header.
    pub fn policy(mut self, policy: impl Into<String>) -> Self {
        self.policy = Some(policy.into());
        self
    }

    /// Set the retry-after header (seconds until retry).
    pub fn retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    /// Headers for a verdict in the given style.
    pub fn for_verdict(verdict: &Verdict, style: HeaderStyle) -> Self {
        let mut headers = Self::from(verdict.info()).style(style);
        if verdict.is_allowed() {
            headers.retry_after = None;
        }
        headers
    }

    /// Convert to a vector of (name, value) pairs.
    pub fn to_vec(&self) -> Vec<(&'static str, String)> {
        let mut headers = Vec::new();

        if self.style.standard {
            if let Some(limit) = self.limit {
                headers.push((names::RATE_LIMIT_LIMIT, limit.to_string()));
            }
            if let Some(remaining) = self.remaining {
                headers.push((names::RATE_LIMIT_REMAINING, remaining.to_string()));
            }
            if let Some(reset) = self.reset {
                headers.push((names::RATE_LIMIT_RESET, reset.to_string()));
            }
            if let Some(ref policy) = self.policy {
                headers.push((names::RATE_LIMIT_POLICY, policy.clone()));
            }
        }
        if self.style.legacy {
            if let Some(limit) = self.limit {
                headers.push((names::X_RATE_LIMIT_LIMIT, limit.to_string()));
            }
            if let Some(remaining) = self.remaining {
                headers.push((names::X_RATE_LIMIT_REMAINING, remaining.to_string()));
            }
            if let Some(reset_epoch) = self.reset_epoch {
                headers.push((names::X_RATE_LIMIT_RESET, reset_epoch.to_string()));
            }
        }
        if let Some(retry_after) = self.retry_after {
            headers.push((names::RETRY_AFTER, retry_after.to_string()));
        }

        headers
    }
}

impl From<&RateLimitInfo> for RateLimitHeaders {
    fn from(info: &RateLimitInfo) -> Self {
        let mut headers = Self::new()
            .limit(info.limit)
            .remaining(info.remaining)
            .reset(info.reset_seconds(), info.reset_epoch_seconds())
            .policy(info.policy());

        if info.retry_after.is_some() {
            headers = headers.retry_after(info.retry_after_seconds());
        }

        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn info(retry_after: Option<Duration>) -> RateLimitInfo {
        RateLimitInfo {
            limit: 5,
            remaining: 0,
            current: 6,
            window: Duration::from_secs(60),
            reset_at_ms: 1_700_000_042_000,
            reset_after: Duration::from_millis(41_200),
            retry_after,
        }
    }

    fn value<'a>(headers: &'a [(&'static str, String)], name: &str) -> Option<&'a str> {
        headers.iter().find(|(k, _)| *k == name).map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_standard_headers() {
        let headers = RateLimitHeaders::from(&info(None)).to_vec();

        assert_eq!(headers.len(), 4);
        assert_eq!(value(&headers, "RateLimit-Limit"), Some("5"));
        assert_eq!(value(&headers, "RateLimit-Remaining"), Some("0"));
        assert_eq!(value(&headers, "RateLimit-Reset"), Some("42"));
        assert_eq!(value(&headers, "RateLimit-Policy"), Some("5;w=60"));
        assert_eq!(value(&headers, "X-RateLimit-Limit"), None);
    }

    #[test]
    fn test_legacy_headers_use_epoch_reset() {
        let headers = RateLimitHeaders::from(&info(None))
            .style(HeaderStyle::legacy())
            .to_vec();

        assert_eq!(headers.len(), 3);
        assert_eq!(value(&headers, "X-RateLimit-Limit"), Some("5"));
        assert_eq!(value(&headers, "X-RateLimit-Reset"), Some("1700000042"));
        assert_eq!(value(&headers, "RateLimit-Limit"), None);
    }

    #[test]
    fn test_both_styles_and_retry_after() {
        let verdict = Verdict::limit_exceeded("k", info(Some(Duration::from_millis(41_200))));
        let headers = RateLimitHeaders::for_verdict(&verdict, HeaderStyle::both()).to_vec();

        assert_eq!(headers.len(), 8);
        assert_eq!(value(&headers, "Retry-After"), Some("42"));
    }

    #[test]
    fn test_retry_after_survives_no_style() {
        let verdict = Verdict::blocked("k", info(Some(Duration::from_secs(1800))));
        let headers = RateLimitHeaders::for_verdict(&verdict, HeaderStyle::none()).to_vec();
        assert_eq!(headers, vec![("Retry-After", "1800".to_string())]);
    }
}

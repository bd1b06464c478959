//! Per-request extension and the rejection body.
//!
//! Admitted requests carry a [`RateLimitExt`] so handlers can see the limit
//! state. Rejected requests are answered with a [`RejectionBody`]:
//!
//! ```json
//! {"error":{"code":"RATE_LIMIT_EXCEEDED","message":"Too many requests","retryAfterSec":42,"limit":5,"current":6}}
//! ```
//!
//! # Example
//!
//! ```ignore
//! use axum::Extension;
//! use flowgate::extensions::RateLimitExt;
//!
//! async fn handler(Extension(rate_limit): Extension<RateLimitExt>) {
//!     println!("Remaining: {}", rate_limit.remaining);
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::decision::{RejectionKind, Verdict};
use crate::quota::Quota;

/// Message used when none is configured.
pub const DEFAULT_MESSAGE: &str = "Too many requests, please try again later.";

/// Rate limit state attached to an admitted request.
#[derive(Debug, Clone)]
pub struct RateLimitExt {
    /// The key used for rate limiting this request.
    pub key: String,
    /// The quota applied to this request.
    pub quota: Quota,
    /// The verdict.
    pub verdict: Verdict,
    /// Remaining requests in the current window.
    pub remaining: u64,
    /// Maximum requests allowed.
    pub limit: u64,
    /// Seconds until reset.
    pub reset_seconds: u64,
}

impl RateLimitExt {
    /// Create a new rate limit extension from a verdict.
    pub fn new(quota: Quota, verdict: Verdict) -> Self {
        let info = verdict.info();
        Self {
            key: verdict.key().to_string(),
            remaining: info.remaining,
            limit: info.limit,
            reset_seconds: info.reset_seconds(),
            quota,
            verdict,
        }
    }

    /// Check if the request was allowed.
    pub fn is_allowed(&self) -> bool {
        self.verdict.is_allowed()
    }
}

/// Inner object of the rejection body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectionError {
    /// `RATE_LIMIT_EXCEEDED` or `TEMPORARILY_BLOCKED`.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Seconds to wait before retrying.
    pub retry_after_sec: u64,
    /// Ceiling for the window.
    pub limit: u64,
    /// Hits recorded in the window.
    pub current: u64,
}

/// JSON body sent with a rejection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionBody {
    /// The error object.
    pub error: RejectionError,
}

impl RejectionBody {
    /// Build the body for a rejected verdict. `None` if it was admitted.
    pub fn from_verdict(verdict: &Verdict, message: &str) -> Option<Self> {
        let kind = verdict.rejection()?;
        let info = verdict.info();
        Some(Self {
            error: RejectionError {
                code: kind.code().to_string(),
                message: message.to_string(),
                retry_after_sec: info.retry_after_seconds(),
                limit: info.limit,
                current: info.current,
            },
        })
    }

    /// The rejection kind named by the code.
    pub fn kind(&self) -> Option<RejectionKind> {
        match self.error.code.as_str() {
            "RATE_LIMIT_EXCEEDED" => Some(RejectionKind::LimitExceeded),
            "TEMPORARILY_BLOCKED" => Some(RejectionKind::TemporarilyBlocked),
            _ => None,
        }
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> String {
        // A struct of strings and integers always serializes.
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::RateLimitInfo;
    use std::time::Duration;

    fn info(current: u64, retry_after: Option<Duration>) -> RateLimitInfo {
        RateLimitInfo {
            limit: 5,
            remaining: 5u64.saturating_sub(current),
            current,
            window: Duration::from_secs(60),
            reset_at_ms: 60_000,
            reset_after: Duration::from_secs(60),
            retry_after,
        }
    }

    #[test]
    fn test_rate_limit_ext() {
        let verdict = Verdict::allowed("rl:user:123", info(2, None));
        let ext = RateLimitExt::new(Quota::per_minute(5), verdict);

        assert!(ext.is_allowed());
        assert_eq!(ext.key, "rl:user:123");
        assert_eq!(ext.remaining, 3);
        assert_eq!(ext.limit, 5);
        assert_eq!(ext.reset_seconds, 60);
    }

    #[test]
    fn test_rejection_body_shape() {
        let verdict = Verdict::limit_exceeded("k", info(6, Some(Duration::from_secs(60))));
        let body = RejectionBody::from_verdict(&verdict, DEFAULT_MESSAGE).unwrap();

        let json: serde_json::Value = serde_json::from_str(&body.to_json()).unwrap();
        assert_eq!(json["error"]["code"], "RATE_LIMIT_EXCEEDED");
        assert_eq!(json["error"]["retryAfterSec"], 60);
        assert_eq!(json["error"]["limit"], 5);
        assert_eq!(json["error"]["current"], 6);
        assert_eq!(json["error"]["message"], DEFAULT_MESSAGE);
    }

    #[test]
    fn test_rejection_body_for_block() {
        let verdict = Verdict::blocked("k", info(6, Some(Duration::from_secs(1800))));
        let body = RejectionBody::from_verdict(&verdict, "blocked").unwrap();
        assert_eq!(body.kind(), Some(RejectionKind::TemporarilyBlocked));
        assert_eq!(body.error.retry_after_sec, 1800);
    }

    #[test]
    fn test_no_body_for_admitted() {
        let verdict = Verdict::allowed("k", info(1, None));
        assert!(RejectionBody::from_verdict(&verdict, DEFAULT_MESSAGE).is_none());
    }
}

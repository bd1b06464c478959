//! Verdict types for admission results.
//!
//! Every check produces a [`Verdict`]: whether the request may proceed, and
//! the limit state the caller is told about through headers or the
//! rejection body.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What the limiter decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Within the limit.
    Allowed,
    /// Over the limit for the current window.
    LimitExceeded,
    /// The key is serving a cool-down after an earlier violation.
    Blocked,
}

/// Why a request was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectionKind {
    /// Over the limit for the current window.
    LimitExceeded,
    /// Under a live block.
    TemporarilyBlocked,
}

impl RejectionKind {
    /// Machine-readable code for the rejection body.
    pub fn code(&self) -> &'static str {
        match self {
            Self::LimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::TemporarilyBlocked => "TEMPORARILY_BLOCKED",
        }
    }
}

/// Limit state reported alongside a verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitInfo {
    /// Ceiling for the window.
    pub limit: u64,
    /// Hits left in the window.
    pub remaining: u64,
    /// Hits recorded in the window, this one included.
    pub current: u64,
    /// Window length.
    pub window: Duration,
    /// When the window resets (Unix milliseconds).
    pub reset_at_ms: u64,
    /// Time from the decision until the window resets.
    pub reset_after: Duration,
    /// How long to wait before retrying; set on rejections.
    pub retry_after: Option<Duration>,
}

impl RateLimitInfo {
    /// Seconds until the window resets, rounded up.
    pub fn reset_seconds(&self) -> u64 {
        ceil_secs(self.reset_after)
    }

    /// Reset instant as a Unix epoch second, rounded up.
    pub fn reset_epoch_seconds(&self) -> u64 {
        self.reset_at_ms.div_ceil(1000)
    }

    /// Retry delay in whole seconds, rounded up. Zero when not set.
    pub fn retry_after_seconds(&self) -> u64 {
        self.retry_after.map(ceil_secs).unwrap_or(0)
    }

    /// The `RateLimit-Policy` value, `"{limit};w={window seconds}"`.
    pub fn policy(&self) -> String {
        format!("{};w={}", self.limit, self.window.as_secs())
    }
}

/// Round a duration up to whole seconds.
pub(crate) fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 { secs + 1 } else { secs }
}

/// The result of an admission check.
#[derive(Debug, Clone)]
pub struct Verdict {
    outcome: Outcome,
    info: RateLimitInfo,
    key: String,
    /// Whether this request took a slot in the window.
    counted: bool,
    /// Start of the window the slot was taken in (Unix milliseconds).
    window_started_at: Option<u64>,
    /// Pacing delay applied before admitting.
    delay: Option<Duration>,
}

impl Verdict {
    /// A request that took a slot and is within the limit.
    pub fn allowed(key: impl Into<String>, info: RateLimitInfo) -> Self {
        Self::new(Outcome::Allowed, key, info, true)
    }

    /// A request that took a slot and broke the limit.
    pub fn limit_exceeded(key: impl Into<String>, info: RateLimitInfo) -> Self {
        Self::new(Outcome::LimitExceeded, key, info, true)
    }

    /// A request turned away by a live block without being counted.
    pub fn blocked(key: impl Into<String>, info: RateLimitInfo) -> Self {
        Self::new(Outcome::Blocked, key, info, false)
    }

    /// A request admitted without being counted, because the limiter could
    /// not reach any store.
    pub fn unchecked(key: impl Into<String>, info: RateLimitInfo) -> Self {
        Self::new(Outcome::Allowed, key, info, false)
    }

    fn new(outcome: Outcome, key: impl Into<String>, info: RateLimitInfo, counted: bool) -> Self {
        Self {
            outcome,
            info,
            key: key.into(),
            counted,
            window_started_at: None,
            delay: None,
        }
    }

    /// Record which window the slot was taken in.
    pub fn in_window(mut self, window_started_at: u64) -> Self {
        self.window_started_at = Some(window_started_at);
        self
    }

    /// Record a pacing delay.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// What was decided.
    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    /// Check if the request is allowed.
    pub fn is_allowed(&self) -> bool {
        self.outcome == Outcome::Allowed
    }

    /// Check if the request is denied.
    pub fn is_denied(&self) -> bool {
        !self.is_allowed()
    }

    /// Why the request was denied, if it was.
    pub fn rejection(&self) -> Option<RejectionKind> {
        match self.outcome {
            Outcome::Allowed => None,
            Outcome::LimitExceeded => Some(RejectionKind::LimitExceeded),
            Outcome::Blocked => Some(RejectionKind::TemporarilyBlocked),
        }
    }

    /// Get the rate limit info.
    pub fn info(&self) -> &RateLimitInfo {
        &self.info
    }

    /// The namespaced key the request was counted under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether the request took a slot that a skip policy could refund.
    pub fn counted(&self) -> bool {
        self.counted
    }

    /// Start of the window this request was counted in, if it was.
    pub fn window_started_at(&self) -> Option<u64> {
        self.window_started_at
    }

    /// Pacing delay applied before admitting, if any.
    pub fn delay(&self) -> Option<Duration> {
        self.delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(limit: u64, current: u64) -> RateLimitInfo {
        RateLimitInfo {
            limit,
            remaining: limit.saturating_sub(current),
            current,
            window: Duration::from_secs(60),
            reset_at_ms: 1_700_000_059_500,
            reset_after: Duration::from_millis(59_500),
            retry_after: None,
        }
    }

    #[test]
    fn test_verdict_allowed() {
        let verdict = Verdict::allowed("rl:ip:1.2.3.4", info(100, 1)).in_window(1_700_000_000_000);

        assert!(verdict.is_allowed());
        assert!(verdict.counted());
        assert_eq!(verdict.window_started_at(), Some(1_700_000_000_000));
        assert_eq!(verdict.rejection(), None);
        assert_eq!(verdict.info().remaining, 99);
    }

    #[test]
    fn test_verdict_rejections() {
        let exceeded = Verdict::limit_exceeded("k", info(5, 6));
        assert!(exceeded.is_denied());
        assert!(exceeded.counted());
        assert_eq!(exceeded.rejection().map(|r| r.code()), Some("RATE_LIMIT_EXCEEDED"));

        let blocked = Verdict::blocked("k", info(5, 6));
        assert!(!blocked.counted());
        assert_eq!(blocked.window_started_at(), None);
        assert_eq!(blocked.rejection().map(|r| r.code()), Some("TEMPORARILY_BLOCKED"));
    }

    #[test]
    fn test_info_rounding() {
        let mut info = info(5, 1);
        assert_eq!(info.reset_seconds(), 60);
        assert_eq!(info.reset_epoch_seconds(), 1_700_000_060);
        assert_eq!(info.retry_after_seconds(), 0);

        info.retry_after = Some(Duration::from_millis(1_800_001));
        assert_eq!(info.retry_after_seconds(), 1801);
        assert_eq!(info.policy(), "5;w=60");
    }
}

//! Response-time refund policies.
//!
//! Counting happens before the handler runs, so the status is not known
//! yet. A policy looks at the status afterwards and decides whether the hit
//! should be taken back:
//! - [`SkipSuccessful`]: responses below 400 do not count
//! - [`SkipFailed`]: responses of 400 and above do not count
//!
//! Only admitted, counted requests are ever refunded; the limiter's own
//! rejections always count.
//!
//! # Example
//!
//! ```ignore
//! use flowgate::policy::SkipSuccessful;
//!
//! // Failed logins count, successful ones don't
//! let policy = SkipSuccessful::new();
//! ```

use crate::decision::Verdict;

/// Decides whether a counted hit is refunded once the response is known.
pub trait Policy: Send + Sync + 'static {
    /// Whether the hit behind `verdict` should be refunded.
    fn on_response(&self, status_code: u16, verdict: &Verdict) -> bool;

    /// Get the policy name for logging.
    fn name(&self) -> &'static str;
}

/// Every hit counts.
#[derive(Debug, Clone, Default)]
pub struct DefaultPolicy;

impl DefaultPolicy {
    /// Create a new default policy.
    pub fn new() -> Self {
        Self
    }
}

impl Policy for DefaultPolicy {
    fn on_response(&self, _status_code: u16, _verdict: &Verdict) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "default"
    }
}

/// Refund hits whose response succeeded (status below 400).
#[derive(Debug, Clone, Default)]
pub struct SkipSuccessful;

impl SkipSuccessful {
    /// Create a new skip-successful policy.
    pub fn new() -> Self {
        Self
    }
}

impl Policy for SkipSuccessful {
    fn on_response(&self, status_code: u16, verdict: &Verdict) -> bool {
        refundable(verdict) && status_code < 400
    }

    fn name(&self) -> &'static str {
        "skip_successful"
    }
}

/// Refund hits whose response failed (status 400 and above).
#[derive(Debug, Clone, Default)]
pub struct SkipFailed;

impl SkipFailed {
    /// Create a new skip-failed policy.
    pub fn new() -> Self {
        Self
    }
}

impl Policy for SkipFailed {
    fn on_response(&self, status_code: u16, verdict: &Verdict) -> bool {
        refundable(verdict) && status_code >= 400
    }

    fn name(&self) -> &'static str {
        "skip_failed"
    }
}

fn refundable(verdict: &Verdict) -> bool {
    verdict.is_allowed() && verdict.counted()
}

/// Refund when any member policy does.
#[derive(Default)]
pub struct CompositePolicy {
    policies: Vec<Box<dyn Policy>>,
}

impl std::fmt::Debug for CompositePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.policies.iter().map(|p| p.name()).collect();
        f.debug_struct("CompositePolicy").field("policies", &names).finish()
    }
}

impl CompositePolicy {
    /// Create a new composite policy.
    pub fn new() -> Self {
        Self {
            policies: Vec::new(),
        }
    }

    /// Add a policy.
    pub fn with<P: Policy>(mut self, policy: P) -> Self {
        self.policies.push(Box::new(policy));
        self
    }

    /// Whether no policy was added.
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

impl Policy for CompositePolicy {
    fn on_response(&self, status_code: u16, verdict: &Verdict) -> bool {
        self.policies
            .iter()
            .any(|p| p.on_response(status_code, verdict))
    }

    fn name(&self) -> &'static str {
        "composite"
    }
}

/// Build the policy matching the two skip flags.
pub fn skip_policy(skip_successful: bool, skip_failed: bool) -> Box<dyn Policy> {
    match (skip_successful, skip_failed) {
        (false, false) => Box::new(DefaultPolicy::new()),
        (true, false) => Box::new(SkipSuccessful::new()),
        (false, true) => Box::new(SkipFailed::new()),
        (true, true) => Box::new(CompositePolicy::new().with(SkipSuccessful::new()).with(SkipFailed::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::RateLimitInfo;
    use std::time::Duration;

    fn info() -> RateLimitInfo {
        RateLimitInfo {
            limit: 5,
            remaining: 4,
            current: 1,
            window: Duration::from_secs(60),
            reset_at_ms: 60_000,
            reset_after: Duration::from_secs(60),
            retry_after: None,
        }
    }

    #[test]
    fn test_default_policy() {
        let policy = DefaultPolicy::new();
        assert!(!policy.on_response(200, &Verdict::allowed("k", info())));
        assert_eq!(policy.name(), "default");
    }

    #[test]
    fn test_skip_successful() {
        let policy = SkipSuccessful::new();
        let verdict = Verdict::allowed("k", info());

        assert!(policy.on_response(200, &verdict));
        assert!(policy.on_response(304, &verdict));
        assert!(!policy.on_response(401, &verdict));
        assert!(!policy.on_response(500, &verdict));
    }

    #[test]
    fn test_skip_failed() {
        let policy = SkipFailed::new();
        let verdict = Verdict::allowed("k", info());

        assert!(!policy.on_response(201, &verdict));
        assert!(policy.on_response(404, &verdict));
        assert!(policy.on_response(503, &verdict));
    }

    #[test]
    fn test_rejections_and_uncounted_hits_are_never_refunded() {
        let policy = skip_policy(true, true);

        assert!(!policy.on_response(429, &Verdict::limit_exceeded("k", info())));
        assert!(!policy.on_response(403, &Verdict::blocked("k", info())));
        assert!(!policy.on_response(200, &Verdict::unchecked("k", info())));
        assert!(policy.on_response(200, &Verdict::allowed("k", info())));
    }
}

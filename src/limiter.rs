//! The limiter context object.
//!
//! A [`RateLimiter`] owns everything one mounted limit needs: the store, the
//! key extractor, the base quota and its resolver chain, the optional
//! cluster coordinator and the response settings. Nothing is global, so
//! several limiters with different settings can share one process and one
//! store.
//!
//! Per request the limiter runs:
//! key derivation, quota resolution (with fair division when distributed),
//! the block check, then the counter increment. Any store failure on that
//! path admits the request.
//!
//! # Example
//!
//! ```ignore
//! use flowgate::{MemoryStorage, Quota, RateLimiter, RequestInfo};
//! use std::time::Duration;
//!
//! let limiter = RateLimiter::builder(MemoryStorage::new())
//!     .quota(Quota::per_minute(5).with_block_duration(Duration::from_secs(3600)))
//!     .key_prefix("auth")
//!     .build()?;
//!
//! let verdict = limiter.check(&RequestInfo::new("POST", "/login")).await;
//! if verdict.is_denied() {
//!     let status = limiter.rejection_status(&verdict);
//!     let body = limiter.rejection_body(&verdict);
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::algorithm::{Algorithm, FixedWindow};
use crate::block::BlockTracker;
use crate::clock::{SharedClock, system_clock};
use crate::config::LimiterConfig;
use crate::coordinator::{Coordinator, CoordinatorConfig};
use crate::decision::{RateLimitInfo, RejectionKind, Verdict};
use crate::error::{ConfigError, RateLimitError, Result};
use crate::extensions::{DEFAULT_MESSAGE, RejectionBody};
use crate::headers::{HeaderStyle, RateLimitHeaders};
use crate::key::{CompositeKey, Key, KeyStrategy, PathKey, SharedKey, derive_key};
use crate::policy::{Policy, skip_policy};
use crate::quota::Quota;
use crate::request::RequestInfo;
use crate::resolver::{QuotaResolver, ResolverChain};
use crate::storage::{BlockRecord, Storage};

/// Status sent for over-limit rejections.
pub const LIMIT_EXCEEDED_STATUS: u16 = 429;

/// Default status for requests under a live block.
pub const DEFAULT_BLOCKED_STATUS: u16 = 403;

/// Default cap on buffered request bodies.
pub const DEFAULT_BUFFER_BODY_LIMIT: usize = 64 * 1024;

/// Fixed-window admission over a [`Storage`].
pub struct RateLimiter<S: Storage> {
    storage: Arc<S>,
    algorithm: FixedWindow,
    blocks: BlockTracker,
    key: SharedKey,
    quota: Quota,
    resolvers: ResolverChain,
    coordinator: Option<Arc<Coordinator<S>>>,
    policy: Box<dyn Policy>,
    clock: SharedClock,
    header_style: HeaderStyle,
    message: String,
    blocked_status: u16,
    buffer_body_limit: usize,
}

impl<S: Storage> std::fmt::Debug for RateLimiter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("backend", &self.storage.backend())
            .field("key", &self.key.name())
            .field("quota", &self.quota)
            .field("resolvers", &self.resolvers)
            .field("distributed", &self.coordinator.is_some())
            .field("policy", &self.policy.name())
            .field("execute_evenly", &self.algorithm.paces_evenly())
            .finish()
    }
}

impl<S: Storage> RateLimiter<S> {
    /// Start configuring a limiter over `storage`.
    pub fn builder(storage: S) -> RateLimiterBuilder<S> {
        RateLimiterBuilder::new(Arc::new(storage))
    }

    /// Start configuring a limiter over a store shared with other owners.
    pub fn builder_shared(storage: Arc<S>) -> RateLimiterBuilder<S> {
        RateLimiterBuilder::new(storage)
    }

    /// Build a limiter straight from a configuration.
    pub fn from_config(storage: S, config: &LimiterConfig) -> Result<Self> {
        Self::builder(storage).config(config).build()
    }

    /// The quota that applies to `request`.
    ///
    /// Runs the resolver chain over the base quota, then divides the ceiling
    /// by the cached live node count when distributed.
    pub async fn resolve_quota(&self, request: &RequestInfo) -> Quota {
        let quota = self.resolvers.resolve(request, &self.quota).await;
        match &self.coordinator {
            Some(coordinator) => {
                let share = quota.max() / coordinator.cached_node_count();
                quota.with_max(share)
            }
            None => quota,
        }
    }

    /// The namespaced bucket key for `request` under `quota`.
    pub fn key_for(&self, request: &RequestInfo, quota: &Quota) -> String {
        derive_key(&self.key, request, quota.key_prefix())
    }

    /// Decide on `request`, counting it, and return the quota that applied.
    ///
    /// Never fails: a store that cannot be reached admits the request
    /// without counting it.
    pub async fn evaluate(&self, request: &RequestInfo) -> (Quota, Verdict) {
        let quota = self.resolve_quota(request).await;
        let key = self.key_for(request, &quota);
        let now = self.clock.now_ms();

        match self.blocks.check(&*self.storage, &key).await {
            Ok(Some(block)) if block.is_active(now) => {
                let verdict = self.blocked_verdict(&key, &quota, &block, now).await;
                debug!(key = %key, retry_after_ms = block.remaining_ms(now), "request blocked");
                return (quota, verdict);
            }
            Ok(_) => {}
            Err(e) => warn!(key = %key, error = %e, "block check failed, continuing"),
        }

        let verdict = match self
            .algorithm
            .check_and_record(&*self.storage, &key, &quota, now)
            .await
        {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(key = %key, error = %e, "counter unavailable, admitting request");
                Verdict::unchecked(&key, fresh_info(&quota, now))
            }
        };

        if let Some(delay) = verdict.delay() {
            debug!(key = %key, delay_ms = delay.as_millis() as u64, "pacing admitted request");
            tokio::time::sleep(delay).await;
        }

        (quota, verdict)
    }

    /// Decide on `request`, counting it.
    pub async fn check(&self, request: &RequestInfo) -> Verdict {
        self.evaluate(request).await.1
    }

    /// Settle a verdict once the response status is known.
    ///
    /// Refunds the hit when the skip policy says so; returns whether it did.
    /// A hit whose window has since rolled over is not refunded.
    pub async fn complete(&self, verdict: &Verdict, status: u16) -> bool {
        let Some(window_start) = verdict.window_started_at() else {
            return false;
        };
        if !self.policy.on_response(status, verdict) {
            return false;
        }
        match self.storage.decrement(verdict.key(), window_start).await {
            Ok(Some(_)) => {
                debug!(key = %verdict.key(), status, policy = self.policy.name(), "hit refunded");
                true
            }
            Ok(None) => {
                debug!(key = %verdict.key(), status, "window rolled over, nothing to refund");
                false
            }
            Err(e) => {
                warn!(key = %verdict.key(), error = %e, "failed to refund hit");
                false
            }
        }
    }

    /// Headers to send with the response for `verdict`.
    pub fn response_headers(&self, verdict: &Verdict) -> Vec<(&'static str, String)> {
        RateLimitHeaders::for_verdict(verdict, self.header_style).to_vec()
    }

    /// HTTP status for a rejected verdict; `None` when it was admitted.
    pub fn rejection_status(&self, verdict: &Verdict) -> Option<u16> {
        verdict.rejection().map(|kind| match kind {
            RejectionKind::LimitExceeded => LIMIT_EXCEEDED_STATUS,
            RejectionKind::TemporarilyBlocked => self.blocked_status,
        })
    }

    /// JSON body for a rejected verdict; `None` when it was admitted.
    pub fn rejection_body(&self, verdict: &Verdict) -> Option<RejectionBody> {
        RejectionBody::from_verdict(verdict, &self.message)
    }

    /// Register this node and start its heartbeat. Does nothing unless
    /// distributed.
    pub async fn start(&self) -> Result<()> {
        if let Some(coordinator) = &self.coordinator {
            coordinator.register().await?;
            coordinator.start();
        }
        Ok(())
    }

    /// Stop the heartbeat and deregister this node.
    pub async fn shutdown(&self) -> Result<()> {
        match &self.coordinator {
            Some(coordinator) => coordinator.shutdown().await,
            None => Ok(()),
        }
    }

    /// The store.
    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// The base quota, before resolution.
    pub fn quota(&self) -> &Quota {
        &self.quota
    }

    /// The cluster coordinator, when distributed.
    pub fn coordinator(&self) -> Option<&Arc<Coordinator<S>>> {
        self.coordinator.as_ref()
    }

    /// The clock used for decisions.
    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Header sets emitted.
    pub fn header_style(&self) -> HeaderStyle {
        self.header_style
    }

    /// Largest body the middleware buffers.
    pub fn buffer_body_limit(&self) -> usize {
        self.buffer_body_limit
    }

    async fn blocked_verdict(&self, key: &str, quota: &Quota, block: &BlockRecord, now: u64) -> Verdict {
        // The window count is informational here; a failed read reports zero.
        let current = match self.algorithm.check(&*self.storage, key, quota, now).await {
            Ok(Some(info)) => info.current,
            _ => 0,
        };
        let remaining = Duration::from_millis(block.remaining_ms(now));
        Verdict::blocked(
            key,
            RateLimitInfo {
                limit: quota.max(),
                remaining: 0,
                current,
                window: quota.window(),
                reset_at_ms: block.blocked_until,
                reset_after: remaining,
                retry_after: Some(remaining),
            },
        )
    }
}

/// State reported when nothing could be counted.
fn fresh_info(quota: &Quota, now: u64) -> RateLimitInfo {
    let window = quota.window();
    RateLimitInfo {
        limit: quota.max(),
        remaining: quota.max(),
        current: 0,
        window,
        reset_at_ms: now.saturating_add(crate::clock::duration_ms(window)),
        reset_after: window,
        retry_after: None,
    }
}

/// Builder for [`RateLimiter`].
pub struct RateLimiterBuilder<S: Storage> {
    storage: Arc<S>,
    quota: Quota,
    key_prefix: Option<String>,
    strategy: KeyStrategy,
    trust_proxy: bool,
    per_route: bool,
    resolvers: ResolverChain,
    distributed: Option<CoordinatorConfig>,
    skip_successful: bool,
    skip_failed: bool,
    execute_evenly: bool,
    clock: Option<SharedClock>,
    header_style: HeaderStyle,
    message: String,
    blocked_status: u16,
    buffer_body_limit: usize,
    invalid: Option<RateLimitError>,
}

impl<S: Storage> RateLimiterBuilder<S> {
    fn new(storage: Arc<S>) -> Self {
        Self {
            storage,
            quota: Quota::default(),
            key_prefix: None,
            strategy: KeyStrategy::Ip,
            trust_proxy: false,
            per_route: false,
            resolvers: ResolverChain::new(),
            distributed: None,
            skip_successful: false,
            skip_failed: false,
            execute_evenly: false,
            clock: None,
            header_style: HeaderStyle::standard(),
            message: DEFAULT_MESSAGE.to_string(),
            blocked_status: DEFAULT_BLOCKED_STATUS,
            buffer_body_limit: DEFAULT_BUFFER_BODY_LIMIT,
            invalid: None,
        }
    }

    /// Apply every setting of a configuration.
    ///
    /// A configuration that fails validation makes [`build`](Self::build)
    /// return that error.
    pub fn config(mut self, config: &LimiterConfig) -> Self {
        if let Err(e) = config.validate() {
            self.invalid = Some(e);
        }
        self.quota = Quota::default()
            .with_max(config.max)
            .with_window(config.window())
            .with_block_duration(Duration::from_millis(config.block_duration_ms));
        self.key_prefix = Some(config.key_prefix.clone());
        self.strategy = config.key_strategy.clone();
        self.trust_proxy = config.trust_proxy;
        self.skip_successful = config.skip_successful_requests;
        self.skip_failed = config.skip_failed_requests;
        self.execute_evenly = config.execute_evenly;
        self.header_style = config.header_style();
        self.message = config.message.clone();
        self.blocked_status = config.blocked_status;
        self.buffer_body_limit = config.buffer_body_limit;
        self.resolvers = self.resolvers.with_step_timeout(config.resolver_timeout());
        self.distributed = config.enable_distributed.then(|| match &config.node_id {
            Some(id) => CoordinatorConfig::new().with_node_id(id.clone()),
            None => CoordinatorConfig::new(),
        });
        self
    }

    /// The base quota.
    pub fn quota(mut self, quota: Quota) -> Self {
        self.quota = quota;
        self
    }

    /// Namespace for this limiter's keys. Overrides the quota's prefix.
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// Derive keys with a configured strategy.
    pub fn key_strategy(mut self, strategy: KeyStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Derive keys with any extractor.
    pub fn key<K: Key<RequestInfo>>(mut self, key: K) -> Self {
        self.strategy = KeyStrategy::custom(key);
        self
    }

    /// Take the caller address from `X-Forwarded-For`. Only for limiters
    /// behind a proxy that sets the header itself.
    pub fn trust_proxy(mut self, enabled: bool) -> Self {
        self.trust_proxy = enabled;
        self
    }

    /// Count each path separately.
    pub fn per_route(mut self, enabled: bool) -> Self {
        self.per_route = enabled;
        self
    }

    /// Append a resolver step.
    pub fn resolver<R: QuotaResolver>(mut self, resolver: R) -> Self {
        self.resolvers = self.resolvers.with(resolver);
        self
    }

    /// Replace the resolver chain.
    pub fn resolvers(mut self, chain: ResolverChain) -> Self {
        self.resolvers = chain;
        self
    }

    /// Time budget of each resolver step.
    pub fn resolver_timeout(mut self, timeout: Duration) -> Self {
        self.resolvers = self.resolvers.with_step_timeout(timeout);
        self
    }

    /// Divide the ceiling across the live nodes of a cluster.
    pub fn distributed(mut self, config: CoordinatorConfig) -> Self {
        self.distributed = Some(config);
        self
    }

    /// Refund hits whose response status is below 400.
    pub fn skip_successful_requests(mut self, enabled: bool) -> Self {
        self.skip_successful = enabled;
        self
    }

    /// Refund hits whose response status is 400 or above.
    pub fn skip_failed_requests(mut self, enabled: bool) -> Self {
        self.skip_failed = enabled;
        self
    }

    /// Space admitted hits evenly across the window.
    pub fn execute_evenly(mut self, enabled: bool) -> Self {
        self.execute_evenly = enabled;
        self
    }

    /// Use a specific clock. Must be the store's clock too.
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Header sets to emit.
    pub fn header_style(mut self, style: HeaderStyle) -> Self {
        self.header_style = style;
        self
    }

    /// Message in rejection bodies.
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Status for requests under a live block.
    pub fn blocked_status(mut self, status: u16) -> Self {
        self.blocked_status = status;
        self
    }

    /// Largest request body buffered for key derivation and cost scoring.
    pub fn buffer_body_limit(mut self, limit: usize) -> Self {
        self.buffer_body_limit = limit;
        self
    }

    /// Validate and build.
    pub fn build(self) -> Result<RateLimiter<S>> {
        if let Some(e) = self.invalid {
            return Err(e);
        }
        let mut quota = self.quota;
        if let Some(prefix) = self.key_prefix {
            if prefix.is_empty() {
                return Err(ConfigError::InvalidKeyStrategy("key prefix must not be empty".into()).into());
            }
            quota = quota.with_key_prefix(prefix);
        }
        if quota.max() == 0 || quota.window().is_zero() {
            return Err(ConfigError::InvalidQuota("max and window must be greater than 0".into()).into());
        }
        if !(400..=599).contains(&self.blocked_status) {
            return Err(ConfigError::InvalidResponse(format!(
                "blocked_status {} is not an error status",
                self.blocked_status
            ))
            .into());
        }

        let key = self.strategy.build(self.trust_proxy);
        let key: SharedKey = if self.per_route {
            Arc::new(CompositeKey::new(key, PathKey::new()))
        } else {
            key
        };

        let coordinator = self
            .distributed
            .map(|config| Arc::new(Coordinator::new(Arc::clone(&self.storage), config)));

        Ok(RateLimiter {
            storage: self.storage,
            algorithm: FixedWindow::new().with_even_pacing(self.execute_evenly),
            blocks: BlockTracker::new(),
            key,
            quota,
            resolvers: self.resolvers,
            coordinator,
            policy: skip_policy(self.skip_successful, self.skip_failed),
            clock: self.clock.unwrap_or_else(system_clock),
            header_style: self.header_style,
            message: self.message,
            blocked_status: self.blocked_status,
            buffer_body_limit: self.buffer_body_limit,
        })
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::decision::Outcome;
    use crate::request::Identity;
    use crate::resolver::TieredResolver;
    use crate::storage::{GcConfig, MemoryStorage};
    use std::net::{IpAddr, Ipv4Addr};

    fn limiter(clock: &ManualClock, quota: Quota) -> RateLimiterBuilder<MemoryStorage> {
        let clock: SharedClock = Arc::new(clock.clone());
        let storage = MemoryStorage::with_gc_and_clock(GcConfig::manual(), Arc::clone(&clock));
        RateLimiter::builder(storage).quota(quota).clock(clock)
    }

    fn from(ip: [u8; 4]) -> RequestInfo {
        RequestInfo::new("GET", "/api").with_ip(IpAddr::V4(Ipv4Addr::from(ip)))
    }

    #[tokio::test]
    async fn test_counts_and_rejects() {
        let clock = ManualClock::default();
        let limiter = limiter(&clock, Quota::per_minute(2)).build().unwrap();
        let req = from([10, 0, 0, 1]);

        assert!(limiter.check(&req).await.is_allowed());
        assert!(limiter.check(&req).await.is_allowed());

        let verdict = limiter.check(&req).await;
        assert_eq!(verdict.outcome(), Outcome::LimitExceeded);
        assert_eq!(verdict.key(), "rl:ip:10.0.0.1");
        assert_eq!(limiter.rejection_status(&verdict), Some(429));

        // Other callers are unaffected
        assert!(limiter.check(&from([10, 0, 0, 2])).await.is_allowed());
    }

    #[tokio::test]
    async fn test_block_outlives_window() {
        let clock = ManualClock::default();
        let quota = Quota::new(5, Duration::from_secs(900)).with_block_duration(Duration::from_secs(3600));
        let limiter = limiter(&clock, quota).key_prefix("auth").build().unwrap();
        let req = from([10, 0, 0, 1]);

        for _ in 0..6 {
            limiter.check(&req).await;
        }

        clock.advance(Duration::from_secs(1800));
        let verdict = limiter.check(&req).await;
        assert_eq!(verdict.outcome(), Outcome::Blocked);
        assert!(!verdict.counted());
        assert_eq!(verdict.info().retry_after_seconds(), 1800);
        assert_eq!(limiter.rejection_status(&verdict), Some(403));

        let body = limiter.rejection_body(&verdict).unwrap();
        assert_eq!(body.error.code, "TEMPORARILY_BLOCKED");
    }

    #[tokio::test]
    async fn test_resolvers_and_fair_division() {
        let clock = ManualClock::default();
        let limiter = limiter(&clock, Quota::per_minute(100))
            .resolver(TieredResolver::standard())
            .build()
            .unwrap();

        let premium = RequestInfo::new("GET", "/").with_identity(Identity::new("u1").with_tier("premium"));
        assert_eq!(limiter.resolve_quota(&premium).await.max(), 1000);
        assert_eq!(limiter.resolve_quota(&from([1, 2, 3, 4])).await.max(), 100);
    }

    #[tokio::test]
    async fn test_per_route_keys() {
        let clock = ManualClock::default();
        let limiter = limiter(&clock, Quota::per_minute(1)).per_route(true).build().unwrap();
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));

        assert!(limiter.check(&RequestInfo::new("GET", "/a").with_ip(ip)).await.is_allowed());
        assert!(limiter.check(&RequestInfo::new("GET", "/b").with_ip(ip)).await.is_allowed());
        assert!(limiter.check(&RequestInfo::new("GET", "/a").with_ip(ip)).await.is_denied());
    }

    #[tokio::test]
    async fn test_skip_successful_refunds() {
        let clock = ManualClock::default();
        let limiter = limiter(&clock, Quota::per_minute(2))
            .skip_successful_requests(true)
            .build()
            .unwrap();
        let req = from([10, 0, 0, 1]);

        for _ in 0..5 {
            let verdict = limiter.check(&req).await;
            assert!(verdict.is_allowed());
            assert!(limiter.complete(&verdict, 200).await);
        }

        let verdict = limiter.check(&req).await;
        assert!(!limiter.complete(&verdict, 401).await);
        let verdict = limiter.check(&req).await;
        assert!(!limiter.complete(&verdict, 401).await);
        assert!(limiter.check(&req).await.is_denied());
    }

    #[tokio::test]
    async fn test_headers_follow_style() {
        let clock = ManualClock::default();
        let limiter = limiter(&clock, Quota::per_minute(3))
            .header_style(HeaderStyle::legacy())
            .build()
            .unwrap();

        let verdict = limiter.check(&from([10, 0, 0, 1])).await;
        let headers = limiter.response_headers(&verdict);
        assert!(headers.iter().any(|(k, v)| *k == "X-RateLimit-Remaining" && v == "2"));
        assert!(headers.iter().all(|(k, _)| !k.starts_with("RateLimit-")));
    }

    #[test]
    fn test_build_validation() {
        let clock = ManualClock::default();
        assert!(limiter(&clock, Quota::per_minute(1)).key_prefix("").build().is_err());
        assert!(limiter(&clock, Quota::per_minute(1)).blocked_status(200).build().is_err());

        let config = LimiterConfig {
            max: 0,
            ..LimiterConfig::default()
        };
        assert!(limiter(&clock, Quota::per_minute(1)).config(&config).build().is_err());
    }

    #[tokio::test]
    async fn test_from_config() {
        let config = LimiterConfig::from_json(r#"{"max":1,"key_strategy":"identity","key_prefix":"api"}"#).unwrap();
        let limiter = RateLimiter::from_config(MemoryStorage::new(), &config).unwrap();

        let req = RequestInfo::new("GET", "/").with_identity(Identity::new("u7"));
        assert_eq!(limiter.check(&req).await.key(), "api:user:u7");
        assert!(limiter.check(&req).await.is_denied());
    }
}

//! Fail-open pairing of a shared store with a local fallback.
//!
//! Calls go to the shared store while it is healthy. The first call that
//! fails because the store is unreachable switches every call to the local
//! [`MemoryStorage`] for `retry_interval`; the first call after that tries
//! the shared store again. Limits held locally are per process until then.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::clock::{SharedClock, duration_ms, system_clock};
use crate::error::{RateLimitError, Result};
use crate::storage::{Backend, BlockRecord, GcConfig, MemoryStorage, RateLimitRecord, Storage};

/// Failover behaviour.
#[derive(Debug, Clone)]
pub struct FailoverConfig {
    /// How long to stay on the local store before probing the shared one.
    pub retry_interval: Duration,
    /// GC policy for the local store.
    pub local_gc: GcConfig,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(5),
            local_gc: GcConfig::default(),
        }
    }
}

impl FailoverConfig {
    /// Set the retry interval.
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }
}

/// Shared store with an in-process fallback.
///
/// # Example
///
/// ```ignore
/// use flowgate::storage::{FailoverStorage, RedisStorage};
///
/// let shared = RedisStorage::from_url("redis://localhost:6379").await?;
/// let storage = FailoverStorage::new(shared);
/// ```
pub struct FailoverStorage<S> {
    shared: S,
    local: MemoryStorage,
    clock: SharedClock,
    retry_interval: Duration,
    /// Unix ms until which the shared store is skipped; zero while healthy.
    degraded_until: AtomicU64,
}

impl<S> std::fmt::Debug for FailoverStorage<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailoverStorage")
            .field("local", &self.local)
            .field("retry_interval", &self.retry_interval)
            .field("degraded_until", &self.degraded_until.load(Ordering::Relaxed))
            .finish()
    }
}

/// Try the shared store, fall back to the local one when it is unreachable.
macro_rules! failover {
    ($self:ident, $op:literal, $store:ident => $call:expr) => {{
        if $self.shared_available() {
            let $store = &$self.shared;
            match $call.await {
                Ok(value) => {
                    $self.mark_recovered();
                    return Ok(value);
                }
                Err(e) if e.is_store_unavailable() => $self.mark_degraded($op, &e),
                Err(e) => return Err(e),
            }
        }
        let $store = &$self.local;
        $call.await
    }};
}

impl<S: Storage> FailoverStorage<S> {
    /// Wrap `shared` with the default failover configuration.
    pub fn new(shared: S) -> Self {
        Self::with_config(shared, FailoverConfig::default(), system_clock())
    }

    /// Wrap `shared` with explicit configuration and clock.
    ///
    /// The clock also drives the local store.
    pub fn with_config(shared: S, config: FailoverConfig, clock: SharedClock) -> Self {
        Self {
            shared,
            local: MemoryStorage::with_gc_and_clock(config.local_gc, Arc::clone(&clock)),
            clock,
            retry_interval: config.retry_interval,
            degraded_until: AtomicU64::new(0),
        }
    }

    /// Whether calls are currently served locally.
    pub fn is_degraded(&self) -> bool {
        !self.shared_available()
    }

    /// The local fallback store.
    pub fn local(&self) -> &MemoryStorage {
        &self.local
    }

    /// The shared store.
    pub fn shared(&self) -> &S {
        &self.shared
    }

    fn shared_available(&self) -> bool {
        let until = self.degraded_until.load(Ordering::Acquire);
        until == 0 || self.clock.now_ms() >= until
    }

    fn mark_degraded(&self, op: &'static str, error: &RateLimitError) {
        let until = self.clock.now_ms().saturating_add(duration_ms(self.retry_interval));
        let previous = self.degraded_until.swap(until, Ordering::AcqRel);
        if previous == 0 {
            warn!(
                operation = op,
                error = %error,
                retry_in_ms = duration_ms(self.retry_interval),
                "shared store unavailable, switching to local counters"
            );
        } else {
            debug!(operation = op, error = %error, "shared store still unavailable");
        }
    }

    fn mark_recovered(&self) {
        if self.degraded_until.swap(0, Ordering::AcqRel) != 0 {
            info!("shared store reachable again, leaving local counters");
        }
    }
}

impl<S: Storage> Storage for FailoverStorage<S> {
    fn backend(&self) -> Backend {
        if self.shared_available() {
            self.shared.backend()
        } else {
            Backend::Local
        }
    }

    async fn increment(&self, key: &str, window: Duration) -> Result<RateLimitRecord> {
        failover!(self, "increment", store => store.increment(key, window))
    }

    async fn decrement(&self, key: &str, window_started_at: u64) -> Result<Option<RateLimitRecord>> {
        failover!(self, "decrement", store => store.decrement(key, window_started_at))
    }

    async fn flag_violation(&self, key: &str, window_started_at: u64) -> Result<bool> {
        failover!(self, "flag_violation", store => store.flag_violation(key, window_started_at))
    }

    async fn get(&self, key: &str) -> Result<Option<RateLimitRecord>> {
        failover!(self, "get", store => store.get(key))
    }

    async fn reset(&self, key: &str) -> Result<()> {
        // Local counters from an earlier outage must not linger either.
        self.local.reset(key).await?;
        failover!(self, "reset", store => store.reset(key))
    }

    async fn set_block(&self, key: &str, duration: Duration, reason: &str) -> Result<BlockRecord> {
        failover!(self, "set_block", store => store.set_block(key, duration, reason))
    }

    async fn get_block(&self, key: &str) -> Result<Option<BlockRecord>> {
        failover!(self, "get_block", store => store.get_block(key))
    }

    async fn remove_block(&self, key: &str) -> Result<()> {
        self.local.remove_block(key).await?;
        failover!(self, "remove_block", store => store.remove_block(key))
    }

    async fn blocked_keys(&self) -> Result<Vec<(String, BlockRecord)>> {
        failover!(self, "blocked_keys", store => store.blocked_keys())
    }

    async fn counters(&self) -> Result<Vec<(String, RateLimitRecord)>> {
        failover!(self, "counters", store => store.counters())
    }

    async fn touch_node(&self, node_id: &str, ttl: Duration) -> Result<()> {
        failover!(self, "touch_node", store => store.touch_node(node_id, ttl))
    }

    async fn remove_node(&self, node_id: &str) -> Result<()> {
        self.local.remove_node(node_id).await?;
        failover!(self, "remove_node", store => store.remove_node(node_id))
    }

    async fn live_node_count(&self) -> Result<u64> {
        failover!(self, "live_node_count", store => store.live_node_count())
    }
}

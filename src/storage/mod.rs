//! Storage backend trait and implementations.
//!
//! This module defines the `Storage` trait every counter store implements,
//! along with the in-memory store, the Redis store shared across processes,
//! and the [`FailoverStorage`] that puts the two together so a store outage
//! never turns into rejected traffic.

mod entry;
#[cfg(feature = "memory")]
mod failover;
#[cfg(feature = "memory")]
mod memory_gc;
#[cfg(feature = "redis")]
mod redis_cluster;

pub use entry::{Backend, BlockRecord, RateLimitRecord, StoreInfo};

#[cfg(feature = "memory")]
pub use failover::{FailoverConfig, FailoverStorage};

#[cfg(feature = "memory")]
pub use memory_gc::{GcConfig, GcInterval, MemoryStorage};

// RedisStorage with connection pooling
#[cfg(feature = "redis")]
pub use redis_cluster::{RedisConfig, RedisStorage};

use std::future::Future;
use std::time::Duration;

use crate::error::Result;

/// Storage backend trait for admission state.
///
/// All storage operations are async to support both local and distributed backends.
/// Implementations must be thread-safe (`Send + Sync`).
///
/// # Atomicity
///
/// `increment` must bump the counter and arm its expiry as one step. Two
/// callers racing on the same key must each observe a distinct post-increment
/// count; a read-then-write implementation is not acceptable.
///
/// # Example
///
/// ```ignore
/// use flowgate::storage::{MemoryStorage, Storage};
/// use std::time::Duration;
///
/// async fn example<S: Storage>(storage: &S) -> flowgate::Result<()> {
///     let record = storage.increment("ip:10.0.0.1", Duration::from_secs(60)).await?;
///     println!("hit {} of this window", record.count);
///     Ok(())
/// }
/// ```
pub trait Storage: Send + Sync + 'static {
    /// Which kind of store this is.
    fn backend(&self) -> Backend;

    /// Atomically add one hit to `key`.
    ///
    /// The first hit of a window creates the record and sets its expiry to
    /// `window`; later hits leave the expiry untouched. Returns the record
    /// AFTER incrementing.
    fn increment(
        &self,
        key: &str,
        window: Duration,
    ) -> impl Future<Output = Result<RateLimitRecord>> + Send;

    /// Take back one hit from the window of `key` that opened at
    /// `window_started_at`, never going below zero.
    ///
    /// Returns `None` and changes nothing when that window has expired or
    /// been replaced by a newer one.
    fn decrement(
        &self,
        key: &str,
        window_started_at: u64,
    ) -> impl Future<Output = Result<Option<RateLimitRecord>>> + Send;

    /// Mark the window of `key` that opened at `window_started_at` as having
    /// broken its limit.
    ///
    /// Returns `true` for the first caller only, and `false` once the window
    /// is already marked, expired, or replaced.
    fn flag_violation(&self, key: &str, window_started_at: u64) -> impl Future<Output = Result<bool>> + Send;

    /// Read the counter without changing it.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<RateLimitRecord>>> + Send;

    /// Drop the counter so the next hit opens a fresh window.
    fn reset(&self, key: &str) -> impl Future<Output = Result<()>> + Send;

    /// Block `key` for `duration`.
    fn set_block(
        &self,
        key: &str,
        duration: Duration,
        reason: &str,
    ) -> impl Future<Output = Result<BlockRecord>> + Send;

    /// The live block on `key`, if any. Expired blocks read as `None`.
    fn get_block(&self, key: &str) -> impl Future<Output = Result<Option<BlockRecord>>> + Send;

    /// Lift a block. Succeeds when there was none.
    fn remove_block(&self, key: &str) -> impl Future<Output = Result<()>> + Send;

    /// Every key currently blocked.
    fn blocked_keys(&self) -> impl Future<Output = Result<Vec<(String, BlockRecord)>>> + Send;

    /// Every counter in a live window.
    fn counters(&self) -> impl Future<Output = Result<Vec<(String, RateLimitRecord)>>> + Send;

    /// Mark `node_id` alive for another `ttl`.
    fn touch_node(&self, node_id: &str, ttl: Duration) -> impl Future<Output = Result<()>> + Send;

    /// Forget a node.
    fn remove_node(&self, node_id: &str) -> impl Future<Output = Result<()>> + Send;

    /// Number of nodes whose registration has not expired.
    fn live_node_count(&self) -> impl Future<Output = Result<u64>> + Send;

    /// Whether `key` is under a live block.
    fn is_blocked(&self, key: &str) -> impl Future<Output = Result<bool>> + Send {
        async move { Ok(self.get_block(key).await?.is_some()) }
    }

    /// Backend kind and live node count.
    fn info(&self) -> impl Future<Output = Result<StoreInfo>> + Send {
        async move {
            Ok(StoreInfo {
                backend: self.backend(),
                node_count: self.live_node_count().await?,
            })
        }
    }
}

impl<S: Storage + ?Sized> Storage for std::sync::Arc<S> {
    fn backend(&self) -> Backend {
        (**self).backend()
    }

    async fn increment(&self, key: &str, window: Duration) -> Result<RateLimitRecord> {
        (**self).increment(key, window).await
    }

    async fn decrement(&self, key: &str, window_started_at: u64) -> Result<Option<RateLimitRecord>> {
        (**self).decrement(key, window_started_at).await
    }

    async fn flag_violation(&self, key: &str, window_started_at: u64) -> Result<bool> {
        (**self).flag_violation(key, window_started_at).await
    }

    async fn get(&self, key: &str) -> Result<Option<RateLimitRecord>> {
        (**self).get(key).await
    }

    async fn reset(&self, key: &str) -> Result<()> {
        (**self).reset(key).await
    }

    async fn set_block(&self, key: &str, duration: Duration, reason: &str) -> Result<BlockRecord> {
        (**self).set_block(key, duration, reason).await
    }

    async fn get_block(&self, key: &str) -> Result<Option<BlockRecord>> {
        (**self).get_block(key).await
    }

    async fn remove_block(&self, key: &str) -> Result<()> {
        (**self).remove_block(key).await
    }

    async fn blocked_keys(&self) -> Result<Vec<(String, BlockRecord)>> {
        (**self).blocked_keys().await
    }

    async fn counters(&self) -> Result<Vec<(String, RateLimitRecord)>> {
        (**self).counters().await
    }

    async fn touch_node(&self, node_id: &str, ttl: Duration) -> Result<()> {
        (**self).touch_node(node_id, ttl).await
    }

    async fn remove_node(&self, node_id: &str) -> Result<()> {
        (**self).remove_node(node_id).await
    }

    async fn live_node_count(&self) -> Result<u64> {
        (**self).live_node_count().await
    }
}

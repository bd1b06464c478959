//! Operational management of a limiter's keys.
//!
//! The `RateLimitManager` reads and writes the same store the limiter
//! counts in, for admin tooling: inspect a key, force-reset it, list and
//! manage blocks, and collect usage statistics. None of it runs on the
//! request path.
//!
//! Keys are the full namespaced keys the limiter derives, e.g.
//! `auth:ip:10.0.0.1`.
//!
//! # Example
//!
//! ```ignore
//! use flowgate::{RateLimitManager, RateLimiter, MemoryStorage};
//! use std::sync::Arc;
//!
//! let limiter = Arc::new(RateLimiter::builder(MemoryStorage::new()).build()?);
//! let manager = RateLimitManager::new(Arc::clone(&limiter));
//!
//! manager.block("rl:ip:203.0.113.9", Duration::from_secs(3600), "abuse report").await?;
//! for (key, block) in manager.blocked_keys().await? {
//!     println!("{key} until {}", block.blocked_until);
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use crate::block::BlockTracker;
use crate::error::Result;
use crate::limiter::RateLimiter;
use crate::storage::{Backend, BlockRecord, Storage};

/// Limit state of one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyStatus {
    /// The key.
    pub key: String,
    /// Hits in the live window, zero when there is none.
    pub count: u64,
    /// The limiter's base ceiling.
    pub limit: u64,
    /// Hits left before the base ceiling.
    pub remaining: u64,
    /// Time until the window resets, zero when there is none.
    pub reset_after: Duration,
    /// The live block, if any.
    pub block: Option<BlockRecord>,
}

impl KeyStatus {
    /// Whether the key is under a live block.
    pub fn is_blocked(&self) -> bool {
        self.block.is_some()
    }
}

/// Store-wide usage snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageStats {
    /// Keys with a live window.
    pub tracked_keys: usize,
    /// Hits across every live window.
    pub total_hits: u64,
    /// Keys under a live block.
    pub blocked_keys: usize,
    /// The store serving the snapshot.
    pub backend: Backend,
    /// Live nodes registered in the store.
    pub node_count: u64,
}

/// Admin surface over a limiter's store.
pub struct RateLimitManager<S: Storage> {
    limiter: Arc<RateLimiter<S>>,
    blocks: BlockTracker,
}

impl<S: Storage> std::fmt::Debug for RateLimitManager<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitManager")
            .field("limiter", &self.limiter)
            .finish()
    }
}

impl<S: Storage> RateLimitManager<S> {
    /// Manage the keys of `limiter`.
    pub fn new(limiter: Arc<RateLimiter<S>>) -> Self {
        Self {
            limiter,
            blocks: BlockTracker::new(),
        }
    }

    /// The managed limiter.
    pub fn limiter(&self) -> &Arc<RateLimiter<S>> {
        &self.limiter
    }

    /// Current state of `key`.
    pub async fn status(&self, key: &str) -> Result<KeyStatus> {
        let storage = self.limiter.storage();
        let now = self.limiter.clock().now_ms();
        let limit = self.limiter.quota().max();

        let (count, reset_after) = match storage.get(key).await? {
            Some(record) => (record.count, Duration::from_millis(record.ttl_remaining_ms(now))),
            None => (0, Duration::ZERO),
        };
        let block = self
            .blocks
            .check(&**storage, key)
            .await?
            .filter(|block| block.is_active(now));

        Ok(KeyStatus {
            key: key.to_string(),
            count,
            limit,
            remaining: limit.saturating_sub(count),
            reset_after,
            block,
        })
    }

    /// Clear the counter and any block on `key`. Resetting a key with no
    /// state succeeds.
    pub async fn reset(&self, key: &str) -> Result<()> {
        let storage = self.limiter.storage();
        storage.reset(key).await?;
        self.blocks.unblock(&**storage, key).await?;
        info!(key = %key, "key reset");
        Ok(())
    }

    /// Every key under a live block.
    pub async fn blocked_keys(&self) -> Result<Vec<(String, BlockRecord)>> {
        let mut blocked = self.limiter.storage().blocked_keys().await?;
        blocked.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(blocked)
    }

    /// Block `key` for `duration`.
    ///
    /// A zero duration sets nothing and returns `None`.
    pub async fn block(&self, key: &str, duration: Duration, reason: &str) -> Result<Option<BlockRecord>> {
        let block = self
            .blocks
            .block(&**self.limiter.storage(), key, duration, reason)
            .await?;
        if block.is_some() {
            info!(key = %key, duration_ms = duration.as_millis() as u64, reason = %reason, "key blocked by operator");
        }
        Ok(block)
    }

    /// Lift the block on `key`.
    pub async fn unblock(&self, key: &str) -> Result<()> {
        self.blocks.unblock(&**self.limiter.storage(), key).await?;
        info!(key = %key, "key unblocked by operator");
        Ok(())
    }

    /// Usage snapshot of the store.
    pub async fn stats(&self) -> Result<UsageStats> {
        let storage = self.limiter.storage();
        let counters = storage.counters().await?;
        let blocked = storage.blocked_keys().await?;
        let info = storage.info().await?;

        Ok(UsageStats {
            tracked_keys: counters.len(),
            total_hits: counters.iter().map(|(_, record)| record.count).sum(),
            blocked_keys: blocked.len(),
            backend: info.backend,
            node_count: info.node_count,
        })
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, SharedClock};
    use crate::quota::Quota;
    use crate::request::RequestInfo;
    use crate::storage::{GcConfig, MemoryStorage};
    use std::net::{IpAddr, Ipv4Addr};

    fn manager(clock: &ManualClock) -> RateLimitManager<MemoryStorage> {
        let clock: SharedClock = Arc::new(clock.clone());
        let storage = MemoryStorage::with_gc_and_clock(GcConfig::manual(), Arc::clone(&clock));
        let limiter = RateLimiter::builder(storage)
            .quota(Quota::per_minute(3))
            .clock(clock)
            .build()
            .unwrap();
        RateLimitManager::new(Arc::new(limiter))
    }

    fn request(last: u8) -> RequestInfo {
        RequestInfo::new("GET", "/").with_ip(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)))
    }

    #[tokio::test]
    async fn test_status() {
        let clock = ManualClock::default();
        let manager = manager(&clock);
        manager.limiter().check(&request(1)).await;
        manager.limiter().check(&request(1)).await;
        clock.advance(Duration::from_secs(20));

        let status = manager.status("rl:ip:10.0.0.1").await.unwrap();
        assert_eq!(status.count, 2);
        assert_eq!(status.remaining, 1);
        assert_eq!(status.reset_after, Duration::from_secs(40));
        assert!(!status.is_blocked());

        let unknown = manager.status("rl:ip:10.0.0.9").await.unwrap();
        assert_eq!(unknown.count, 0);
        assert_eq!(unknown.remaining, 3);
    }

    #[tokio::test]
    async fn test_block_and_unblock() {
        let clock = ManualClock::default();
        let manager = manager(&clock);

        manager
            .block("rl:ip:10.0.0.5", Duration::from_secs(600), "abuse")
            .await
            .unwrap();
        assert!(manager.limiter().check(&request(5)).await.is_denied());

        let blocked = manager.blocked_keys().await.unwrap();
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].1.reason, "abuse");

        manager.unblock("rl:ip:10.0.0.5").await.unwrap();
        assert!(manager.limiter().check(&request(5)).await.is_allowed());
        assert!(manager.blocked_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stats() {
        let clock = ManualClock::default();
        let manager = manager(&clock);
        for last in [1, 1, 2] {
            manager.limiter().check(&request(last)).await;
        }
        manager.block("rl:ip:10.0.0.3", Duration::from_secs(60), "test").await.unwrap();

        let stats = manager.stats().await.unwrap();
        assert_eq!(stats.tracked_keys, 2);
        assert_eq!(stats.total_hits, 3);
        assert_eq!(stats.blocked_keys, 1);
        assert_eq!(stats.backend, Backend::Local);
    }
}

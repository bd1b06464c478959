//! Block tracking.
//!
//! A block is a cool-down put on a key the moment it first breaks its limit
//! in a window. It outlives the window: while it is live every request for
//! the key is turned away before it is counted.

use std::time::Duration;

use tracing::debug;

use crate::error::Result;
use crate::storage::{BlockRecord, Storage};

/// Reason recorded for blocks the limiter sets on its own.
pub const LIMIT_EXCEEDED_REASON: &str = "rate limit exceeded";

/// Reads and writes blocks through a [`Storage`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockTracker;

impl BlockTracker {
    /// Create a new block tracker.
    pub fn new() -> Self {
        Self
    }

    /// The live block on `key`, if any.
    pub async fn check<S: Storage>(&self, storage: &S, key: &str) -> Result<Option<BlockRecord>> {
        storage.get_block(key).await
    }

    /// Block `key` for `duration`. A zero duration sets nothing.
    pub async fn block<S: Storage>(
        &self,
        storage: &S,
        key: &str,
        duration: Duration,
        reason: &str,
    ) -> Result<Option<BlockRecord>> {
        if duration.is_zero() {
            return Ok(None);
        }
        let block = storage.set_block(key, duration, reason).await?;
        debug!(key = %key, blocked_until = block.blocked_until, reason = %reason, "key blocked");
        Ok(Some(block))
    }

    /// Lift the block on `key`.
    pub async fn unblock<S: Storage>(&self, storage: &S, key: &str) -> Result<()> {
        storage.remove_block(key).await?;
        debug!(key = %key, "key unblocked");
        Ok(())
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::storage::{GcConfig, MemoryStorage};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_block_lifecycle() {
        let clock = ManualClock::default();
        let storage = MemoryStorage::with_gc_and_clock(GcConfig::manual(), Arc::new(clock.clone()));
        let tracker = BlockTracker::new();

        let block = tracker
            .block(&storage, "rl:ip:1.1.1.1", Duration::from_secs(60), LIMIT_EXCEEDED_REASON)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(block.remaining_ms(clock.now_ms()), 60_000);
        assert!(tracker.check(&storage, "rl:ip:1.1.1.1").await.unwrap().is_some());

        clock.advance(Duration::from_secs(60));
        assert!(tracker.check(&storage, "rl:ip:1.1.1.1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_zero_duration_sets_nothing() {
        let storage = MemoryStorage::with_gc(GcConfig::manual());
        let tracker = BlockTracker::new();

        let block = tracker.block(&storage, "k", Duration::ZERO, "x").await.unwrap();
        assert!(block.is_none());
        assert!(tracker.check(&storage, "k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unblock() {
        let storage = MemoryStorage::with_gc(GcConfig::manual());
        let tracker = BlockTracker::new();

        tracker.block(&storage, "k", Duration::from_secs(5), "manual").await.unwrap();
        tracker.unblock(&storage, "k").await.unwrap();
        assert!(tracker.check(&storage, "k").await.unwrap().is_none());
        // Lifting a missing block is fine
        tracker.unblock(&storage, "k").await.unwrap();
    }
}

//! Fixed Window rate limiting algorithm.

use std::time::Duration;

use tracing::{debug, warn};

use crate::algorithm::Algorithm;
use crate::block::{BlockTracker, LIMIT_EXCEEDED_REASON};
use crate::clock::duration_ms;
use crate::decision::{RateLimitInfo, Verdict};
use crate::error::Result;
use crate::quota::Quota;
use crate::storage::{BlockRecord, RateLimitRecord, Storage};

/// Fixed Window rate limiting algorithm.
///
/// Each key gets a counter that opens with its first hit and expires one
/// window later. Hit `n` is admitted while `n <= max`. The first hit of a
/// window to go past `max` blocks the key when the quota has a block
/// duration. `max` may differ from hit to hit, so this is tracked with a
/// per-window violation flag rather than by matching `max + 1`.
///
/// With even pacing on, admitted hits are additionally spread across the
/// window: hit `n` is held until `window_start + (n - 1) * window / max`.
#[derive(Debug, Clone, Default)]
pub struct FixedWindow {
    execute_evenly: bool,
    blocks: BlockTracker,
}

impl FixedWindow {
    /// Create a new Fixed Window algorithm instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Turn on even pacing of admitted requests.
    pub fn with_even_pacing(mut self, enabled: bool) -> Self {
        self.execute_evenly = enabled;
        self
    }

    /// Whether even pacing is on.
    pub fn paces_evenly(&self) -> bool {
        self.execute_evenly
    }

    fn build_info(&self, record: &RateLimitRecord, quota: &Quota, now: u64) -> RateLimitInfo {
        // The store may stamp the window a little after `now`.
        let ttl = record.ttl_remaining_ms(now).min(duration_ms(quota.window()));
        RateLimitInfo {
            limit: quota.max(),
            remaining: quota.max().saturating_sub(record.count),
            current: record.count,
            window: quota.window(),
            reset_at_ms: now.saturating_add(ttl),
            reset_after: Duration::from_millis(ttl),
            retry_after: None,
        }
    }

    /// Block `key` if this is the first hit of its window to break the limit.
    async fn block_first_violation<S: Storage>(
        &self,
        storage: &S,
        key: &str,
        quota: &Quota,
        window_start: u64,
    ) -> Result<Option<BlockRecord>> {
        if !storage.flag_violation(key, window_start).await? {
            return Ok(None);
        }
        self.blocks
            .block(storage, key, quota.block_duration(), LIMIT_EXCEEDED_REASON)
            .await
    }

    /// How long to hold an admitted hit so hits land `window / max` apart.
    fn pacing_delay(&self, record: &RateLimitRecord, quota: &Quota, now: u64) -> Duration {
        let spacing = duration_ms(quota.spacing());
        let slot = record
            .window_started_at
            .saturating_add(record.count.saturating_sub(1).saturating_mul(spacing));
        let wait = slot
            .saturating_sub(now)
            .min(record.ttl_remaining_ms(now));
        Duration::from_millis(wait)
    }
}

impl Algorithm for FixedWindow {
    fn name(&self) -> &'static str {
        "fixed_window"
    }

    async fn check_and_record<S: Storage>(
        &self,
        storage: &S,
        key: &str,
        quota: &Quota,
        now_ms: u64,
    ) -> Result<Verdict> {
        let record = storage.increment(key, quota.window()).await?;
        let mut info = self.build_info(&record, quota, now_ms);

        let window_start = record.window_started_at;

        if record.count <= quota.max() {
            let verdict = Verdict::allowed(key, info).in_window(window_start);
            if self.execute_evenly {
                let delay = self.pacing_delay(&record, quota, now_ms);
                if !delay.is_zero() {
                    return Ok(verdict.with_delay(delay));
                }
            }
            return Ok(verdict);
        }

        let mut retry_after = info.reset_after;
        if quota.blocks() && !record.violated {
            // A failed block write still leaves the window rejection in place.
            match self.block_first_violation(storage, key, quota, window_start).await {
                Ok(Some(block)) => {
                    retry_after = Duration::from_millis(block.remaining_ms(now_ms)).min(quota.block_duration())
                }
                Ok(None) => {}
                Err(e) => warn!(key = %key, error = %e, "failed to record block"),
            }
        }

        info.retry_after = Some(retry_after);
        debug!(
            key = %key,
            count = record.count,
            limit = quota.max(),
            "rate limit exceeded"
        );
        Ok(Verdict::limit_exceeded(key, info).in_window(window_start))
    }

    async fn check<S: Storage>(
        &self,
        storage: &S,
        key: &str,
        quota: &Quota,
        now_ms: u64,
    ) -> Result<Option<RateLimitInfo>> {
        let record = storage.get(key).await?;
        Ok(record.map(|record| self.build_info(&record, quota, now_ms)))
    }
}

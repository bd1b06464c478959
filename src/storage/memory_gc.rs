//! In-memory storage with automatic garbage collection.
//!
//! This storage backend uses `DashMap` for thread-safe concurrent access
//! and includes configurable garbage collection to prevent memory growth.
//! It gives no cross-process coordination: limits held here are per process.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::clock::{SharedClock, duration_ms, system_clock};
use crate::error::Result;
use crate::storage::{Backend, BlockRecord, RateLimitRecord, Storage};

/// Garbage collection interval configuration.
#[derive(Debug, Clone)]
pub enum GcInterval {
    /// Run GC every N requests.
    Requests(u64),
    /// Run GC at fixed time intervals.
    Duration(Duration),
    /// Disable automatic GC.
    Manual,
}

impl Default for GcInterval {
    fn default() -> Self {
        Self::Requests(10000)
    }
}

/// Garbage collection configuration.
#[derive(Debug, Clone, Default)]
pub struct GcConfig {
    /// When to trigger GC.
    pub interval: GcInterval,
}

impl GcConfig {
    /// Create config with request-based GC.
    pub fn on_requests(count: u64) -> Self {
        Self {
            interval: GcInterval::Requests(count),
        }
    }

    /// Create config with time-based GC.
    pub fn on_duration(interval: Duration) -> Self {
        Self {
            interval: GcInterval::Duration(interval),
        }
    }

    /// Create config with manual GC only.
    pub fn manual() -> Self {
        Self {
            interval: GcInterval::Manual,
        }
    }
}

#[derive(Debug, Default)]
struct Maps {
    counters: DashMap<String, RateLimitRecord>,
    blocks: DashMap<String, BlockRecord>,
    /// node id -> registration expiry (Unix ms)
    nodes: DashMap<String, u64>,
}

impl Maps {
    fn collect(&self, now: u64) {
        self.counters.retain(|_, record| !record.is_expired(now));
        self.blocks.retain(|_, block| block.is_active(now));
        self.nodes.retain(|_, expires_at| *expires_at > now);
    }
}

/// In-memory storage with garbage collection.
///
/// Expired records are invisible to reads as soon as they expire; GC only
/// bounds how long their memory lingers.
///
/// # Example
///
/// ```ignore
/// use flowgate::storage::{MemoryStorage, GcConfig};
/// use std::time::Duration;
///
/// // Default GC (every 10000 requests)
/// let storage = MemoryStorage::new();
///
/// // Custom GC interval
/// let storage = MemoryStorage::with_gc(GcConfig::on_duration(Duration::from_secs(60)));
///
/// // Manual GC only
/// let storage = MemoryStorage::with_gc(GcConfig::manual());
/// storage.run_gc().await;
/// ```
pub struct MemoryStorage {
    maps: Arc<Maps>,
    clock: SharedClock,
    gc_config: GcConfig,
    request_count: AtomicU64,
    gc_lock: Mutex<()>,
    shutdown: Arc<Notify>,
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("counters", &self.maps.counters.len())
            .field("blocks", &self.maps.blocks.len())
            .field("nodes", &self.maps.nodes.len())
            .field("gc_config", &self.gc_config)
            .finish()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    /// Create a new memory storage with default GC configuration.
    pub fn new() -> Self {
        Self::with_gc_and_clock(GcConfig::default(), system_clock())
    }

    /// Create a new memory storage with custom GC configuration.
    pub fn with_gc(gc_config: GcConfig) -> Self {
        Self::with_gc_and_clock(gc_config, system_clock())
    }

    /// Create a memory storage reading time from `clock`.
    pub fn with_clock(clock: SharedClock) -> Self {
        Self::with_gc_and_clock(GcConfig::default(), clock)
    }

    /// Create a memory storage with both a GC policy and a clock.
    ///
    /// Duration-based GC spawns a task and so needs a Tokio runtime.
    pub fn with_gc_and_clock(gc_config: GcConfig, clock: SharedClock) -> Self {
        let storage = Self {
            maps: Arc::new(Maps::default()),
            clock,
            gc_config: gc_config.clone(),
            request_count: AtomicU64::new(0),
            gc_lock: Mutex::new(()),
            shutdown: Arc::new(Notify::new()),
        };

        // Start background GC task if duration-based
        if let GcInterval::Duration(interval) = gc_config.interval {
            storage.start_gc_task(interval);
        }

        storage
    }

    /// Start background GC task.
    fn start_gc_task(&self, interval: Duration) {
        let maps = self.maps.clone();
        let clock = self.clock.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        maps.collect(clock.now_ms());
                    }
                    _ = shutdown.notified() => {
                        break;
                    }
                }
            }
        });
    }

    /// Manually trigger garbage collection.
    pub async fn run_gc(&self) {
        self.maps.collect(self.clock.now_ms());
    }

    /// Number of counters held, live or not yet collected.
    pub fn len(&self) -> usize {
        self.maps.counters.len()
    }

    /// Check if the storage holds no counters.
    pub fn is_empty(&self) -> bool {
        self.maps.counters.is_empty()
    }

    /// Clear all counters, blocks and node registrations.
    pub fn clear(&self) {
        self.maps.counters.clear();
        self.maps.blocks.clear();
        self.maps.nodes.clear();
    }

    /// Check if GC should run and run it if needed.
    fn maybe_run_gc(&self) {
        if let GcInterval::Requests(threshold) = self.gc_config.interval {
            let count = self.request_count.fetch_add(1, Ordering::Relaxed);
            if threshold > 0 && count % threshold == 0 && count > 0 {
                // Try to acquire GC lock (non-blocking)
                if let Some(_guard) = self.gc_lock.try_lock() {
                    self.maps.collect(self.clock.now_ms());
                }
            }
        }
    }
}

impl Drop for MemoryStorage {
    fn drop(&mut self) {
        self.shutdown.notify_waiters();
    }
}

impl Storage for MemoryStorage {
    fn backend(&self) -> Backend {
        Backend::Local
    }

    async fn increment(&self, key: &str, window: Duration) -> Result<RateLimitRecord> {
        self.maybe_run_gc();

        let now = self.clock.now_ms();
        // The entry guard holds the shard lock for the whole read-modify-write.
        let mut record = self
            .maps
            .counters
            .entry(key.to_string())
            .or_insert_with(|| RateLimitRecord::new(0, now, window));

        if record.is_expired(now) {
            *record = RateLimitRecord::new(0, now, window);
        }
        record.count += 1;

        Ok(record.clone())
    }

    async fn decrement(&self, key: &str, window_started_at: u64) -> Result<Option<RateLimitRecord>> {
        let now = self.clock.now_ms();
        let Some(mut record) = self.maps.counters.get_mut(key) else {
            return Ok(None);
        };

        if !record.is_window(window_started_at, now) {
            return Ok(None);
        }

        record.count = record.count.saturating_sub(1);
        Ok(Some(record.clone()))
    }

    async fn flag_violation(&self, key: &str, window_started_at: u64) -> Result<bool> {
        let now = self.clock.now_ms();
        let Some(mut record) = self.maps.counters.get_mut(key) else {
            return Ok(false);
        };

        if !record.is_window(window_started_at, now) || record.violated {
            return Ok(false);
        }
        record.violated = true;
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<RateLimitRecord>> {
        self.maybe_run_gc();

        let now = self.clock.now_ms();
        if let Some(record) = self.maps.counters.get(key) {
            if !record.is_expired(now) {
                return Ok(Some(record.clone()));
            }
            // Entry expired, remove it
            drop(record);
            self.maps.counters.remove(key);
        }
        Ok(None)
    }

    async fn reset(&self, key: &str) -> Result<()> {
        self.maps.counters.remove(key);
        Ok(())
    }

    async fn set_block(&self, key: &str, duration: Duration, reason: &str) -> Result<BlockRecord> {
        let block = BlockRecord::new(self.clock.now_ms(), duration, reason);
        self.maps.blocks.insert(key.to_string(), block.clone());
        Ok(block)
    }

    async fn get_block(&self, key: &str) -> Result<Option<BlockRecord>> {
        let now = self.clock.now_ms();
        if let Some(block) = self.maps.blocks.get(key) {
            if block.is_active(now) {
                return Ok(Some(block.clone()));
            }
            drop(block);
            self.maps.blocks.remove(key);
        }
        Ok(None)
    }

    async fn remove_block(&self, key: &str) -> Result<()> {
        self.maps.blocks.remove(key);
        Ok(())
    }

    async fn blocked_keys(&self) -> Result<Vec<(String, BlockRecord)>> {
        let now = self.clock.now_ms();
        Ok(self
            .maps
            .blocks
            .iter()
            .filter(|entry| entry.value().is_active(now))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect())
    }

    async fn counters(&self) -> Result<Vec<(String, RateLimitRecord)>> {
        let now = self.clock.now_ms();
        Ok(self
            .maps
            .counters
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect())
    }

    async fn touch_node(&self, node_id: &str, ttl: Duration) -> Result<()> {
        let expires_at = self.clock.now_ms().saturating_add(duration_ms(ttl));
        self.maps.nodes.insert(node_id.to_string(), expires_at);
        Ok(())
    }

    async fn remove_node(&self, node_id: &str) -> Result<()> {
        self.maps.nodes.remove(node_id);
        Ok(())
    }

    async fn live_node_count(&self) -> Result<u64> {
        let now = self.clock.now_ms();
        let live = self
            .maps
            .nodes
            .iter()
            .filter(|entry| *entry.value() > now)
            .count();
        Ok(live as u64)
    }
}

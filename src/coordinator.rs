//! Cluster membership for fair division of a global ceiling.
//!
//! Each process registers itself in the shared store under a node id with a
//! TTL of `heartbeat_interval * stale_multiple`, and refreshes that entry on
//! every heartbeat. The live node count is the number of unexpired entries.
//!
//! The hot path never queries the store for the count: it reads the value
//! cached by the last heartbeat, so the counter increment stays the only
//! store round trip per request.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::storage::Storage;

/// Node registration settings.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// This process's id. A random v4 UUID unless set.
    pub node_id: String,
    /// How often the registration is refreshed.
    pub heartbeat_interval: Duration,
    /// Missed heartbeats after which a node counts as gone.
    pub stale_multiple: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            node_id: uuid::Uuid::new_v4().to_string(),
            heartbeat_interval: Duration::from_secs(10),
            stale_multiple: 3,
        }
    }
}

impl CoordinatorConfig {
    /// Default settings with a fresh node id.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a fixed node id.
    pub fn with_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = node_id.into();
        self
    }

    /// Set the heartbeat interval.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set how many missed heartbeats make a node stale.
    pub fn with_stale_multiple(mut self, multiple: u32) -> Self {
        self.stale_multiple = multiple.max(1);
        self
    }

    /// Lifetime of one registration.
    pub fn registration_ttl(&self) -> Duration {
        self.heartbeat_interval * self.stale_multiple.max(1)
    }
}

/// Registers this process and tracks how many are alive.
pub struct Coordinator<S> {
    storage: Arc<S>,
    config: CoordinatorConfig,
    cached_count: Arc<AtomicU64>,
    shutdown: Arc<Notify>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<S> std::fmt::Debug for Coordinator<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("node_id", &self.config.node_id)
            .field("heartbeat_interval", &self.config.heartbeat_interval)
            .field("cached_count", &self.cached_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl<S: Storage> Coordinator<S> {
    /// Create a coordinator. Nothing is registered until [`register`](Self::register).
    pub fn new(storage: Arc<S>, config: CoordinatorConfig) -> Self {
        Self {
            storage,
            config,
            cached_count: Arc::new(AtomicU64::new(1)),
            shutdown: Arc::new(Notify::new()),
            task: Mutex::new(None),
        }
    }

    /// This process's node id.
    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    /// The settings in use.
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Announce this node and refresh the cached count.
    pub async fn register(&self) -> Result<()> {
        self.storage
            .touch_node(&self.config.node_id, self.config.registration_ttl())
            .await?;
        let live = self.refresh().await;
        info!(node_id = %self.config.node_id, live_nodes = live, "node registered");
        Ok(())
    }

    /// Extend this node's registration and refresh the cached count.
    pub async fn heartbeat(&self) -> Result<()> {
        self.storage
            .touch_node(&self.config.node_id, self.config.registration_ttl())
            .await?;
        self.refresh().await;
        Ok(())
    }

    /// Live nodes according to the store, at least one.
    ///
    /// A store failure reads as a single node.
    pub async fn live_node_count(&self) -> u64 {
        match self.storage.live_node_count().await {
            Ok(count) => count.max(1),
            Err(e) => {
                warn!(error = %e, "node count unavailable, assuming a single node");
                1
            }
        }
    }

    /// Re-read the live count into the cache and return it.
    pub async fn refresh(&self) -> u64 {
        let count = self.live_node_count().await;
        self.cached_count.store(count, Ordering::Relaxed);
        count
    }

    /// Live count as of the last refresh, at least one.
    pub fn cached_node_count(&self) -> u64 {
        self.cached_count.load(Ordering::Relaxed).max(1)
    }

    /// Spawn the heartbeat task. Calling it again while running does nothing.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }

        let storage = Arc::clone(&self.storage);
        let node_id = self.config.node_id.clone();
        let ttl = self.config.registration_ttl();
        let cached = Arc::clone(&self.cached_count);
        let shutdown = Arc::clone(&self.shutdown);
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval);

        *task = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = storage.touch_node(&node_id, ttl).await {
                            warn!(node_id = %node_id, error = %e, "heartbeat failed");
                            continue;
                        }
                        match storage.live_node_count().await {
                            Ok(count) => {
                                cached.store(count.max(1), Ordering::Relaxed);
                                debug!(node_id = %node_id, live_nodes = count, "heartbeat");
                            }
                            Err(e) => {
                                cached.store(1, Ordering::Relaxed);
                                warn!(error = %e, "node count unavailable, assuming a single node");
                            }
                        }
                    }
                    _ = shutdown.notified() => break,
                }
            }
        }));
    }

    /// Stop the heartbeat task and deregister this node.
    pub async fn shutdown(&self) -> Result<()> {
        let task = self.task.lock().take();
        if let Some(task) = task {
            self.shutdown.notify_one();
            // A cancelled or panicked heartbeat task has nothing left to clean up.
            let _ = task.await;
        }
        self.storage.remove_node(&self.config.node_id).await?;
        info!(node_id = %self.config.node_id, "node deregistered");
        Ok(())
    }
}

impl<S> Drop for Coordinator<S> {
    fn drop(&mut self) {
        if self.task.get_mut().is_some() {
            self.shutdown.notify_one();
        }
    }
}

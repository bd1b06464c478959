//! Records owned by the storage backend.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Hit counter for one key in one fixed window.
///
/// Created on the first hit of a window and dropped once `expires_at` has
/// passed or the key is reset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitRecord {
    /// Hits recorded in the current window.
    pub count: u64,

    /// Window start (Unix milliseconds).
    pub window_started_at: u64,

    /// Window end (Unix milliseconds). Equal to `window_started_at + window`.
    pub expires_at: u64,

    /// Whether a hit in this window already broke its limit.
    #[serde(default)]
    pub violated: bool,
}

impl RateLimitRecord {
    /// Create a record for a window starting at `window_started_at`.
    pub fn new(count: u64, window_started_at: u64, window: Duration) -> Self {
        Self {
            count,
            window_started_at,
            expires_at: window_started_at.saturating_add(crate::clock::duration_ms(window)),
            violated: false,
        }
    }

    /// Whether this is the live window that opened at `window_started_at`.
    pub fn is_window(&self, window_started_at: u64, now_ms: u64) -> bool {
        self.window_started_at == window_started_at && !self.is_expired(now_ms)
    }

    /// Milliseconds until the window resets.
    pub fn ttl_remaining_ms(&self, now_ms: u64) -> u64 {
        self.expires_at.saturating_sub(now_ms)
    }

    /// Whether the window is over.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at
    }
}

/// A cool-down imposed on a key after it broke its limit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockRecord {
    /// Rejection holds until this instant (Unix milliseconds).
    pub blocked_until: u64,

    /// Why the key was blocked.
    pub reason: String,
}

impl BlockRecord {
    /// Create a block that lasts `duration` from `now_ms`.
    pub fn new(now_ms: u64, duration: Duration, reason: impl Into<String>) -> Self {
        Self {
            blocked_until: now_ms.saturating_add(crate::clock::duration_ms(duration)),
            reason: reason.into(),
        }
    }

    /// Whether the block still applies.
    pub fn is_active(&self, now_ms: u64) -> bool {
        now_ms < self.blocked_until
    }

    /// Milliseconds left on the block.
    pub fn remaining_ms(&self, now_ms: u64) -> u64 {
        self.blocked_until.saturating_sub(now_ms)
    }
}

/// Which store served a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// The network store shared by every process.
    Shared,
    /// This process's in-memory map.
    Local,
}

impl Backend {
    /// Lowercase name used in logs and stats.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shared => "shared",
            Self::Local => "local",
        }
    }
}

/// Backend description returned by [`Storage::info`](crate::storage::Storage::info).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreInfo {
    /// Backend currently answering.
    pub backend: Backend,
    /// Live nodes registered in that backend.
    pub node_count: u64,
}

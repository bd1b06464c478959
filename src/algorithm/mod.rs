//! Counting algorithm trait and the fixed-window implementation.
//!
//! The algorithm turns one storage increment into a [`Verdict`]. It is also
//! where a first violation in a window turns into a block.

mod fixed_window;

pub use fixed_window::FixedWindow;

use std::future::Future;

use crate::decision::{RateLimitInfo, Verdict};
use crate::error::Result;
use crate::quota::Quota;
use crate::storage::Storage;

/// Rate limiting algorithm trait.
///
/// Implementations must be thread-safe; one instance serves every request
/// of a limiter.
pub trait Algorithm: Send + Sync + 'static {
    /// Get the algorithm name (for logging).
    fn name(&self) -> &'static str;

    /// Count the request against `key` and decide.
    ///
    /// The hit is recorded whether or not it is admitted, so the window's
    /// true hit rate stays observable.
    fn check_and_record<S: Storage>(
        &self,
        storage: &S,
        key: &str,
        quota: &Quota,
        now_ms: u64,
    ) -> impl Future<Output = Result<Verdict>> + Send;

    /// Current state of `key` without counting anything.
    ///
    /// `None` when the key has no hits in a live window.
    fn check<S: Storage>(
        &self,
        storage: &S,
        key: &str,
        quota: &Quota,
        now_ms: u64,
    ) -> impl Future<Output = Result<Option<RateLimitInfo>>> + Send;

    /// Reset the counter for a key.
    fn reset<S: Storage>(&self, storage: &S, key: &str) -> impl Future<Output = Result<()>> + Send {
        async move { storage.reset(key).await }
    }
}

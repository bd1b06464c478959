//! Distributed request admission for Rust services.
//!
//! `flowgate` decides, per request, whether a caller is still within its
//! limit:
//!
//! - **Fixed windows**: one atomic counter per key and window, with an
//!   optional even pacing of admitted hits
//! - **Blocks**: a cool-down set on a key the moment it first breaks its
//!   limit, outliving the window
//! - **Shared store with fail-open fallback**: Redis shared by every
//!   process, an in-memory map while Redis is unreachable
//! - **Quota resolution**: per-route, tier-based, payload-cost and custom
//!   async rules, each bounded by a timeout
//! - **Fair division**: a global ceiling split across the live nodes of a
//!   cluster
//! - **Framework integration**: an Axum/Tower layer
//!
//! # Quick Start
//!
//! ```ignore
//! use flowgate::{MemoryStorage, Quota, RateLimiter, RequestInfo};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> flowgate::Result<()> {
//!     let limiter = RateLimiter::builder(MemoryStorage::new())
//!         .quota(Quota::per_minute(5).with_block_duration(Duration::from_secs(3600)))
//!         .key_prefix("auth")
//!         .build()?;
//!
//!     let request = RequestInfo::new("POST", "/login").with_ip("203.0.113.9".parse().unwrap());
//!     let verdict = limiter.check(&request).await;
//!
//!     if verdict.is_allowed() {
//!         println!("admitted, {} left", verdict.info().remaining);
//!     } else {
//!         println!("rejected, retry in {}s", verdict.info().retry_after_seconds());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Feature Flags
//!
//! - `memory` (default): In-memory storage with garbage collection, and the
//!   failover wrapper built on it
//! - `redis`: Redis storage backend
//! - `axum`: Axum middleware integration
//! - `full`: all of the above

pub mod algorithm;
pub mod block;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod decision;
pub mod error;
pub mod extensions;
pub mod headers;
pub mod key;
pub mod limiter;
pub mod manager;
pub mod policy;
pub mod quota;
pub mod request;
pub mod resolver;
pub mod storage;

#[cfg(feature = "axum")]
pub mod middleware;

// Re-export main types
pub use algorithm::{Algorithm, FixedWindow};
pub use block::BlockTracker;
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::LimiterConfig;
pub use coordinator::{Coordinator, CoordinatorConfig};
pub use decision::{Outcome, RateLimitInfo, RejectionKind, Verdict};
pub use error::{ConfigError, ConnectionError, RateLimitError, Result, StorageError};
pub use key::{CompositeKey, EitherKey, FnKey, Key, KeyStrategy, OptionalKey};
pub use limiter::{RateLimiter, RateLimiterBuilder};
pub use manager::{KeyStatus, RateLimitManager, UsageStats};
pub use quota::{Quota, QuotaBuilder};
pub use request::{Identity, RequestInfo};
pub use resolver::{CostMeasure, CostResolver, FnResolver, Limit, QuotaResolver, ResolverChain, RouteResolver, TieredResolver};
pub use storage::{Backend, BlockRecord, RateLimitRecord, Storage, StoreInfo};

// Re-export policy types
pub use policy::{CompositePolicy, DefaultPolicy, Policy, SkipFailed, SkipSuccessful};

// Re-export extensions and headers
pub use extensions::{RateLimitExt, RejectionBody};
pub use headers::{HeaderStyle, RateLimitHeaders};

// Re-export storage types
#[cfg(feature = "memory")]
pub use storage::{FailoverConfig, FailoverStorage, GcConfig, GcInterval, MemoryStorage};

#[cfg(feature = "redis")]
pub use storage::{RedisConfig, RedisStorage};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::decision::{Outcome, RateLimitInfo, Verdict};
    pub use crate::error::{RateLimitError, Result};
    pub use crate::key::KeyStrategy;
    pub use crate::limiter::RateLimiter;
    pub use crate::quota::Quota;
    pub use crate::request::{Identity, RequestInfo};
    pub use crate::resolver::{Limit, QuotaResolver};
    pub use crate::storage::Storage;

    #[cfg(feature = "memory")]
    pub use crate::storage::{FailoverStorage, GcConfig, MemoryStorage};
}

#[cfg(test)]
mod tests {
    #[cfg(feature = "memory")]
    #[tokio::test]
    async fn test_integration_login_flow() {
        use crate::prelude::*;
        use std::time::Duration;

        let limiter = RateLimiter::builder(MemoryStorage::new())
            .quota(Quota::per_minute(3).with_block_duration(Duration::from_secs(600)))
            .key_strategy(KeyStrategy::Composite { field: "email".into() })
            .key_prefix("login")
            .build()
            .unwrap();

        let attempt = RequestInfo::new("POST", "/login")
            .with_ip("10.0.0.1".parse().unwrap())
            .with_body(r#"{"email":"Ops@Example.com"}"#);

        for i in 1..=3 {
            let verdict = limiter.check(&attempt).await;
            assert!(verdict.is_allowed(), "attempt {} should be admitted", i);
        }

        let verdict = limiter.check(&attempt).await;
        assert_eq!(verdict.outcome(), Outcome::LimitExceeded);
        assert_eq!(verdict.key(), "login:ip:10.0.0.1|email:ops@example.com");
        assert_eq!(verdict.info().retry_after_seconds(), 600);

        let verdict = limiter.check(&attempt).await;
        assert_eq!(verdict.outcome(), Outcome::Blocked);
    }

    #[cfg(feature = "memory")]
    #[tokio::test]
    async fn test_integration_headers() {
        use crate::prelude::*;

        let limiter = RateLimiter::builder(MemoryStorage::new())
            .quota(Quota::per_minute(100))
            .header_style(crate::HeaderStyle::both())
            .build()
            .unwrap();

        let verdict = limiter.check(&RequestInfo::new("GET", "/")).await;
        let headers = limiter.response_headers(&verdict);
        assert!(headers.iter().any(|(k, v)| *k == "RateLimit-Policy" && v == "100;w=60"));
        assert!(headers.iter().any(|(k, _)| *k == "X-RateLimit-Reset"));
        assert!(headers.iter().all(|(k, _)| *k != "Retry-After"));
    }
}

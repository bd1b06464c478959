//! Axum middleware for rate limiting.
//!
//! Provides a Tower-compatible layer that runs a [`RateLimiter`] in front of
//! an Axum router. Admitted requests carry a
//! [`RateLimitExt`](crate::extensions::RateLimitExt) extension and get the
//! limit headers on their response; rejected ones are answered with the JSON
//! rejection body and never reach the handler.
//!
//! The peer address comes from `ConnectInfo<SocketAddr>`, so serve the
//! router with `into_make_service_with_connect_info::<SocketAddr>()`. An
//! authenticated caller is picked up from an [`Identity`] request extension
//! set by an outer layer.
//!
//! # Example
//!
//! ```ignore
//! use axum::{Router, routing::post};
//! use flowgate::{middleware::RateLimitLayer, KeyStrategy, MemoryStorage, Quota, RateLimiter};
//!
//! let limiter = RateLimiter::builder(MemoryStorage::new())
//!     .quota(Quota::new(5, Duration::from_secs(900)))
//!     .key_strategy(KeyStrategy::Composite { field: "email".into() })
//!     .build()?;
//!
//! let app = Router::new()
//!     .route("/login", post(handler))
//!     .layer(RateLimitLayer::new(limiter));
//! ```
//!
//! [`RateLimiter`]: crate::limiter::RateLimiter
//! [`Identity`]: crate::request::Identity

mod layer;

pub use layer::{RateLimitLayer, RateLimitService};

//! Quota resolution example: routes, tiers, payload cost and a custom hook.
//!
//! Run with:
//! ```
//! RUST_LOG=flowgate=debug cargo run --example tiered_policies --features memory
//! ```

use std::time::Duration;

use flowgate::{
    CostResolver, FnResolver, Identity, Limit, MemoryStorage, Quota, RateLimitError, RateLimiter, RequestInfo,
    RouteResolver, TieredResolver,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let limiter = RateLimiter::builder(MemoryStorage::new())
        .quota(Quota::per_minute(100))
        .resolver(
            RouteResolver::new()
                .route("/auth/login", Limit::new(5, Duration::from_secs(900)))
                .route_pattern("/reports/**", Limit::per_hour(20)),
        )
        .resolver(TieredResolver::standard())
        .resolver(CostResolver::new(1000, 200, 50))
        .resolver(FnResolver::new(|req: &RequestInfo| {
            let banned = req.identity().is_some_and(|identity| identity.id == "banned");
            async move { Ok::<_, RateLimitError>(banned.then(|| Limit::per_hour(1))) }
        }))
        .resolver_timeout(Duration::from_millis(50))
        .build()?;

    println!("=== Quota Resolution Demo ===\n");

    let requests = vec![
        ("anonymous", RequestInfo::new("GET", "/items")),
        ("login", RequestInfo::new("POST", "/auth/login")),
        ("report", RequestInfo::new("GET", "/reports/2024/q1")),
        (
            "premium",
            RequestInfo::new("GET", "/items").with_identity(Identity::new("u1").with_tier("premium")),
        ),
        (
            "large query",
            RequestInfo::new("POST", "/search").with_body("q".repeat(2048)),
        ),
        ("banned", RequestInfo::new("GET", "/items").with_identity(Identity::new("banned"))),
    ];

    for (label, request) in requests {
        let quota = limiter.resolve_quota(&request).await;
        println!(
            "{:<12} -> {} per {}s",
            label,
            quota.max(),
            quota.window().as_secs()
        );
    }

    Ok(())
}

//! Basic fixed-window example with a login block.
//!
//! Run with:
//! ```
//! RUST_LOG=flowgate=debug cargo run --example basic_window --features memory
//! ```

use std::time::Duration;

use flowgate::{MemoryStorage, Quota, RateLimiter, RequestInfo};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 5 attempts per 15 minutes, then an hour of cool-down
    let limiter = RateLimiter::builder(MemoryStorage::new())
        .quota(Quota::new(5, Duration::from_secs(900)).with_block_duration(Duration::from_secs(3600)))
        .key_prefix("auth")
        .build()?;

    println!("=== Fixed Window Demo ===\n");

    let attempt = RequestInfo::new("POST", "/auth/login").with_ip("203.0.113.9".parse()?);

    for i in 1..=7 {
        let verdict = limiter.check(&attempt).await;
        match limiter.rejection_body(&verdict) {
            None => println!("attempt {}: admitted, {} left", i, verdict.info().remaining),
            Some(body) => println!(
                "attempt {}: {} {} (retry in {}s)",
                i,
                limiter.rejection_status(&verdict).unwrap_or(429),
                body.error.code,
                body.error.retry_after_sec
            ),
        }
    }

    println!("\nheaders on the last response:");
    let verdict = limiter.check(&attempt).await;
    for (name, value) in limiter.response_headers(&verdict) {
        println!("  {}: {}", name, value);
    }

    Ok(())
}

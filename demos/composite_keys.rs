//! Composite key example - rate limit login attempts per address and email.
//!
//! Run with:
//! ```
//! cargo run --example composite_keys --features memory
//! ```

use flowgate::{KeyStrategy, LimiterConfig, MemoryStorage, RateLimiter, RequestInfo};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = LimiterConfig::from_json(
        r#"{
            "max": 3,
            "window_ms": 60000,
            "key_prefix": "login",
            "key_strategy": { "composite": { "field": "email" } },
            "legacy_headers": true
        }"#,
    )?;
    let limiter = RateLimiter::from_config(MemoryStorage::new(), &config)?;

    println!("=== Composite Key Demo ===\n");
    println!("Strategy: {}\n", KeyStrategy::Composite { field: "email".into() }.name());

    let scenarios = [
        ("10.0.0.1", "alice@example.com"),
        ("10.0.0.1", "alice@example.com"),
        ("10.0.0.1", "Alice@Example.com"),
        ("10.0.0.1", "alice@example.com"),
        ("10.0.0.1", "bob@example.com"),
        ("10.0.0.2", "alice@example.com"),
    ];

    for (ip, email) in scenarios {
        let request = RequestInfo::new("POST", "/login")
            .with_ip(ip.parse()?)
            .with_body(format!(r#"{{"email":"{}"}}"#, email));
        let verdict = limiter.check(&request).await;
        println!(
            "{:<10} {:<20} {:<8} key={}",
            ip,
            email,
            if verdict.is_allowed() { "admitted" } else { "rejected" },
            verdict.key()
        );
    }

    Ok(())
}

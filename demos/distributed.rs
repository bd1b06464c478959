//! Distributed example - three nodes share a global ceiling.
//!
//! Each node registers itself in the shared store and divides the ceiling
//! by the number of live nodes. With Redis available, swap the memory store
//! for `FailoverStorage::new(RedisStorage::from_url(..).await?)`.
//!
//! Run with:
//! ```
//! RUST_LOG=flowgate=info cargo run --example distributed --features memory
//! ```

use std::sync::Arc;
use std::time::Duration;

use flowgate::{CoordinatorConfig, MemoryStorage, Quota, RateLimitManager, RateLimiter, RequestInfo};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let storage = Arc::new(MemoryStorage::new());

    let mut nodes = Vec::new();
    for id in ["node-a", "node-b", "node-c"] {
        let limiter = RateLimiter::builder_shared(Arc::clone(&storage))
            .quota(Quota::per_minute(300))
            .distributed(
                CoordinatorConfig::new()
                    .with_node_id(id)
                    .with_heartbeat_interval(Duration::from_millis(200)),
            )
            .build()?;
        limiter.start().await?;
        nodes.push(Arc::new(limiter));
    }

    // Let every node see the others
    tokio::time::sleep(Duration::from_millis(300)).await;

    println!("=== Distributed Demo ===\n");
    let request = RequestInfo::new("GET", "/").with_ip("192.0.2.1".parse()?);
    for node in &nodes {
        let quota = node.resolve_quota(&request).await;
        println!("{} ceiling: {}", node.coordinator().map(|c| c.node_id()).unwrap_or("-"), quota.max());
    }

    let manager = RateLimitManager::new(Arc::clone(&nodes[0]));
    println!("\nstats: {:?}", manager.stats().await?);

    // Two nodes leave
    for node in &nodes[1..] {
        node.shutdown().await?;
    }
    tokio::time::sleep(Duration::from_millis(300)).await;

    let quota = nodes[0].resolve_quota(&request).await;
    println!("\nafter scale-in, node-a ceiling: {}", quota.max());

    nodes[0].shutdown().await?;
    Ok(())
}

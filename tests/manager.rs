//! Integration tests for the management surface.

use std::sync::Arc;
use std::time::Duration;

use flowgate::storage::GcConfig;
use tokio_test::assert_ok;
use flowgate::{
    Backend, Clock, ManualClock, MemoryStorage, Outcome, Quota, RateLimitManager, RateLimiter, RequestInfo, SharedClock,
};

fn setup(clock: &ManualClock) -> RateLimitManager<MemoryStorage> {
    let shared: SharedClock = Arc::new(clock.clone());
    let storage = MemoryStorage::with_gc_and_clock(GcConfig::manual(), Arc::clone(&shared));
    let limiter = RateLimiter::builder(storage)
        .quota(Quota::per_minute(3).with_block_duration(Duration::from_secs(600)))
        .key_prefix("api")
        .clock(shared)
        .build()
        .unwrap();
    RateLimitManager::new(Arc::new(limiter))
}

fn request() -> RequestInfo {
    RequestInfo::new("GET", "/orders").with_ip("203.0.113.20".parse().unwrap())
}

const KEY: &str = "api:ip:203.0.113.20";

#[tokio::test]
async fn test_reset_starts_a_fresh_window() {
    let clock = ManualClock::default();
    let manager = setup(&clock);
    let limiter = Arc::clone(manager.limiter());

    for _ in 0..4 {
        limiter.check(&request()).await;
    }
    assert_eq!(limiter.check(&request()).await.outcome(), Outcome::Blocked);

    manager.reset(KEY).await.unwrap();

    let verdict = limiter.check(&request()).await;
    assert!(verdict.is_allowed());
    assert_eq!(verdict.info().current, 1);
    assert_eq!(verdict.info().remaining, 2);
}

#[tokio::test]
async fn test_reset_is_idempotent() {
    let clock = ManualClock::default();
    let manager = setup(&clock);

    manager.limiter().check(&request()).await;
    assert_ok!(manager.reset(KEY).await);
    assert_ok!(manager.reset(KEY).await);
    assert_ok!(manager.reset("api:ip:never-seen").await);

    let status = manager.status(KEY).await.unwrap();
    assert_eq!(status.count, 0);
    assert!(!status.is_blocked());
}

#[tokio::test]
async fn test_status_reports_block() {
    let clock = ManualClock::default();
    let manager = setup(&clock);

    for _ in 0..4 {
        manager.limiter().check(&request()).await;
    }
    clock.advance(Duration::from_secs(120));

    let status = manager.status(KEY).await.unwrap();
    assert_eq!(status.count, 0);
    let block = status.block.unwrap();
    assert_eq!(block.reason, "rate limit exceeded");
    assert_eq!(block.remaining_ms(clock.now_ms()), 480_000);
}

#[tokio::test]
async fn test_operator_blocks() {
    let clock = ManualClock::default();
    let manager = setup(&clock);

    assert!(manager.block(KEY, Duration::ZERO, "noop").await.unwrap().is_none());
    manager.block(KEY, Duration::from_secs(60), "manual review").await.unwrap();
    manager.block("api:ip:198.51.100.4", Duration::from_secs(60), "abuse").await.unwrap();

    let keys: Vec<_> = manager.blocked_keys().await.unwrap().into_iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec!["api:ip:198.51.100.4".to_string(), KEY.to_string()]);

    let verdict = manager.limiter().check(&request()).await;
    assert_eq!(verdict.outcome(), Outcome::Blocked);

    manager.unblock(KEY).await.unwrap();
    assert!(manager.limiter().check(&request()).await.is_allowed());

    // Blocks lapse on their own
    clock.advance(Duration::from_secs(61));
    assert!(manager.blocked_keys().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_usage_stats() {
    let clock = ManualClock::default();
    let manager = setup(&clock);
    let limiter = manager.limiter();

    for ip in ["10.0.0.1", "10.0.0.1", "10.0.0.2", "10.0.0.3"] {
        limiter.check(&RequestInfo::new("GET", "/").with_ip(ip.parse().unwrap())).await;
    }

    let stats = manager.stats().await.unwrap();
    assert_eq!(stats.tracked_keys, 3);
    assert_eq!(stats.total_hits, 4);
    assert_eq!(stats.blocked_keys, 0);
    assert_eq!(stats.backend, Backend::Local);
    assert_eq!(stats.node_count, 0);

    clock.advance(Duration::from_secs(60));
    assert_eq!(manager.stats().await.unwrap().tracked_keys, 0);
}

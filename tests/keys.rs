//! Integration tests for key extractors.

use flowgate::key::{
    BodyFieldKey, CompositeKey, EitherKey, IdentityKey, IpKey, Key, KeyStrategy, OptionalKey, PathKey, derive_key,
};
use flowgate::{Identity, MemoryStorage, Quota, RateLimiter, RequestInfo};

fn request() -> RequestInfo {
    RequestInfo::new("POST", "/api/login").with_ip("192.0.2.10".parse().unwrap())
}

#[test]
fn test_composite_key_two_parts() {
    let key = CompositeKey::new(IpKey::new(), PathKey::new());
    assert_eq!(key.extract(&request()), Some("ip:192.0.2.10|path:/api/login".to_string()));
}

#[test]
fn test_composite_key_with_separator() {
    let key = CompositeKey::with_separator(IdentityKey::new(), PathKey::new(), ":");
    let req = request().with_identity(Identity::new("9"));
    assert_eq!(key.extract(&req), Some("user:9:path:/api/login".to_string()));
}

#[test]
fn test_either_key_falls_back_for_anonymous_callers() {
    let key = EitherKey::new(IdentityKey::new(), IpKey::new());

    assert_eq!(key.extract(&request()), Some("ip:192.0.2.10".to_string()));
    let signed_in = request().with_identity(Identity::new("42"));
    assert_eq!(key.extract(&signed_in), Some("user:42".to_string()));
}

#[test]
fn test_optional_key_default() {
    let key = OptionalKey::new(BodyFieldKey::new("email"), "-");
    assert_eq!(key.extract(&request()), Some("-".to_string()));
}

#[test]
fn test_forwarded_for_takes_first_hop() {
    let key = IpKey::with_forwarded_for();
    let proxied = request().with_header("X-Forwarded-For", "203.0.113.5, 10.0.0.1");
    assert_eq!(key.extract(&proxied), Some("ip:203.0.113.5".to_string()));

    // Without forwarding support the peer address is used
    assert_eq!(IpKey::new().extract(&proxied), Some("ip:192.0.2.10".to_string()));
}

#[test]
fn test_body_field_normalization() {
    let key = BodyFieldKey::new("email");
    let req = request().with_body(r#"{"email":"  Alice@Example.COM "}"#);
    assert_eq!(key.extract(&req), Some("email:alice@example.com".to_string()));

    let numeric = BodyFieldKey::new("account");
    assert_eq!(
        numeric.extract(&request().with_body(r#"{"account":1042}"#)),
        Some("account:1042".to_string())
    );
    assert_eq!(numeric.extract(&request().with_body(r#"{"account":[1]}"#)), None);
    assert_eq!(numeric.extract(&request().with_body("not json")), None);
}

#[test]
fn test_path_key() {
    assert_eq!(PathKey::new().extract(&request()), Some("path:/api/login".to_string()));
}

#[test]
fn test_strategies_ignore_forwarded_header_by_default() {
    for strategy in [
        KeyStrategy::Ip,
        KeyStrategy::Identity,
        KeyStrategy::Composite { field: "email".into() },
    ] {
        let key = strategy.build(false);
        let plain = derive_key(&*key, &request(), "rl");
        let spoofed = request().with_header("X-Forwarded-For", "198.51.100.1");
        assert_eq!(derive_key(&*key, &spoofed, "rl"), plain, "{} followed the header", strategy.name());
    }
}

#[tokio::test]
async fn test_rotating_forwarded_header_shares_one_bucket() {
    let limiter = RateLimiter::builder(MemoryStorage::new())
        .quota(Quota::per_minute(1))
        .build()
        .unwrap();

    let mut admitted = 0;
    for hop in 1..=20 {
        let req = RequestInfo::new("POST", "/login")
            .with_ip("203.0.113.9".parse().unwrap())
            .with_header("x-forwarded-for", format!("198.51.100.{hop}"));
        if limiter.check(&req).await.is_allowed() {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 1);
}

#[tokio::test]
async fn test_trusted_proxy_keys_by_forwarded_client() {
    let limiter = RateLimiter::builder(MemoryStorage::new())
        .quota(Quota::per_minute(1))
        .trust_proxy(true)
        .build()
        .unwrap();

    let via_proxy = |client: &str| {
        RequestInfo::new("GET", "/")
            .with_ip("10.0.0.2".parse().unwrap())
            .with_header("x-forwarded-for", format!("{client}, 10.0.0.2"))
    };
    assert!(limiter.check(&via_proxy("198.51.100.1")).await.is_allowed());
    assert!(limiter.check(&via_proxy("198.51.100.2")).await.is_allowed());
    assert!(limiter.check(&via_proxy("198.51.100.1")).await.is_denied());
}

#[test]
fn test_strategies_from_configuration() {
    let strategy: KeyStrategy = serde_json::from_str(r#"{"composite":{"field":"email"}}"#).unwrap();
    let key = strategy.build(false);
    let req = request().with_body(r#"{"email":"bob@example.com"}"#);

    assert_eq!(derive_key(&*key, &req, "auth"), "auth:ip:192.0.2.10|email:bob@example.com");
    assert_eq!(derive_key(&*key, &request(), "auth"), "auth:ip:192.0.2.10|-");
}

#[test]
fn test_unknown_key_for_empty_requests() {
    let key = KeyStrategy::Identity.build(false);
    assert_eq!(derive_key(&*key, &RequestInfo::new("GET", "/"), "rl"), "rl:unknown");
}

#[test]
fn test_custom_strategy() {
    let strategy = KeyStrategy::from_fn("tenant", |req: &RequestInfo| {
        req.identity().map(|identity| format!("tenant:{}", identity.id))
    });
    assert_eq!(strategy.name(), "tenant");

    let key = strategy.build(false);
    let req = request().with_identity(Identity::new("acme"));
    assert_eq!(derive_key(&*key, &req, "rl"), "rl:tenant:acme");
}

//! Key derivation.
//!
//! A key names the bucket a request is counted in. The limiter derives it
//! from the request through a [`Key`] extractor, then namespaces it with the
//! quota's key prefix so several limiters can share one store.
//!
//! # Example
//!
//! ```ignore
//! use flowgate::key::{EitherKey, IdentityKey, IpKey, KeyStrategy};
//!
//! // Authenticated callers by id, everyone else by address
//! let key = EitherKey::new(IdentityKey::new(), IpKey::new());
//!
//! // The same thing, picked from configuration
//! let key = KeyStrategy::Identity.build(false);
//! ```

mod composite;
mod extractors;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::request::RequestInfo;

pub use composite::{CompositeKey, EitherKey, OptionalKey};
pub use extractors::*;

/// Bucket name used when an extractor yields nothing.
pub const UNKNOWN_KEY: &str = "unknown";

/// Trait for extracting rate limiting keys from requests.
///
/// Return `None` when the request does not carry what the extractor needs;
/// the limiter then counts it under [`UNKNOWN_KEY`].
///
/// # Type Parameters
///
/// - `R`: The request type, normally [`RequestInfo`]
pub trait Key<R>: Send + Sync + 'static {
    /// Extract a rate limiting key from the request.
    fn extract(&self, request: &R) -> Option<String>;

    /// Get the key name for logging.
    fn name(&self) -> &'static str;
}

impl<R, K: Key<R> + ?Sized> Key<R> for Arc<K> {
    fn extract(&self, request: &R) -> Option<String> {
        (**self).extract(request)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

impl<R, K: Key<R> + ?Sized> Key<R> for Box<K> {
    fn extract(&self, request: &R) -> Option<String> {
        (**self).extract(request)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// A shared, type-erased extractor over [`RequestInfo`].
pub type SharedKey = Arc<dyn Key<RequestInfo>>;

/// Derive the namespaced bucket key `"{prefix}:{key}"`.
pub fn derive_key<R, K: Key<R> + ?Sized>(key: &K, request: &R, prefix: &str) -> String {
    let raw = key
        .extract(request)
        .unwrap_or_else(|| UNKNOWN_KEY.to_string());
    format!("{}:{}", prefix, raw)
}

/// A key extractor backed by a closure.
#[derive(Clone)]
pub struct FnKey<F> {
    extractor: F,
    name: &'static str,
}

impl<F> std::fmt::Debug for FnKey<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnKey").field("name", &self.name).finish()
    }
}

impl<F> FnKey<F> {
    /// Create a new function-based key extractor.
    pub fn new(name: &'static str, extractor: F) -> Self {
        Self { extractor, name }
    }
}

impl<R, F> Key<R> for FnKey<F>
where
    F: Fn(&R) -> Option<String> + Send + Sync + 'static,
{
    fn extract(&self, request: &R) -> Option<String> {
        (self.extractor)(request)
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

/// Caller-supplied extractor carried inside a [`KeyStrategy`].
#[derive(Clone)]
pub struct CustomKey(pub SharedKey);

impl std::fmt::Debug for CustomKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CustomKey").field(&self.0.name()).finish()
    }
}

/// How a limiter derives keys, as named in configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    /// Caller network address.
    #[default]
    Ip,
    /// Authenticated caller id, falling back to the address.
    Identity,
    /// Identity (or address) plus a top-level JSON body field.
    Composite {
        /// Body field to add, e.g. `"email"`.
        field: String,
    },
    /// Any extractor. Only settable in code.
    #[serde(skip)]
    Custom(CustomKey),
}

impl KeyStrategy {
    /// Wrap a custom extractor.
    pub fn custom<K: Key<RequestInfo>>(key: K) -> Self {
        Self::Custom(CustomKey(Arc::new(key)))
    }

    /// Wrap a closure.
    pub fn from_fn<F>(name: &'static str, f: F) -> Self
    where
        F: Fn(&RequestInfo) -> Option<String> + Send + Sync + 'static,
    {
        Self::custom(FnKey::new(name, f))
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ip => "ip",
            Self::Identity => "identity",
            Self::Composite { .. } => "composite",
            Self::Custom(custom) => custom.0.name(),
        }
    }

    /// Build the extractor this strategy names.
    ///
    /// Addresses come from the peer unless `trust_proxy` is set, in which
    /// case the first `X-Forwarded-For` hop wins. Custom extractors are
    /// returned as they are.
    pub fn build(&self, trust_proxy: bool) -> SharedKey {
        let ip = || {
            if trust_proxy {
                IpKey::with_forwarded_for()
            } else {
                IpKey::new()
            }
        };
        match self {
            Self::Ip => Arc::new(ip()),
            Self::Identity => Arc::new(EitherKey::new(IdentityKey::new(), ip())),
            Self::Composite { field } => Arc::new(CompositeKey::new(
                EitherKey::new(IdentityKey::new(), ip()),
                OptionalKey::new(BodyFieldKey::new(field.clone()), "-"),
            )),
            Self::Custom(custom) => Arc::clone(&custom.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Identity;

    fn request() -> RequestInfo {
        RequestInfo::new("POST", "/login").with_ip("10.1.2.3".parse().unwrap())
    }

    #[test]
    fn test_fn_key() {
        let key: FnKey<fn(&i32) -> Option<String>> = FnKey::new("custom", |n: &i32| Some(format!("n{}", n)));
        assert_eq!(key.extract(&42), Some("n42".to_string()));
        assert_eq!(key.name(), "custom");
    }

    #[test]
    fn test_derive_key_prefix_and_unknown() {
        let key = KeyStrategy::Ip.build(false);
        assert_eq!(derive_key(&*key, &request(), "rl"), "rl:ip:10.1.2.3");
        assert_eq!(derive_key(&*key, &RequestInfo::new("GET", "/"), "rl"), "rl:unknown");
    }

    #[test]
    fn test_forwarded_header_needs_trusted_proxy() {
        let spoofed = request().with_header("x-forwarded-for", "198.51.100.77");

        let direct = KeyStrategy::Identity.build(false);
        assert_eq!(direct.extract(&spoofed), Some("ip:10.1.2.3".to_string()));

        let proxied = KeyStrategy::Identity.build(true);
        assert_eq!(proxied.extract(&spoofed), Some("ip:198.51.100.77".to_string()));
    }

    #[test]
    fn test_identity_strategy_falls_back_to_ip() {
        let key = KeyStrategy::Identity.build(false);
        assert_eq!(key.extract(&request()), Some("ip:10.1.2.3".to_string()));

        let authed = request().with_identity(Identity::new("u1"));
        assert_eq!(key.extract(&authed), Some("user:u1".to_string()));
    }

    #[test]
    fn test_composite_strategy() {
        let key = KeyStrategy::Composite {
            field: "email".into(),
        }
        .build(false);

        let req = request().with_body(r#"{"email":"a@b.io"}"#);
        assert_eq!(key.extract(&req), Some("ip:10.1.2.3|email:a@b.io".to_string()));

        let req = request().with_identity(Identity::new("u1"));
        assert_eq!(key.extract(&req), Some("user:u1|-".to_string()));
    }

    #[test]
    fn test_custom_strategy() {
        let strategy = KeyStrategy::from_fn("tenant", |req: &RequestInfo| {
            req.header("x-tenant").map(|t| format!("tenant:{}", t))
        });
        assert_eq!(strategy.name(), "tenant");

        let key = strategy.build(false);
        let req = request().with_header("x-tenant", "acme");
        assert_eq!(key.extract(&req), Some("tenant:acme".to_string()));
    }

    #[test]
    fn test_strategy_deserialization() {
        let ip: KeyStrategy = serde_json::from_str(r#""ip""#).unwrap();
        assert!(matches!(ip, KeyStrategy::Ip));

        let composite: KeyStrategy = serde_json::from_str(r#"{"composite":{"field":"email"}}"#).unwrap();
        assert!(matches!(composite, KeyStrategy::Composite { ref field } if field == "email"));

        assert!(serde_json::from_str::<KeyStrategy>(r#""custom""#).is_err());
    }
}

//! Combinators that build one key out of several extractors.

use crate::key::Key;

/// Join two extractors as `"{first}{separator}{second}"`.
///
/// Yields nothing unless both parts do; wrap a part in [`OptionalKey`] when
/// it may legitimately be absent.
///
/// # Example
///
/// ```ignore
/// use flowgate::key::{BodyFieldKey, CompositeKey, IdentityKey};
///
/// // One bucket per caller and login email
/// let key = CompositeKey::new(IdentityKey::new(), BodyFieldKey::new("email"));
/// ```
#[derive(Debug, Clone)]
pub struct CompositeKey<K1, K2> {
    first: K1,
    second: K2,
    separator: &'static str,
}

impl<K1, K2> CompositeKey<K1, K2> {
    /// Join with the default separator `|`.
    pub fn new(first: K1, second: K2) -> Self {
        Self::with_separator(first, second, "|")
    }

    /// Join with a custom separator.
    pub fn with_separator(first: K1, second: K2, separator: &'static str) -> Self {
        Self {
            first,
            second,
            separator,
        }
    }
}

impl<R, K1, K2> Key<R> for CompositeKey<K1, K2>
where
    K1: Key<R>,
    K2: Key<R>,
{
    fn extract(&self, request: &R) -> Option<String> {
        let first = self.first.extract(request)?;
        let second = self.second.extract(request)?;
        Some(format!("{}{}{}", first, self.separator, second))
    }

    fn name(&self) -> &'static str {
        "composite"
    }
}

/// Use `primary` when it yields a key, `fallback` otherwise.
///
/// This is how identity-based limiting degrades to IP-based limiting for
/// anonymous callers.
#[derive(Debug, Clone)]
pub struct EitherKey<K1, K2> {
    primary: K1,
    fallback: K2,
}

impl<K1, K2> EitherKey<K1, K2> {
    /// Create a new either key.
    pub fn new(primary: K1, fallback: K2) -> Self {
        Self { primary, fallback }
    }
}

impl<R, K1, K2> Key<R> for EitherKey<K1, K2>
where
    K1: Key<R>,
    K2: Key<R>,
{
    fn extract(&self, request: &R) -> Option<String> {
        self.primary
            .extract(request)
            .or_else(|| self.fallback.extract(request))
    }

    fn name(&self) -> &'static str {
        self.primary.name()
    }
}

/// Never fails: substitutes `default` when the inner extractor yields nothing.
#[derive(Debug, Clone)]
pub struct OptionalKey<K> {
    inner: K,
    default: String,
}

impl<K> OptionalKey<K> {
    /// Wrap `inner` with a placeholder.
    pub fn new(inner: K, default: impl Into<String>) -> Self {
        Self {
            inner,
            default: default.into(),
        }
    }
}

impl<R, K> Key<R> for OptionalKey<K>
where
    K: Key<R>,
{
    fn extract(&self, request: &R) -> Option<String> {
        Some(
            self.inner
                .extract(request)
                .unwrap_or_else(|| self.default.clone()),
        )
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{BodyFieldKey, FnKey, IdentityKey, IpKey, PathKey};
    use crate::request::{Identity, RequestInfo};

    fn request() -> RequestInfo {
        RequestInfo::new("POST", "/login")
            .with_ip("10.0.0.1".parse().unwrap())
            .with_body(r#"{"email":"A@B.c"}"#)
    }

    fn nothing() -> FnKey<fn(&RequestInfo) -> Option<String>> {
        FnKey::new("nothing", |_: &RequestInfo| None)
    }

    #[test]
    fn test_composite_key() {
        let key = CompositeKey::new(IpKey::new(), BodyFieldKey::new("email"));
        assert_eq!(key.extract(&request()), Some("ip:10.0.0.1|email:a@b.c".to_string()));

        let key = CompositeKey::with_separator(IpKey::new(), PathKey::new(), "/");
        assert_eq!(key.extract(&request()), Some("ip:10.0.0.1/path:/login".to_string()));
    }

    #[test]
    fn test_composite_key_needs_both_parts() {
        let key = CompositeKey::new(IpKey::new(), nothing());
        assert_eq!(key.extract(&request()), None);
    }

    #[test]
    fn test_either_key_falls_back() {
        let key = EitherKey::new(IdentityKey::new(), IpKey::new());
        assert_eq!(key.extract(&request()), Some("ip:10.0.0.1".to_string()));

        let signed_in = request().with_identity(Identity::new("7"));
        assert_eq!(key.extract(&signed_in), Some("user:7".to_string()));
    }

    #[test]
    fn test_optional_key_default() {
        let key = OptionalKey::new(nothing(), "-");
        assert_eq!(key.extract(&request()), Some("-".to_string()));
    }
}

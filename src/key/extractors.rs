//! Pre-built key extractors.
//!
//! Extractors are generic over the request type and read it through the
//! small `Has*` traits below, so a framework adapter only implements those.

use std::net::IpAddr;

use crate::key::Key;

// ============================================================================
// Request Info Traits
// ============================================================================

/// Trait for requests that have an IP address.
pub trait HasIpAddr {
    /// Get the client IP address.
    fn client_ip(&self) -> Option<IpAddr>;
}

/// Trait for requests that have a path.
pub trait HasPath {
    /// Get the request path.
    fn path(&self) -> &str;
}

/// Trait for requests that have headers.
pub trait HasHeaders {
    /// Get a header value by name.
    fn header(&self, name: &str) -> Option<&str>;
}

/// Trait for requests that may carry an authenticated caller.
pub trait HasIdentity {
    /// The caller id, when the request is authenticated.
    fn identity_id(&self) -> Option<&str>;
}

/// Trait for requests whose body has been buffered.
pub trait HasBody {
    /// The body as text, if it was buffered.
    fn body(&self) -> Option<&str>;
}

// ============================================================================
// IP-based Extractors
// ============================================================================

/// Extract key from client IP address.
///
/// By default this is the peer address of the connection. Reading
/// `X-Forwarded-For` instead is only safe behind a proxy that overwrites the
/// header, since clients can set it to anything.
#[derive(Debug, Clone, Default)]
pub struct IpKey {
    /// Header to check for real IP (e.g., X-Forwarded-For).
    real_ip_header: Option<&'static str>,
}

impl IpKey {
    /// Create a new IP key extractor reading the peer address.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use X-Forwarded-For header to get real IP behind proxy.
    pub fn with_forwarded_for() -> Self {
        Self {
            real_ip_header: Some("x-forwarded-for"),
        }
    }
}

impl<R> Key<R> for IpKey
where
    R: HasIpAddr + HasHeaders,
{
    fn extract(&self, request: &R) -> Option<String> {
        if let Some(header) = self.real_ip_header {
            if let Some(value) = request.header(header) {
                // X-Forwarded-For may list a proxy chain; the client is first
                let ip = value.split(',').next()?.trim();
                if !ip.is_empty() {
                    return Some(format!("ip:{}", ip));
                }
            }
        }

        request.client_ip().map(|ip| format!("ip:{}", ip))
    }

    fn name(&self) -> &'static str {
        "ip"
    }
}

// ============================================================================
// Identity-based Extractors
// ============================================================================

/// Extract key from the authenticated caller id.
///
/// Yields nothing for anonymous requests; wrap it in an
/// [`EitherKey`](crate::key::EitherKey) to fall back to the IP.
#[derive(Debug, Clone, Default)]
pub struct IdentityKey;

impl IdentityKey {
    /// Create a new identity key extractor.
    pub fn new() -> Self {
        Self
    }
}

impl<R: HasIdentity> Key<R> for IdentityKey {
    fn extract(&self, request: &R) -> Option<String> {
        request
            .identity_id()
            .filter(|id| !id.is_empty())
            .map(|id| format!("user:{}", id))
    }

    fn name(&self) -> &'static str {
        "identity"
    }
}

// ============================================================================
// Body-based Extractors
// ============================================================================

/// Extract key from a top-level field of a JSON body, e.g. the email of a
/// login attempt.
///
/// String values are lowercased and trimmed so `Bob@x.io ` and `bob@x.io`
/// share a bucket. Numbers and booleans are used as written; anything else,
/// or a body that is not a JSON object, yields nothing.
#[derive(Debug, Clone)]
pub struct BodyFieldKey {
    field: String,
}

impl BodyFieldKey {
    /// Create a key over the JSON field `field`.
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }

    /// The field read from the body.
    pub fn field(&self) -> &str {
        &self.field
    }
}

impl<R: HasBody> Key<R> for BodyFieldKey {
    fn extract(&self, request: &R) -> Option<String> {
        let body: serde_json::Value = serde_json::from_str(request.body()?).ok()?;
        let value = match body.get(&self.field)? {
            serde_json::Value::String(s) => s.trim().to_lowercase(),
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::Bool(b) => b.to_string(),
            _ => return None,
        };
        if value.is_empty() {
            return None;
        }
        Some(format!("{}:{}", self.field, value))
    }

    fn name(&self) -> &'static str {
        "body_field"
    }
}

// ============================================================================
// Path-based Extractors
// ============================================================================

/// Extract key from request path.
#[derive(Debug, Clone, Default)]
pub struct PathKey;

impl PathKey {
    /// Create a new path key extractor.
    pub fn new() -> Self {
        Self
    }
}

impl<R: HasPath> Key<R> for PathKey {
    fn extract(&self, request: &R) -> Option<String> {
        Some(format!("path:{}", request.path()))
    }

    fn name(&self) -> &'static str {
        "path"
    }
}

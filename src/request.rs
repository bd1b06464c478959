//! Framework-neutral request descriptor.
//!
//! The limiter never sees a framework request directly. Integrations build a
//! [`RequestInfo`] from whatever they have and hand it over; tests build one
//! with the same builder.

use std::collections::HashMap;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::key::{HasBody, HasHeaders, HasIdentity, HasIpAddr, HasPath};

/// An authenticated caller, as resolved by the host before the limiter runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable caller id.
    pub id: String,
    /// Subscription tier, e.g. `"premium"`.
    pub tier: Option<String>,
}

impl Identity {
    /// Caller without a tier.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tier: None,
        }
    }

    /// Attach a tier.
    pub fn with_tier(mut self, tier: impl Into<String>) -> Self {
        self.tier = Some(tier.into());
        self
    }
}

/// Everything the limiter reads from one inbound request.
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    method: String,
    path: String,
    ip: Option<IpAddr>,
    /// Lowercased header name -> value.
    headers: HashMap<String, String>,
    identity: Option<Identity>,
    body: Option<String>,
}

impl RequestInfo {
    /// Start a descriptor for `method path`.
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    /// Set the peer address.
    pub fn with_ip(mut self, ip: IpAddr) -> Self {
        self.ip = Some(ip);
        self
    }

    /// Add a header. Names are matched case-insensitively.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Set the authenticated caller.
    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Set the buffered request body.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Request method, e.g. `"POST"`.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Authenticated caller, if any.
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Caller tier, if the caller is authenticated and has one.
    pub fn tier(&self) -> Option<&str> {
        self.identity.as_ref()?.tier.as_deref()
    }
}

impl HasIpAddr for RequestInfo {
    fn client_ip(&self) -> Option<IpAddr> {
        self.ip
    }
}

impl HasPath for RequestInfo {
    fn path(&self) -> &str {
        &self.path
    }
}

impl HasHeaders for RequestInfo {
    fn header(&self, name: &str) -> Option<&str> {
        match self.headers.get(name) {
            Some(value) => Some(value.as_str()),
            None => self
                .headers
                .get(&name.to_ascii_lowercase())
                .map(String::as_str),
        }
    }
}

impl HasIdentity for RequestInfo {
    fn identity_id(&self) -> Option<&str> {
        self.identity.as_ref().map(|identity| identity.id.as_str())
    }
}

impl HasBody for RequestInfo {
    fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }
}

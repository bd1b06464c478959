//! Per-request quota resolution.
//!
//! The configured quota is only a starting point. A [`ResolverChain`] runs a
//! list of [`QuotaResolver`] steps over it in order, each free to replace the
//! ceiling or window it was handed:
//!
//! 1. [`RouteResolver`]: the limit the route declares.
//! 2. [`TieredResolver`]: the caller's subscription tier picks a row of a
//!    tier table.
//! 3. [`CostResolver`]: an expensive payload gets a stricter ceiling.
//! 4. [`FnResolver`]: an application hook, possibly doing I/O.
//!
//! A step that fails or overruns its timeout is logged and skipped; the
//! request proceeds with the value from the step before it. Division across
//! cluster nodes happens after the chain, in the limiter.
//!
//! # Example
//!
//! ```ignore
//! use flowgate::resolver::{CostResolver, ResolverChain, TieredResolver};
//!
//! let chain = ResolverChain::new()
//!     .with(TieredResolver::standard())
//!     .with(CostResolver::new(1000, 200, 50));
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{RateLimitError, Result};
use crate::key::{HasBody, HasPath};
use crate::quota::Quota;
use crate::request::RequestInfo;

/// A `(max, window)` pair a resolver can substitute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limit {
    /// Hits per window.
    pub max: u64,
    /// Window length.
    pub window: Duration,
}

impl Limit {
    /// Create a limit.
    pub fn new(max: u64, window: Duration) -> Self {
        Self { max, window }
    }

    /// `max` hits per minute.
    pub fn per_minute(max: u64) -> Self {
        Self::new(max, Duration::from_secs(60))
    }

    /// `max` hits per hour.
    pub fn per_hour(max: u64) -> Self {
        Self::new(max, Duration::from_secs(3600))
    }

    fn apply(&self, quota: &Quota) -> Quota {
        quota.clone().with_max(self.max).with_window(self.window)
    }
}

/// One step of quota resolution.
#[async_trait]
pub trait QuotaResolver: Send + Sync + 'static {
    /// Step name for logs.
    fn name(&self) -> &'static str;

    /// Derive the quota for `request` from the one the previous step produced.
    ///
    /// Returning `current` unchanged means the step does not apply.
    async fn resolve(&self, request: &RequestInfo, current: &Quota) -> Result<Quota>;
}

// ============================================================================
// Per-route
// ============================================================================

/// Picks the limit a route declares.
///
/// Exact paths win over patterns; patterns are tried in insertion order.
/// In a pattern `*` matches one path segment and a trailing `**` matches
/// the rest of the path. Unlisted paths keep the incoming quota.
#[derive(Debug, Clone, Default)]
pub struct RouteResolver {
    routes: HashMap<String, Limit>,
    patterns: Vec<(String, Limit)>,
}

impl RouteResolver {
    /// An empty route table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the limit of an exact path.
    pub fn route(mut self, path: impl Into<String>, limit: Limit) -> Self {
        self.routes.insert(path.into(), limit);
        self
    }

    /// Declare the limit of every path matching `pattern`.
    pub fn route_pattern(mut self, pattern: impl Into<String>, limit: Limit) -> Self {
        self.patterns.push((pattern.into(), limit));
        self
    }

    /// The limit declared for `path`, if any.
    pub fn limit_for(&self, path: &str) -> Option<&Limit> {
        if let Some(limit) = self.routes.get(path) {
            return Some(limit);
        }
        self.patterns
            .iter()
            .find(|(pattern, _)| pattern_matches(pattern, path))
            .map(|(_, limit)| limit)
    }
}

#[async_trait]
impl QuotaResolver for RouteResolver {
    fn name(&self) -> &'static str {
        "route"
    }

    async fn resolve(&self, request: &RequestInfo, current: &Quota) -> Result<Quota> {
        match self.limit_for(request.path()) {
            Some(limit) => Ok(limit.apply(current)),
            None => Ok(current.clone()),
        }
    }
}

/// Glob-style path match over `/`-separated segments.
fn pattern_matches(pattern: &str, path: &str) -> bool {
    let mut pattern_parts = pattern.split('/').filter(|s| !s.is_empty());
    let mut path_parts = path.split('/').filter(|s| !s.is_empty());

    loop {
        match (pattern_parts.next(), path_parts.next()) {
            (Some("**"), _) => return true,
            (Some("*"), Some(_)) => {}
            (Some(expected), Some(actual)) if expected == actual => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

// ============================================================================
// Tiered
// ============================================================================

/// Picks a limit by the caller's subscription tier.
///
/// Anonymous callers and tiers missing from the table keep the incoming
/// quota.
#[derive(Debug, Clone, Default)]
pub struct TieredResolver {
    tiers: HashMap<String, Limit>,
}

impl TieredResolver {
    /// An empty tier table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The usual four tiers, per minute: free 60, basic 300, premium 1000,
    /// enterprise 5000.
    pub fn standard() -> Self {
        Self::new()
            .with_tier("free", Limit::per_minute(60))
            .with_tier("basic", Limit::per_minute(300))
            .with_tier("premium", Limit::per_minute(1000))
            .with_tier("enterprise", Limit::per_minute(5000))
    }

    /// Add or replace a tier.
    pub fn with_tier(mut self, tier: impl Into<String>, limit: Limit) -> Self {
        self.tiers.insert(tier.into(), limit);
        self
    }

    /// Limit for `tier`, if the table has one.
    pub fn limit_for(&self, tier: &str) -> Option<&Limit> {
        self.tiers.get(tier)
    }
}

#[async_trait]
impl QuotaResolver for TieredResolver {
    fn name(&self) -> &'static str {
        "tiered"
    }

    async fn resolve(&self, request: &RequestInfo, current: &Quota) -> Result<Quota> {
        match request.tier().and_then(|tier| self.limit_for(tier)) {
            Some(limit) => Ok(limit.apply(current)),
            None => Ok(current.clone()),
        }
    }
}

// ============================================================================
// Cost-based
// ============================================================================

/// How a request body is scored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostMeasure {
    /// Body length in characters.
    #[default]
    Length,
    /// Deepest nesting of `{}`/`[]` outside string literals. Fits JSON and
    /// GraphQL selection sets alike.
    Depth,
}

impl CostMeasure {
    /// Score `body`.
    pub fn score(&self, body: &str) -> u64 {
        match self {
            Self::Length => body.chars().count() as u64,
            Self::Depth => nesting_depth(body),
        }
    }
}

fn nesting_depth(body: &str) -> u64 {
    let mut depth: u64 = 0;
    let mut deepest = 0;
    let mut in_string = false;
    let mut escaped = false;

    for c in body.chars() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => {
                depth += 1;
                deepest = deepest.max(depth);
            }
            '}' | ']' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    deepest
}

/// Stricter ceiling for expensive payloads.
///
/// Scores above `threshold` get `above` hits per window, the rest `below`.
/// The window is left as it is.
#[derive(Debug, Clone)]
pub struct CostResolver {
    measure: CostMeasure,
    threshold: u64,
    below: u64,
    above: u64,
}

impl CostResolver {
    /// Score by body length.
    pub fn new(threshold: u64, below: u64, above: u64) -> Self {
        Self {
            measure: CostMeasure::Length,
            threshold,
            below,
            above,
        }
    }

    /// Score with a different measure.
    pub fn with_measure(mut self, measure: CostMeasure) -> Self {
        self.measure = measure;
        self
    }

    /// Ceiling for a payload scoring `score`.
    pub fn max_for(&self, score: u64) -> u64 {
        if score > self.threshold { self.above } else { self.below }
    }
}

#[async_trait]
impl QuotaResolver for CostResolver {
    fn name(&self) -> &'static str {
        "cost"
    }

    async fn resolve(&self, request: &RequestInfo, current: &Quota) -> Result<Quota> {
        let score = request.body().map(|body| self.measure.score(body)).unwrap_or(0);
        Ok(current.clone().with_max(self.max_for(score)))
    }
}

// ============================================================================
// Application hook
// ============================================================================

/// Resolver backed by an async closure.
///
/// The hook returns `Ok(None)` to keep the incoming quota. Its future may not
/// borrow the request; copy out what it needs first.
///
/// ```ignore
/// let hook = FnResolver::new(move |req: &RequestInfo| {
///     let user = req.identity().map(|identity| identity.id.clone());
///     let billing = billing.clone();
///     async move {
///         let plan = billing.plan_for(user).await?;
///         Ok(Some(Limit::per_minute(plan.requests_per_minute)))
///     }
/// });
/// ```
pub struct FnResolver<F, Fut> {
    hook: F,
    _future: PhantomData<fn() -> Fut>,
}

impl<F, Fut> std::fmt::Debug for FnResolver<F, Fut> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnResolver").finish_non_exhaustive()
    }
}

impl<F, Fut> FnResolver<F, Fut>
where
    F: Fn(&RequestInfo) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Limit>>> + Send + 'static,
{
    /// Wrap a hook.
    pub fn new(hook: F) -> Self {
        Self {
            hook,
            _future: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut> QuotaResolver for FnResolver<F, Fut>
where
    F: Fn(&RequestInfo) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Limit>>> + Send + 'static,
{
    fn name(&self) -> &'static str {
        "dynamic"
    }

    async fn resolve(&self, request: &RequestInfo, current: &Quota) -> Result<Quota> {
        match (self.hook)(request).await? {
            Some(limit) if limit.max == 0 => Err(RateLimitError::PolicyResolution(
                "hook returned a zero ceiling".into(),
            )),
            Some(limit) => Ok(limit.apply(current)),
            None => Ok(current.clone()),
        }
    }
}

// ============================================================================
// Chain
// ============================================================================

/// Ordered resolver steps with a per-step time budget.
#[derive(Clone)]
pub struct ResolverChain {
    steps: Vec<Arc<dyn QuotaResolver>>,
    step_timeout: Duration,
}

impl std::fmt::Debug for ResolverChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.steps.iter().map(|step| step.name()).collect();
        f.debug_struct("ResolverChain")
            .field("steps", &names)
            .field("step_timeout", &self.step_timeout)
            .finish()
    }
}

impl Default for ResolverChain {
    fn default() -> Self {
        Self::new()
    }
}

impl ResolverChain {
    /// An empty chain with a 100 ms step timeout.
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            step_timeout: Duration::from_millis(100),
        }
    }

    /// Append a step.
    pub fn with<R: QuotaResolver>(mut self, resolver: R) -> Self {
        self.steps.push(Arc::new(resolver));
        self
    }

    /// Append a shared step.
    pub fn with_shared(mut self, resolver: Arc<dyn QuotaResolver>) -> Self {
        self.steps.push(resolver);
        self
    }

    /// Set the time budget of each step.
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the chain has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run every step over `base`. Never fails.
    pub async fn resolve(&self, request: &RequestInfo, base: &Quota) -> Quota {
        let mut quota = base.clone();
        for step in &self.steps {
            match tokio::time::timeout(self.step_timeout, step.resolve(request, &quota)).await {
                Ok(Ok(next)) => {
                    if next != quota {
                        debug!(step = step.name(), max = next.max(), window_ms = next.window().as_millis() as u64, "quota adjusted");
                    }
                    quota = next;
                }
                Ok(Err(e)) => {
                    warn!(step = step.name(), error = %e, "quota resolver failed, keeping previous quota");
                }
                Err(_) => {
                    warn!(
                        step = step.name(),
                        timeout_ms = self.step_timeout.as_millis() as u64,
                        "quota resolver timed out, keeping previous quota"
                    );
                }
            }
        }
        quota
    }
}

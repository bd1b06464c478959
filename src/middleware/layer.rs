//! Tower layer for rate limiting in Axum.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{HeaderMap, HeaderName, HeaderValue, Request, Response, StatusCode, header},
};
use tower::{Layer, Service};
use tracing::warn;

use crate::decision::Verdict;
use crate::extensions::RateLimitExt;
use crate::limiter::RateLimiter;
use crate::request::{Identity, RequestInfo};
use crate::storage::Storage;

/// Tower layer that puts a [`RateLimiter`] in front of a service.
pub struct RateLimitLayer<S: Storage> {
    limiter: Arc<RateLimiter<S>>,
}

impl<S: Storage> RateLimitLayer<S> {
    /// Create a new rate limit layer.
    pub fn new(limiter: RateLimiter<S>) -> Self {
        Self::from_shared(Arc::new(limiter))
    }

    /// Use a limiter that is also held elsewhere, e.g. by a manager.
    pub fn from_shared(limiter: Arc<RateLimiter<S>>) -> Self {
        Self { limiter }
    }

    /// The limiter behind this layer.
    pub fn limiter(&self) -> &Arc<RateLimiter<S>> {
        &self.limiter
    }
}

impl<S: Storage> Clone for RateLimitLayer<S> {
    fn clone(&self) -> Self {
        Self {
            limiter: Arc::clone(&self.limiter),
        }
    }
}

impl<S: Storage, Inner> Layer<Inner> for RateLimitLayer<S> {
    type Service = RateLimitService<S, Inner>;

    fn layer(&self, inner: Inner) -> Self::Service {
        RateLimitService {
            inner,
            limiter: Arc::clone(&self.limiter),
        }
    }
}

/// The rate limiting service.
pub struct RateLimitService<S: Storage, Inner> {
    inner: Inner,
    limiter: Arc<RateLimiter<S>>,
}

impl<S: Storage, Inner: Clone> Clone for RateLimitService<S, Inner> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            limiter: Arc::clone(&self.limiter),
        }
    }
}

impl<S, Inner> Service<Request<Body>> for RateLimitService<S, Inner>
where
    S: Storage,
    Inner: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    Inner::Future: Send,
{
    type Response = Response<Body>;
    type Error = Inner::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let limiter = Arc::clone(&self.limiter);
        // The clone is not ready; keep the ready one for this call.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let (info, mut request) = match describe(request, limiter.buffer_body_limit()).await {
                Ok(described) => described,
                Err(response) => return Ok(response),
            };

            let (quota, verdict) = limiter.evaluate(&info).await;
            if let Some(status) = limiter.rejection_status(&verdict) {
                return Ok(rejection_response(&limiter, &verdict, status));
            }

            request
                .extensions_mut()
                .insert(RateLimitExt::new(quota, verdict.clone()));

            let mut response = match inner.call(request).await {
                Ok(response) => response,
                Err(e) => {
                    // No response to read a status from; settle as a server error.
                    limiter.complete(&verdict, StatusCode::INTERNAL_SERVER_ERROR.as_u16()).await;
                    return Err(e);
                }
            };
            append_headers(response.headers_mut(), limiter.response_headers(&verdict));
            limiter.complete(&verdict, response.status().as_u16()).await;
            Ok(response)
        })
    }
}

/// Build the limiter's view of `request`, buffering a small body.
///
/// Bodies are only read when `Content-Length` announces at most `limit`
/// bytes; the request is rebuilt around the buffered bytes.
async fn describe(request: Request<Body>, limit: usize) -> Result<(RequestInfo, Request<Body>), Response<Body>> {
    let (parts, body) = request.into_parts();

    let mut info = RequestInfo::new(parts.method.as_str(), parts.uri.path());
    if let Some(ConnectInfo(addr)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
        info = info.with_ip(addr.ip());
    }
    for (name, value) in &parts.headers {
        if let Ok(value) = value.to_str() {
            info = info.with_header(name.as_str(), value);
        }
    }
    if let Some(identity) = parts.extensions.get::<Identity>() {
        info = info.with_identity(identity.clone());
    }

    let announced = parts
        .headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());

    let body = match announced {
        Some(length) if length > 0 && length <= limit => {
            let bytes = axum::body::to_bytes(body, limit).await.map_err(|e| {
                warn!(error = %e, "failed to buffer request body");
                plain_response(StatusCode::BAD_REQUEST)
            })?;
            if let Ok(text) = std::str::from_utf8(&bytes) {
                info = info.with_body(text);
            }
            Body::from(bytes)
        }
        _ => body,
    };

    Ok((info, Request::from_parts(parts, body)))
}

/// Add rate limit headers to a response.
fn append_headers(headers: &mut HeaderMap, pairs: Vec<(&'static str, String)>) {
    for (name, value) in pairs {
        if let (Ok(name), Ok(value)) = (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(&value)) {
            headers.insert(name, value);
        }
    }
}

/// The JSON rejection for a denied verdict.
fn rejection_response<S: Storage>(limiter: &RateLimiter<S>, verdict: &Verdict, status: u16) -> Response<Body> {
    let body = limiter
        .rejection_body(verdict)
        .map(|body| body.to_json())
        .unwrap_or_default();

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = StatusCode::from_u16(status).unwrap_or(StatusCode::TOO_MANY_REQUESTS);
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    append_headers(response.headers_mut(), limiter.response_headers(verdict));
    response
}

fn plain_response(status: StatusCode) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
}

//! Tower middleware that admits or rejects HTTP requests per client identity.
//!
//! Each request costs one token. Admitted responses carry
//! `x-ratelimit-remaining`; rejected requests get `429 Too Many Requests`
//! without reaching the inner service. Requests whose identity cannot be
//! resolved get `500 Internal Server Error` and never touch the limiter.

use crate::error::IdentityError;
use crate::identity::{IdentityExtractor, PeerIp};
use crate::limiter::{Decision, RateLimiter};
use futures::future::{self, BoxFuture};
use http::header::{HeaderName, HeaderValue, RETRY_AFTER};
use http::{Request, Response, StatusCode};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower_layer::Layer;
use tower_service::Service;
use tracing::warn;

/// Header reporting whole tokens left after the request.
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

const REQUEST_COST: f64 = 1.0;
const REJECTED_BODY: &str = "rate limit exceeded; try again later";
const UNRESOLVED_BODY: &str = "unable to resolve client identity";

/// A layer that enforces per-identity rate limits using a [`RateLimiter`].
#[derive(Debug)]
pub struct RateLimitLayer<L, K = PeerIp> {
    limiter: Arc<L>,
    extractor: Arc<K>,
}

impl<L, K> Clone for RateLimitLayer<L, K> {
    fn clone(&self) -> Self {
        Self { limiter: self.limiter.clone(), extractor: self.extractor.clone() }
    }
}

impl<L> RateLimitLayer<L> {
    /// Create a layer keyed by peer IP.
    pub fn new(limiter: L) -> Self {
        Self::from_shared(Arc::new(limiter))
    }

    /// Create a layer around a limiter the caller keeps a handle to, e.g. to
    /// run its idle sweep.
    pub fn from_shared(limiter: Arc<L>) -> Self {
        Self { limiter, extractor: Arc::new(PeerIp) }
    }
}

impl<L, K> RateLimitLayer<L, K> {
    /// Replace the identity extractor.
    pub fn with_extractor<K2>(self, extractor: K2) -> RateLimitLayer<L, K2> {
        RateLimitLayer { limiter: self.limiter, extractor: Arc::new(extractor) }
    }

    pub fn limiter(&self) -> &Arc<L> {
        &self.limiter
    }
}

impl<S, L, K> Layer<S> for RateLimitLayer<L, K> {
    type Service = RateLimitService<S, L, K>;

    fn layer(&self, service: S) -> Self::Service {
        RateLimitService {
            inner: service,
            limiter: self.limiter.clone(),
            extractor: self.extractor.clone(),
        }
    }
}

/// Middleware service that enforces rate limits.
#[derive(Debug)]
pub struct RateLimitService<S, L, K = PeerIp> {
    inner: S,
    limiter: Arc<L>,
    extractor: Arc<K>,
}

impl<S: Clone, L, K> Clone for RateLimitService<S, L, K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            limiter: self.limiter.clone(),
            extractor: self.extractor.clone(),
        }
    }
}

impl<S, L, K, ReqBody, ResBody> Service<Request<ReqBody>> for RateLimitService<S, L, K>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    L: RateLimiter + 'static,
    K: IdentityExtractor<ReqBody> + 'static,
    ReqBody: Send + 'static,
    ResBody: From<&'static str> + Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let identity = match resolve(self.extractor.as_ref(), &req) {
            Ok(identity) => identity,
            Err(err) => {
                warn!(
                    target: "bucketgate::middleware",
                    error = %err,
                    uri = %req.uri(),
                    "rejecting request without identity"
                );
                return Box::pin(future::ready(Ok(plain_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    UNRESOLVED_BODY,
                ))));
            }
        };

        match self.limiter.admit(&identity, REQUEST_COST) {
            Decision::Allowed { remaining } => {
                // Take the service that was driven to readiness and leave a clone behind.
                let clone = self.inner.clone();
                let mut inner = std::mem::replace(&mut self.inner, clone);
                Box::pin(async move {
                    let mut response = inner.call(req).await?;
                    response
                        .headers_mut()
                        .insert(X_RATELIMIT_REMAINING, HeaderValue::from(remaining));
                    Ok(response)
                })
            }
            Decision::Denied { retry_after } => {
                Box::pin(future::ready(Ok(too_many_requests(retry_after))))
            }
        }
    }
}

fn resolve<K, B>(extractor: &K, req: &Request<B>) -> Result<String, IdentityError>
where
    K: IdentityExtractor<B> + ?Sized,
{
    let identity = extractor.extract(req)?;
    if identity.is_empty() {
        return Err(IdentityError::EmptyIdentity);
    }
    Ok(identity)
}

fn too_many_requests<B: From<&'static str>>(retry_after: Option<Duration>) -> Response<B> {
    let mut response = plain_response(StatusCode::TOO_MANY_REQUESTS, REJECTED_BODY);
    let headers = response.headers_mut();
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(0u64));
    if let Some(wait) = retry_after {
        headers.insert(RETRY_AFTER, HeaderValue::from(whole_seconds(wait)));
    }
    response
}

fn plain_response<B: From<&'static str>>(status: StatusCode, body: &'static str) -> Response<B> {
    let mut response = Response::new(B::from(body));
    *response.status_mut() = status;
    response
}

// Retry-After carries whole seconds; round up so clients never retry early.
fn whole_seconds(wait: Duration) -> u64 {
    let secs = wait.as_secs();
    if wait.subsec_nanos() > 0 {
        secs.saturating_add(1)
    } else {
        secs
    }
}

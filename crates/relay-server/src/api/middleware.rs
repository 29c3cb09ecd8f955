//! Rate limiting and request logging middleware.

use crate::error::RelayError;
use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::{num::NonZeroU32, sync::Arc, time::Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Global rate limiter (not keyed by IP).
pub type GlobalLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Rate limiter state shared across requests.
#[derive(Clone)]
pub struct RateLimitState {
    /// Global rate limiter for all requests
    pub global: Arc<GlobalLimiter>,
}

impl RateLimitState {
    /// Create a new rate limit state with the specified limits.
    pub fn new(requests_per_minute: u32) -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN));

        Self {
            global: Arc::new(RateLimiter::direct(quota)),
        }
    }

    /// A limit high enough to never trigger in tests.
    pub fn permissive() -> Self {
        Self::new(100_000)
    }
}

/// Rate limiting middleware.
///
/// Checks the global rate limit and returns 429 Too Many Requests if exceeded.
pub async fn rate_limit_middleware(
    State(rate_limit): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Result<Response, RelayError> {
    // Check global rate limit
    if rate_limit.global.check().is_err() {
        warn!("Global rate limit exceeded");
        return Err(RelayError::RateLimitExceeded);
    }

    Ok(next.run(request).await)
}

/// Header echoing the id assigned to each request.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Request logging.
///
/// Tags each request with a fresh id, returned in `x-request-id`. Only the
/// path is logged; query strings and bodies never reach the logs.
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    debug!(%request_id, %method, %path, "Request started");

    let mut response = next.run(request).await;

    let duration = start.elapsed();
    let status = response.status();

    if status.is_success() {
        debug!(%request_id, %method, %path, %status, ?duration, "Request completed");
    } else if status.is_server_error() {
        warn!(%request_id, %method, %path, %status, ?duration, "Request failed");
    } else {
        // Rejections like 401 or 404 are routine for a relay
        info!(%request_id, %method, %path, %status, ?duration, "Request rejected");
    }

    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

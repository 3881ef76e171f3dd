//! Request throttling and access logging shared by both surfaces.

use crate::error::ApiError;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use governor::{
    clock::{Clock, DefaultClock},
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::{num::NonZeroU32, sync::Arc, time::Instant};
use tracing::{debug, warn};

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// One quota shared by every request on both surfaces.
#[derive(Clone)]
pub struct RateLimitState {
    limiter: Arc<DirectLimiter>,
    clock: DefaultClock,
}

impl RateLimitState {
    /// `0` is clamped to one request per minute.
    pub fn new(requests_per_minute: u32) -> Self {
        let per_minute = NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN);

        Self {
            limiter: Arc::new(RateLimiter::direct(Quota::per_minute(per_minute))),
            clock: DefaultClock::default(),
        }
    }

    pub fn permissive() -> Self {
        Self::new(10_000)
    }

    /// Take one cell, or report how long until the next one frees up.
    pub fn acquire(&self) -> Result<(), std::time::Duration> {
        self.limiter
            .check()
            .map_err(|not_until| not_until.wait_time_from(self.clock.now()))
    }
}

pub async fn rate_limit_middleware(
    State(rate_limit): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Err(retry_after) = rate_limit.acquire() {
        warn!(path = %request.uri().path(), ?retry_after, "Rate limit exceeded");
        return Err(ApiError::RateLimitExceeded { retry_after });
    }

    Ok(next.run(request).await)
}

pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;
    let status = response.status();
    let elapsed_ms = started.elapsed().as_millis() as u64;

    // 4xx is routine here (wrong code, PIN mismatch); only 5xx is worth a warning.
    if status.is_server_error() {
        warn!(%method, %path, %status, elapsed_ms, "Request failed");
    } else {
        debug!(%method, %path, %status, elapsed_ms, "Request handled");
    }

    response
}

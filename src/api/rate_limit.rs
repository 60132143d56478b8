//! Per-client request limits over a sliding window.
//!
//! Each (client IP, tier) pair keeps the instants of its recent requests; a
//! request is admitted while fewer than the tier's limit fall inside the last
//! `window_seconds`. Timestamps come from `tokio::time` so tests can drive the
//! window with a paused clock.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::error::ApiError;
use crate::config::RateLimitConfig;
use crate::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitTier {
    /// Authenticated API calls
    Api,
    /// Identity verification and token refresh
    Auth,
}

/// Outcome of an admitted request
#[derive(Debug, Clone)]
pub struct RateLimitInfo {
    pub limit: u32,
    pub remaining: u32,
}

#[derive(Debug)]
pub struct RateLimiter {
    requests: DashMap<(IpAddr, RateLimitTier), VecDeque<Instant>>,
    config: RateLimitConfig,
    window: Duration,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            requests: DashMap::new(),
            window: Duration::from_secs(config.window_seconds.max(1)),
            config,
        }
    }

    fn limit_for(&self, tier: RateLimitTier) -> u32 {
        match tier {
            RateLimitTier::Api => self.config.api_requests_per_window,
            RateLimitTier::Auth => self.config.auth_requests_per_window,
        }
    }

    /// Record a request. Returns the remaining budget, or the number of
    /// seconds until the oldest request in the window expires.
    pub fn check(&self, ip: IpAddr, tier: RateLimitTier) -> Result<RateLimitInfo, u64> {
        let limit = self.limit_for(tier);
        if !self.config.enabled {
            return Ok(RateLimitInfo {
                limit,
                remaining: limit,
            });
        }

        let now = Instant::now();
        let mut log = self.requests.entry((ip, tier)).or_default();
        while log
            .front()
            .is_some_and(|t| now.duration_since(*t) >= self.window)
        {
            log.pop_front();
        }

        if log.len() as u32 >= limit {
            let retry_after = log
                .front()
                .map(|oldest| self.window.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(self.window);
            return Err(retry_after.as_secs().max(1));
        }

        log.push_back(now);
        Ok(RateLimitInfo {
            limit,
            remaining: limit - log.len() as u32,
        })
    }

    /// Forget clients with no request inside the window
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        self.requests.retain(|_, log| {
            log.back()
                .is_some_and(|last| now.duration_since(*last) < self.window)
        });
    }

    pub fn tracked_clients(&self) -> usize {
        self.requests.len()
    }
}

/// Client address: the first `X-Forwarded-For` hop, then `X-Real-IP`, then
/// the socket peer
fn client_ip(request: &Request<Body>) -> IpAddr {
    let headers = request.headers();
    let forwarded: Option<IpAddr> = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|ip| ip.trim().parse().ok());
    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|ip| ip.trim().parse::<IpAddr>().ok())
    };
    let peer = || {
        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0.ip())
    };

    forwarded
        .or_else(real_ip)
        .or_else(peer)
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

pub async fn rate_limit_api(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    limit(state, request, next, RateLimitTier::Api).await
}

pub async fn rate_limit_auth(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    limit(state, request, next, RateLimitTier::Auth).await
}

async fn limit(state: Arc<AppState>, request: Request<Body>, next: Next, tier: RateLimitTier) -> Response {
    let ip = client_ip(&request);

    match state.rate_limiter.check(ip, tier) {
        Ok(info) => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert("X-RateLimit-Limit", HeaderValue::from(info.limit));
            headers.insert("X-RateLimit-Remaining", HeaderValue::from(info.remaining));
            response
        }
        Err(retry_after) => {
            tracing::warn!(client = %ip, ?tier, "Rate limit exceeded");
            let mut response = ApiError::rate_limited(format!(
                "Rate limit exceeded. Try again in {} seconds.",
                retry_after
            ))
            .into_response();
            response
                .headers_mut()
                .insert("Retry-After", HeaderValue::from(retry_after));
            response
        }
    }
}

/// Periodically drop idle clients until `shutdown` fires
pub fn spawn_cleanup_task(limiter: Arc<RateLimiter>, every: Duration, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    limiter.cleanup_expired();
                    tracing::debug!(clients = limiter.tracked_clients(), "Rate limiter cleanup complete");
                }
            }
        }
    });
}

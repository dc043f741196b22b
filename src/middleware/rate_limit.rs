use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::error::ApiError;
use crate::rate_limit::{retry_after_secs, FixedWindowLimiter, RateLimitDecision};

/// One policy's limiter plus how to identify callers
#[derive(Clone)]
pub struct RateLimitGate {
    limiter: Arc<FixedWindowLimiter>,
    trust_forwarded_headers: bool,
}

impl RateLimitGate {
    pub fn new(limiter: FixedWindowLimiter, trust_forwarded_headers: bool) -> Self {
        Self {
            limiter: Arc::new(limiter),
            trust_forwarded_headers,
        }
    }
}

pub async fn rate_limit_middleware(
    State(gate): State<RateLimitGate>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let peer = request.extensions().get::<ConnectInfo<SocketAddr>>().map(|c| c.0);
    let key = client_key(request.headers(), peer, gate.trust_forwarded_headers);

    match gate.limiter.check(&key).await {
        RateLimitDecision::Allowed { limit, remaining, reset_at } => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert("x-ratelimit-limit", HeaderValue::from(limit));
            headers.insert("x-ratelimit-remaining", HeaderValue::from(remaining));
            headers.insert("x-ratelimit-reset", HeaderValue::from(reset_at.timestamp()));
            Ok(response)
        }
        RateLimitDecision::Denied { limit, reset_at, retry_after } => {
            tracing::warn!("Rate limit '{}' hit by {}", gate.limiter.policy().name, key);
            Err(ApiError::too_many_requests(retry_after_secs(retry_after), limit, reset_at))
        }
    }
}

/// Caller network address: first `X-Forwarded-For` hop, then `X-Real-IP`,
/// then the socket peer.
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>, trust_forwarded_headers: bool) -> String {
    if trust_forwarded_headers {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        let real_ip = || {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };
        if let Some(ip) = forwarded.or_else(real_ip) {
            return ip.to_string();
        }
    }

    peer.map(|addr| addr.ip().to_string()).unwrap_or_else(|| "unknown".to_string())
}

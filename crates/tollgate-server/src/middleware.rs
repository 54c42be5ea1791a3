use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tollgate_core::error::GateError;
use tollgate_core::rate_limit::RateDecision;
use tracing::debug;

use crate::auth::{key_label, presented_key};
use crate::error::AppError;
use crate::state::AppState;

const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
const X_RATELIMIT_RESET: &str = "x-ratelimit-reset";

/// Adds the fixed hardening headers to every response.
pub async fn security_headers(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(header::REFERRER_POLICY, HeaderValue::from_static("no-referrer"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

/// Transport-boundary limiter keyed by API key if present, else peer address.
pub async fn rate_limit(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let identifier = presented_key(req.headers())
        .map(|k| key_label(&k))
        .or_else(|| peer_addr(&req).map(|a| format!("addr:{}", a.ip())))
        .unwrap_or_else(|| "addr:unknown".to_string());

    let decision = state.ctx.transport_limiter.check(&identifier);
    if !decision.allowed {
        debug!(path = %req.uri().path(), "transport rate limit exceeded");
        return rejected(&decision);
    }

    let mut response = next.run(req).await;
    // Inner layers may have answered from the per-key limiter already.
    if response.status() != StatusCode::TOO_MANY_REQUESTS
        && tighter_than_present(response.headers(), &decision)
    {
        apply_rate_headers(response.headers_mut(), &decision);
    }
    response
}

/// True when `decision` leaves fewer requests than the headers already set.
fn tighter_than_present(headers: &HeaderMap, decision: &RateDecision) -> bool {
    headers
        .get(X_RATELIMIT_REMAINING)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u32>().ok())
        .map_or(true, |present| decision.remaining < present)
}

pub(crate) fn peer_addr(req: &Request) -> Option<SocketAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

pub(crate) fn apply_rate_headers(headers: &mut HeaderMap, decision: &RateDecision) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(decision.reset_secs()));
}

/// 429 with `{error, retryAfter}` and the rate headers.
pub(crate) fn rejected(decision: &RateDecision) -> Response {
    let err = GateError::RateLimited {
        retry_after_secs: decision.reset_secs(),
    };
    let mut response = AppError(err.into()).into_response();
    apply_rate_headers(response.headers_mut(), decision);
    response
}

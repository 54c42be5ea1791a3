use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};

use sha2::{Digest, Sha256};

use crate::error::AppError;
use crate::middleware::{apply_rate_headers, peer_addr, rejected};
use crate::state::AppState;

/// Caller identity attached to each request for admission and audit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller(pub String);

impl Caller {
    pub fn anonymous() -> Self {
        Self("anonymous".to_string())
    }
}

/// The API key from `X-API-Key`, else from `Authorization: Bearer`.
pub fn presented_key(headers: &HeaderMap) -> Option<String> {
    if let Some(key) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        return Some(key.trim().to_string()).filter(|k| !k.is_empty());
    }
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
}

/// Caller identity for a key: a short digest, so keys never reach traces
/// and keys sharing a prefix stay distinct.
pub fn key_label(key: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(key.as_bytes()));
    format!("key:{}", &digest[..12])
}

/// Axum middleware that resolves the caller and, when API keys are
/// configured, rejects unknown keys and applies the per-key limiter.
///
/// 1. Keys configured, none or unknown presented → 401
/// 2. Keys configured, per-key limit exceeded → 429
/// 3. Otherwise the request proceeds with a [`Caller`] extension
pub async fn auth_middleware(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let key = presented_key(req.headers());

    if !state.auth_enabled() {
        let caller = match (&key, peer_addr(&req)) {
            (Some(k), _) => key_label(k),
            (None, Some(addr)) => format!("addr:{}", addr.ip()),
            (None, None) => Caller::anonymous().0,
        };
        req.extensions_mut().insert(Caller(caller));
        return next.run(req).await;
    }

    let Some(key) = key.filter(|k| state.is_valid_key(k)) else {
        return AppError::unauthorized("missing or invalid API key").into_response();
    };

    let decision = state.ctx.api_key_limiter.check(&key);
    if !decision.allowed {
        return rejected(&decision);
    }

    req.extensions_mut().insert(Caller(key_label(&key)));
    let mut response = next.run(req).await;
    apply_rate_headers(response.headers_mut(), &decision);
    response
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use tollgate_core::error::GateError;

// ---------------------------------------------------------------------------
// AppError: unified error type for HTTP responses
// ---------------------------------------------------------------------------

/// Unified error type for HTTP responses.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self(GateError::NotFound(msg.into()).into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self(GateError::InvalidParams(msg.into()).into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self(Unauthorized(msg.into()).into())
    }
}

/// Sentinel carrying an explicit 401 through the `anyhow::Error` chain.
#[derive(Debug)]
struct Unauthorized(String);

impl std::fmt::Display for Unauthorized {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for Unauthorized {}

fn status_for(e: &GateError) -> StatusCode {
    match e {
        GateError::NotFound(_) => StatusCode::NOT_FOUND,
        GateError::Parse(_) | GateError::InvalidRequest(_) | GateError::InvalidParams(_) => {
            StatusCode::BAD_REQUEST
        }
        GateError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        GateError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        GateError::BreakerOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
        GateError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        GateError::Downstream(_) => StatusCode::BAD_GATEWAY,
        GateError::TrustDb(_) | GateError::Io(_) | GateError::Yaml(_) | GateError::Json(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let Some(u) = self.0.downcast_ref::<Unauthorized>() {
            let body = serde_json::json!({ "error": u.0.clone() });
            return (StatusCode::UNAUTHORIZED, axum::Json(body)).into_response();
        }

        let Some(e) = self.0.downcast_ref::<GateError>() else {
            let body = serde_json::json!({ "error": self.0.to_string() });
            return (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(body)).into_response();
        };

        let status = status_for(e);
        let mut body = serde_json::json!({ "error": e.to_string() });
        let retry_after = e.retry_after_secs();
        if let Some(secs) = retry_after {
            body["retryAfter"] = secs.into();
        }

        let mut response = (status, axum::Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

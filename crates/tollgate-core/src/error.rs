use thiserror::Error;

#[derive(Debug, Error)]
pub enum GateError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("{0}")]
    NotFound(String),

    /// Admission denial. The reason is always human-readable.
    #[error("[BLOCKED] {0}")]
    PermissionDenied(String),

    #[error("rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("circuit breaker '{name}' is open: next probe in {retry_in_ms}ms")]
    BreakerOpen { name: String, retry_in_ms: u64 },

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("downstream failure: {0}")]
    Downstream(String),

    #[error("trust store error: {0}")]
    TrustDb(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl GateError {
    /// JSON-RPC error code carried on the wire for this error.
    pub fn rpc_code(&self) -> i32 {
        match self {
            GateError::Parse(_) => -32700,
            GateError::InvalidRequest(_) => -32600,
            GateError::InvalidParams(_) => -32602,
            GateError::NotFound(_) => -32601,
            _ => -32000,
        }
    }

    /// Seconds a caller should wait before retrying, for recoverable conditions.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            GateError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            GateError::BreakerOpen { retry_in_ms, .. } => Some(retry_in_ms.div_ceil(1000)),
            _ => None,
        }
    }

    /// Rate limiting and open breakers clear on their own; callers may retry.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            GateError::RateLimited { .. } | GateError::BreakerOpen { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, GateError>;

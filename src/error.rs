//! Gateway error taxonomy and its HTTP wire form
//!
//! Every failure that leaves the gateway is a [`GatewayError`]. Transport
//! errors from member clusters or the metrics backend are converted at the
//! backend boundary, so handlers never see raw `reqwest` or `kube` errors.
//!
//! Wire form (all endpoints):
//!
//! ```json
//! {"error": {"code": "NOT_FOUND", "message": "...", "requestId": "...", "details": {...}}}
//! ```

use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

/// Machine-readable error kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    NotFound,
    InvalidArgument,
    InvalidCredential,
    ResourceExceeded,
    Unavailable,
    Timeout,
    Conflict,
    AlreadyExists,
    Internal,
}

impl ErrorKind {
    pub fn status_code(self) -> StatusCode {
        match self {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
            ErrorKind::InvalidCredential => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::ResourceExceeded => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::Conflict | ErrorKind::AlreadyExists => StatusCode::CONFLICT,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::InvalidArgument => "INVALID_ARGUMENT",
            ErrorKind::InvalidCredential => "INVALID_CREDENTIAL",
            ErrorKind::ResourceExceeded => "RESOURCE_EXCEEDED",
            ErrorKind::Unavailable => "UNAVAILABLE",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::AlreadyExists => "ALREADY_EXISTS",
            ErrorKind::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by every gateway operation
#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    InvalidCredential(String),

    #[error("{0}")]
    ResourceExceeded(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Timeout(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    AlreadyExists(String),

    #[error("{0}")]
    Internal(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::NotFound(_) => ErrorKind::NotFound,
            GatewayError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            GatewayError::InvalidCredential(_) => ErrorKind::InvalidCredential,
            GatewayError::ResourceExceeded(_) => ErrorKind::ResourceExceeded,
            GatewayError::Unavailable(_) => ErrorKind::Unavailable,
            GatewayError::Timeout(_) => ErrorKind::Timeout,
            GatewayError::Conflict(_) => ErrorKind::Conflict,
            GatewayError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            GatewayError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            GatewayError::NotFound(m)
            | GatewayError::InvalidArgument(m)
            | GatewayError::InvalidCredential(m)
            | GatewayError::ResourceExceeded(m)
            | GatewayError::Unavailable(m)
            | GatewayError::Timeout(m)
            | GatewayError::Conflict(m)
            | GatewayError::AlreadyExists(m)
            | GatewayError::Internal(m) => m,
        }
    }

    pub fn not_found(kind: &str, name: impl fmt::Display) -> Self {
        GatewayError::NotFound(format!("{} '{}' not found", kind, name))
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        GatewayError::InvalidArgument(message.into())
    }

    /// Remote failures that carry the cluster name for the caller
    pub fn unavailable(cluster: &str, cause: impl fmt::Display) -> Self {
        GatewayError::Unavailable(format!("cluster '{}' is unavailable: {}", cluster, cause))
    }

    pub fn timeout(target: &str, after: std::time::Duration) -> Self {
        GatewayError::Timeout(format!(
            "call to '{}' timed out after {}ms",
            target,
            after.as_millis()
        ))
    }

    /// Whether the caller may retry without re-reading state first
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Unavailable | ErrorKind::Timeout)
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::Internal(format!("serialization failed: {}", e))
    }
}

// ============================================================================
// Wire form
// ============================================================================

/// Body of every error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: ErrorKind,
    pub message: String,
    #[serde(rename = "requestId")]
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorBody {
    pub fn from_error(err: &GatewayError) -> Self {
        Self {
            error: ErrorDetail {
                code: err.kind(),
                message: err.message().to_string(),
                request_id: uuid::Uuid::new_v4().to_string(),
                details: None,
            },
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let body = ErrorBody::from_error(&self);
        match kind {
            ErrorKind::Internal => error!(request_id = %body.error.request_id, "{}", self),
            ErrorKind::Unavailable | ErrorKind::Timeout => {
                warn!(request_id = %body.error.request_id, code = %kind, "{}", self)
            }
            _ => {}
        }
        (kind.status_code(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            GatewayError::not_found("cluster", "x").kind().status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ErrorKind::Timeout.status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_ne!(
            ErrorKind::Timeout.status_code(),
            ErrorKind::Unavailable.status_code()
        );
    }

    #[test]
    fn test_error_body_shape() {
        let err = GatewayError::invalid("page must be >= 1");
        let value = serde_json::to_value(ErrorBody::from_error(&err)).unwrap();
        assert_eq!(value["error"]["code"], "INVALID_ARGUMENT");
        assert_eq!(value["error"]["message"], "page must be >= 1");
        assert!(value["error"]["requestId"].is_string());
        assert!(value["error"].get("details").is_none());
    }

    #[test]
    fn test_retryable() {
        assert!(GatewayError::Unavailable("down".into()).is_retryable());
        assert!(!GatewayError::Conflict("stale".into()).is_retryable());
    }
}

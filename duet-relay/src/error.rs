//! Error types for duet-relay.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Main error type for relay startup and background operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored value failed to parse back into its domain type.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Request authentication failures.
///
/// All variants surface to the caller as a uniform 401; the variant only
/// drives logging, never the response body.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// One or more of the three auth headers is absent.
    #[error("missing auth headers")]
    MissingHeaders,

    /// A header is present but malformed.
    #[error("bad auth header: {0}")]
    BadHeader(String),

    /// Timestamp unparseable or outside the freshness window.
    #[error("timestamp outside freshness window")]
    ClockSkew,

    /// The signature does not cover the canonical request bytes.
    #[error("signature verification failed")]
    BadSignature,

    /// The signing key is not registered.
    #[error("unknown user")]
    UnknownUser,
}

/// HTTP-facing error with the uniform `{"error": "..."}` envelope.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Validation or business-rule failure (400).
    #[error("{0}")]
    InvalidInput(String),

    /// Signature, replay, or identity failure (401). Deliberately
    /// carries no detail about which check failed.
    #[error("unauthorized")]
    Unauthenticated,

    /// Referenced object does not exist (404).
    #[error("{0}")]
    NotFound(String),

    /// Reserved (409). The current design resolves conflicts by upsert
    /// and CAS, so this is never constructed.
    #[error("{0}")]
    Conflict(String),

    /// Consumed or expired token (410).
    #[error("{0}")]
    Gone(String),

    /// Request or upload cap exceeded (429).
    #[error("{0}")]
    RateLimited(String),

    /// Anything unexpected (500). Details go to logs, not the body.
    #[error("internal error")]
    Internal,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Gone(_) => StatusCode::GONE,
            ApiError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("request failed: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        tracing::debug!("authentication failed: {}", err);
        ApiError::Unauthenticated
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        tracing::error!("storage failure in request path: {}", err);
        ApiError::Internal
    }
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Result type alias for handler-level operations.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

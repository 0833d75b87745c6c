//! # Error Types
//!
//! Every failure the engine surfaces falls into one of three kinds:
//! malformed or disallowed input, a missing resource, or an unexpected
//! collaborator failure.

use axum::http::StatusCode;
use thiserror::Error;

/// Result type for query engine operations
pub type ODataResult<T> = Result<T, ODataError>;

/// Query engine errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ODataError {
    /// Malformed or disallowed filter, invalid delta token, invalid batch method
    #[error("{0}")]
    BadRequest(String),

    /// Unknown resource or unmatched changeset precondition
    #[error("{0}")]
    NotFound(String),

    /// Unexpected failure from a collaborator call
    #[error("{0}")]
    ServerError(String),
}

impl ODataError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn server(msg: impl Into<String>) -> Self {
        Self::ServerError(msg.into())
    }

    /// Error code carried in the `{ error: { code, message } }` body
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "BadRequest",
            Self::NotFound(_) => "NotFound",
            Self::ServerError(_) => "ServerError",
        }
    }

    /// HTTP status for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The human-readable message without the variant prefix
    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest(m) | Self::NotFound(m) | Self::ServerError(m) => m,
        }
    }

    /// JSON error body shared by HTTP responses and batch entries
    pub fn to_body(&self) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "code": self.code(),
                "message": self.message(),
            }
        })
    }
}

impl From<serde_json::Error> for ODataError {
    fn from(e: serde_json::Error) -> Self {
        Self::BadRequest(e.to_string())
    }
}

impl From<std::io::Error> for ODataError {
    fn from(e: std::io::Error) -> Self {
        Self::ServerError(e.to_string())
    }
}

//! Status codes returned across the service boundary

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::store::StoreError;

/// Failure classes surfaced by the worker-facing and read-facing services
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Code {
    /// No matching row, or the row exists but is not loaded yet
    NotFound,
    AlreadyExists,
    /// Lost a claim or transition race; the caller should retry
    FailedPrecondition,
    InvalidArgument,
    Internal,
}

impl Code {
    pub fn http_status(self) -> StatusCode {
        match self {
            Code::NotFound => StatusCode::NOT_FOUND,
            Code::AlreadyExists => StatusCode::CONFLICT,
            Code::FailedPrecondition => StatusCode::PRECONDITION_FAILED,
            Code::InvalidArgument => StatusCode::BAD_REQUEST,
            Code::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for Code {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Code::NotFound => write!(f, "NOT_FOUND"),
            Code::AlreadyExists => write!(f, "ALREADY_EXISTS"),
            Code::FailedPrecondition => write!(f, "FAILED_PRECONDITION"),
            Code::InvalidArgument => write!(f, "INVALID_ARGUMENT"),
            Code::Internal => write!(f, "INTERNAL"),
        }
    }
}

/// A coded error with a human-readable message
#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}")]
pub struct Status {
    pub code: Code,
    pub message: String,
}

pub type StatusResult<T> = std::result::Result<T, Status>;

impl Status {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Code::NotFound, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(Code::AlreadyExists, message)
    }

    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::new(Code::FailedPrecondition, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Code::Internal, message)
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn is_race(&self) -> bool {
        self.code == Code::FailedPrecondition
    }
}

impl From<StoreError> for Status {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ConcurrentUpdate => {
                Status::failed_precondition("concurrent update to model status")
            }
            StoreError::NotFound => Status::not_found("record not found"),
            StoreError::AlreadyExists => Status::already_exists("record already exists"),
            other => Status::internal(other.to_string()),
        }
    }
}

impl IntoResponse for Status {
    fn into_response(self) -> Response {
        if self.code == Code::Internal {
            tracing::error!(error = %self.message, "Internal error");
        }

        let body = Json(ErrorResponse {
            code: self.code,
            error: self.message,
            timestamp: chrono::Utc::now(),
        });

        (self.code.http_status(), body).into_response()
    }
}

/// JSON error body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: Code,
    pub error: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_mapping() {
        assert_eq!(
            Status::from(StoreError::ConcurrentUpdate).code(),
            Code::FailedPrecondition
        );
        assert_eq!(Status::from(StoreError::NotFound).code(), Code::NotFound);
        assert_eq!(
            Status::from(StoreError::AlreadyExists).code(),
            Code::AlreadyExists
        );
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(Code::NotFound.http_status(), StatusCode::NOT_FOUND);
        assert_eq!(Code::AlreadyExists.http_status(), StatusCode::CONFLICT);
        assert_eq!(
            Code::FailedPrecondition.http_status(),
            StatusCode::PRECONDITION_FAILED
        );
        assert_eq!(Code::InvalidArgument.http_status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_display() {
        let status = Status::invalid_argument("id is required");
        assert_eq!(status.to_string(), "INVALID_ARGUMENT: id is required");
        assert!(!status.is_race());
        assert!(Status::failed_precondition("race").is_race());
    }
}

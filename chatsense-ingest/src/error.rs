//! Error types for chatsense-ingest
//!
//! Failures local to one event never surface here: the classification stage
//! turns them into `Error` results. What does surface is session-level
//! (join/leave), capacity, and persistence trouble.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Main error type for chatsense-ingest
#[derive(Error, Debug)]
pub enum Error {
    /// Join did not complete within the fail-fast bound
    #[error("Could not join source '{0}' within {1:?}; it may not exist or access may be denied")]
    JoinTimeout(String, Duration),

    /// Event source refused the join
    #[error("Could not join source '{source_id}': {reason}")]
    JoinRejected { source_id: String, reason: String },

    /// Another join/leave transition is in flight
    #[error("Session busy: {0}")]
    SessionBusy(String),

    /// Command not valid in the current session state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Invalid operator input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Pipeline no longer admits events
    #[error("Pipeline is shutting down")]
    ShuttingDown,

    /// Event source collaborator errors
    #[error("Event source error: {0}")]
    Source(String),

    /// Durable log errors
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// SQLite sink errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// CSV encoding errors
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// chatsense-common error
    #[error("Common error: {0}")]
    Common(#[from] chatsense_common::Error),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience Result type using chatsense-ingest Error
pub type Result<T> = std::result::Result<T, Error>;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Join failed: channel missing or access denied (404)
    #[error("Join failed: {0}")]
    JoinFailed(String),

    /// Conflict (409) - e.g., another transition in flight
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Shutting down (503)
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let message = err.to_string();
        match err {
            Error::InvalidInput(_) => ApiError::BadRequest(message),
            Error::JoinTimeout(..) | Error::JoinRejected { .. } => ApiError::JoinFailed(message),
            Error::SessionBusy(_) | Error::InvalidState(_) => ApiError::Conflict(message),
            Error::ShuttingDown => ApiError::Unavailable(message),
            _ => ApiError::Internal(message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::JoinFailed(msg) => (StatusCode::NOT_FOUND, "JOIN_FAILED", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Unavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "SHUTTING_DOWN", msg)
            }
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg,
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = std::result::Result<T, ApiError>;

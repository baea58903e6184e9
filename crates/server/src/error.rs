// crates/server/src/error.rs
use applydesk_server_jobs::SubscribeError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Structured JSON error response for API errors
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

/// API error types that map to HTTP status codes
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

impl From<SubscribeError> for ApiError {
    fn from(err: SubscribeError) -> Self {
        match err {
            SubscribeError::NotFound(key) => ApiError::SessionNotFound(key),
            e @ SubscribeError::AlreadySubscribed(_) => ApiError::Conflict(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match &self {
            ApiError::SessionNotFound(key) => {
                tracing::warn!(key = %key, "Session not found");
                (
                    StatusCode::NOT_FOUND,
                    ErrorResponse::with_details("Session not found", format!("Key: {}", key)),
                )
            }
            ApiError::BadRequest(msg) => {
                tracing::warn!(message = %msg, "Bad request");
                (
                    StatusCode::BAD_REQUEST,
                    ErrorResponse::with_details("Bad request", msg.clone()),
                )
            }
            ApiError::Conflict(msg) => {
                tracing::warn!(message = %msg, "Conflict");
                (
                    StatusCode::CONFLICT,
                    ErrorResponse::with_details("Conflict", msg.clone()),
                )
            }
        };

        (status, Json(error_response)).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

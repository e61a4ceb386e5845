//! Error handling for the authority API

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use recall_sync::AuthorityError;
use serde::Serialize;
use thiserror::Error;

/// API error types
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Card identity sequence exhausted")]
    IdentityExhausted,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::IdentityExhausted => (StatusCode::CONFLICT, "identity_exhausted"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message: self.to_string(),
        });

        (status, body).into_response()
    }
}

impl From<AuthorityError> for ApiError {
    fn from(e: AuthorityError) -> Self {
        match e {
            AuthorityError::IdentityExhausted => ApiError::IdentityExhausted,
            AuthorityError::UnknownDevice(device) => {
                ApiError::Unauthorized(format!("Unknown device {device}"))
            }
            e @ AuthorityError::HashMismatch(_) => ApiError::BadRequest(e.to_string()),
            e @ AuthorityError::Snapshot(_) => ApiError::Internal(e.to_string()),
        }
    }
}

/// Result type alias for API operations
pub type Result<T> = std::result::Result<T, ApiError>;

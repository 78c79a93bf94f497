//! Caller-visible error taxonomy.
//!
//! `Validation`, `NotFound`, `Forbidden` and `Unauthorized` are client errors
//! and never worth retrying. `TransientStore` means the database could not
//! serve the request right now; the write did not happen and the caller may
//! retry with backoff.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use huddle_proto::ErrorCode;
use rusqlite::ErrorCode as SqliteCode;
use thiserror::Error;
use tracing::error;

pub type ChatResult<T> = Result<T, ChatError>;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("store temporarily unavailable: {0}")]
    TransientStore(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ChatError {
    pub fn validation(message: impl Into<String>) -> Self {
        ChatError::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ChatError::NotFound(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ChatError::Forbidden(message.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            ChatError::Validation(_) => ErrorCode::Validation,
            ChatError::NotFound(_) => ErrorCode::NotFound,
            ChatError::Forbidden(_) => ErrorCode::Forbidden,
            ChatError::Unauthorized => ErrorCode::Unauthorized,
            ChatError::TransientStore(_) => ErrorCode::Unavailable,
            ChatError::Internal(_) => ErrorCode::Internal,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ChatError::Validation(_) => StatusCode::BAD_REQUEST,
            ChatError::NotFound(_) => StatusCode::NOT_FOUND,
            ChatError::Forbidden(_) => StatusCode::FORBIDDEN,
            ChatError::Unauthorized => StatusCode::UNAUTHORIZED,
            ChatError::TransientStore(_) => StatusCode::SERVICE_UNAVAILABLE,
            ChatError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ChatError::TransientStore(_))
    }

    /// Message safe to hand to a caller. Internal details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            ChatError::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<rusqlite::Error> for ChatError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(failure, _)
                if matches!(
                    failure.code,
                    SqliteCode::DatabaseBusy | SqliteCode::DatabaseLocked
                ) =>
            {
                ChatError::TransientStore(e.to_string())
            }
            _ => ChatError::Internal(e.to_string()),
        }
    }
}

impl From<r2d2::Error> for ChatError {
    fn from(e: r2d2::Error) -> Self {
        // r2d2 only fails checkout on timeout or a broken connection attempt
        ChatError::TransientStore(e.to_string())
    }
}

impl From<tokio::task::JoinError> for ChatError {
    fn from(e: tokio::task::JoinError) -> Self {
        ChatError::TransientStore(format!("blocking task failed: {}", e))
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }

        let body = serde_json::json!({
            "error": self.code(),
            "message": self.public_message(),
            "status": status.as_u16(),
        });
        (status, Json(body)).into_response()
    }
}

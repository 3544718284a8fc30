//! Error types for the application

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Malformed input: missing package id or username
    #[error("{0}")]
    Validation(String),

    /// Package, user, or confirmation code could not be resolved
    #[error("{0}")]
    NotFound(String),

    /// Caller lacks management rights over the package
    #[error("{0}")]
    Authorization(String),

    /// A requirement on the target user is not met (e.g. unconfirmed email)
    #[error("{0}")]
    Precondition(String),

    /// The requested transition is already satisfied or impossible
    #[error("{0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// The fixed user-facing message for failures that are recovered at the
    /// workflow boundary. `None` for faults that should propagate as errors.
    pub fn user_message(&self) -> Option<&str> {
        match self {
            AppError::Validation(m)
            | AppError::NotFound(m)
            | AppError::Authorization(m)
            | AppError::Precondition(m)
            | AppError::Conflict(m) => Some(m),
            AppError::Database(_) | AppError::Internal(_) => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Workflow failures surface as a non-throwing JSON result; only
        // unexpected faults become HTTP errors.
        if let Some(message) = self.user_message() {
            return Json(json!({ "success": false, "message": message })).into_response();
        }

        let (status, message) = match &self {
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.clone())
            }
            _ => unreachable!("user-facing errors handled above"),
        };

        (status, message).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

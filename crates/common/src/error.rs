use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Common error types used across the application.
///
/// Push provider failures are deliberately absent: they are absorbed into
/// dispatch accounting and never reach an HTTP caller.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database operation failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl AppError {
    /// Stable machine-readable code returned alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Database(_) => "DB_OPERATION_FAILED",
            AppError::Redis(_) => "SERVER_ERROR",
            AppError::Auth(_) => "UNAUTHORIZED",
            AppError::Validation(_) => "VALIDATION_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Database(_) | AppError::Redis(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AppError::Auth(msg) | AppError::Validation(msg) => msg.clone(),
            AppError::Database(_) | AppError::Redis(_) => {
                tracing::error!(error = %self, "Request failed on storage error");
                self.to_string()
            }
        };

        let body = json!({ "error": message, "code": self.code() });
        (status, Json(body)).into_response()
    }
}

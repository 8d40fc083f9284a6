use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Message returned to clients for every internal failure class.
pub const GENERIC_FAILURE_MESSAGE: &str = "Internal server error";

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Bad input shape or range, rejected before any mutation
    #[error("Validation error: {0}")]
    Validation(String),
    /// Sealing an empty window; callers skip persistence
    #[error("No data to seal for request {0}")]
    NoData(String),
    /// Missing or invalid credentials
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    /// Authenticated but not allowed (unverified account, foreign resource)
    #[error("Forbidden: {0}")]
    Forbidden(String),
    /// Search timed out or was cancelled
    #[error("Search cancelled: {0}")]
    Cancelled(String),
    /// Unknown resource
    #[error("Not found: {0}")]
    NotFound(String),
    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
    /// Unexpected failure in accumulation or downstream persistence
    #[error("Internal error: {0}")]
    Internal(String),
    /// Database failure
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NoData(_) => StatusCode::CONFLICT,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Cancelled(_) => StatusCode::REQUEST_TIMEOUT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ConfigError(_) | Self::Internal(_) | Self::Database(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to hand back to a client
    pub fn public_message(&self) -> String {
        match self {
            Self::ConfigError(_) | Self::Internal(_) | Self::Database(_) => {
                GENERIC_FAILURE_MESSAGE.to_string()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(error = %self, error_type = error_type_name(&self), "Request failed");
        } else {
            tracing::debug!(error = %self, error_type = error_type_name(&self), "Request rejected");
        }

        let body = Json(json!({
            "success": false,
            "message": self.public_message(),
        }));

        (status, body).into_response()
    }
}

pub fn error_type_name(error: &AppError) -> &'static str {
    match error {
        AppError::Validation(_) => "validation_error",
        AppError::NoData(_) => "no_data",
        AppError::Unauthorized(_) => "unauthorized",
        AppError::Forbidden(_) => "forbidden",
        AppError::Cancelled(_) => "cancelled",
        AppError::NotFound(_) => "not_found",
        AppError::ConfigError(_) => "config_error",
        AppError::Internal(_) => "internal_error",
        AppError::Database(_) => "database_error",
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("JSON error: {}", err))
    }
}

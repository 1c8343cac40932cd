//! Application error handling.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Error response structure for consistent API responses
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    pub message: String,
    pub correlation_id: String,
    pub timestamp: String,
}

/// Main application error type
#[derive(Debug, Error)]
pub enum AppError {
    // Authentication errors
    #[error("Authentication token required")]
    TokenRequired,

    #[error("Authentication token expired")]
    TokenExpired,

    #[error("Authentication token invalid")]
    TokenInvalid,

    // Request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Resource not found: {resource}")]
    NotFound { resource: String },

    #[error("Precondition failed: {message}")]
    PreconditionFailed { message: String },

    #[error("Resource conflict: {message}")]
    Conflict { message: String },

    // External service errors
    #[error("External service error: {service}")]
    ExternalService { service: String, message: String },

    // Database errors
    #[error("Database connection failed")]
    DatabaseConnectionFailed,

    #[error("Database query failed")]
    DatabaseQueryFailed(sqlx::Error),

    #[error("Database constraint violation")]
    DatabaseConstraintViolation(String),

    // System errors
    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal server error")]
    Internal { message: Option<String> },
}

impl AppError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,

            AppError::TokenRequired | AppError::TokenExpired | AppError::TokenInvalid => {
                StatusCode::UNAUTHORIZED
            }

            AppError::NotFound { .. } => StatusCode::NOT_FOUND,

            AppError::Conflict { .. } | AppError::DatabaseConstraintViolation(_) => {
                StatusCode::CONFLICT
            }

            AppError::PreconditionFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,

            AppError::ExternalService { .. } => StatusCode::BAD_GATEWAY,

            AppError::DatabaseConnectionFailed => StatusCode::SERVICE_UNAVAILABLE,

            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::TokenRequired => "AUTH_TOKEN_REQUIRED",
            AppError::TokenExpired => "AUTH_TOKEN_EXPIRED",
            AppError::TokenInvalid => "AUTH_TOKEN_INVALID",
            AppError::InvalidRequest(_) => "INVALID_REQUEST",
            AppError::NotFound { .. } => "RESOURCE_NOT_FOUND",
            AppError::PreconditionFailed { .. } => "PRECONDITION_FAILED",
            AppError::Conflict { .. } => "RESOURCE_CONFLICT",
            AppError::ExternalService { .. } => "EXTERNAL_SERVICE_ERROR",
            AppError::DatabaseConnectionFailed => "DATABASE_CONNECTION_FAILED",
            AppError::DatabaseQueryFailed(_) => "DATABASE_QUERY_FAILED",
            AppError::DatabaseConstraintViolation(_) => "DATABASE_CONSTRAINT_VIOLATION",
            AppError::ConfigurationError { .. } => "CONFIGURATION_ERROR",
            AppError::Internal { .. } => "INTERNAL_SERVER_ERROR",
        }
    }

    /// Get user-facing message for this error
    pub fn user_message(&self) -> String {
        match self {
            AppError::TokenRequired => "Authentication required".to_string(),
            AppError::TokenExpired => "Session expired, please log in again".to_string(),
            AppError::TokenInvalid => "Invalid authentication token".to_string(),
            AppError::InvalidRequest(msg) => msg.clone(),
            AppError::NotFound { resource } => format!("{resource} not found"),
            AppError::PreconditionFailed { message } => message.clone(),
            AppError::Conflict { message } => message.clone(),
            AppError::ExternalService { service, .. } => {
                format!("Error communicating with {service}")
            }
            _ => "An unexpected error occurred".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let correlation_id = Uuid::new_v4().to_string();
        let status = self.status_code();
        let error_code = self.error_code();
        let user_message = self.user_message();

        match &self {
            AppError::Internal { .. }
            | AppError::DatabaseConnectionFailed
            | AppError::DatabaseQueryFailed(_)
            | AppError::ConfigurationError { .. } => {
                tracing::error!(
                    correlation_id = %correlation_id,
                    error_code = %error_code,
                    error = %self,
                    "Server error occurred"
                );
            }
            AppError::ExternalService { service, message } => {
                tracing::warn!(
                    correlation_id = %correlation_id,
                    error_code = %error_code,
                    service = %service,
                    message = %message,
                    "External service error"
                );
            }
            _ => {
                tracing::info!(
                    correlation_id = %correlation_id,
                    error_code = %error_code,
                    error = %self,
                    "Client error occurred"
                );
            }
        }

        let error_response = ErrorResponse {
            error: self.to_string(),
            error_code: error_code.to_string(),
            message: user_message,
            correlation_id,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(error_response)).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) => {
                if db_err.is_unique_violation() {
                    AppError::DatabaseConstraintViolation(
                        "Unique constraint violation".to_string(),
                    )
                } else if db_err.is_foreign_key_violation() {
                    AppError::DatabaseConstraintViolation(
                        "Foreign key constraint violation".to_string(),
                    )
                } else {
                    AppError::DatabaseQueryFailed(err)
                }
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                AppError::DatabaseConnectionFailed
            }
            _ => AppError::DatabaseQueryFailed(err),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal {
            message: Some(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidRequest(format!("JSON error: {err}"))
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AppError::TokenExpired,
            _ => AppError::TokenInvalid,
        }
    }
}

/// Result type alias for application errors
pub type Result<T> = std::result::Result<T, AppError>;

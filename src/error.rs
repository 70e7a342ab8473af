use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::permission::AuthzError;

/// Errors a handler can answer with
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// The record is still referenced elsewhere, or the value is taken
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error(transparent)]
    Authz(#[from] AuthzError),
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    code: u16,
    message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl AppError {
    /// HTTP status and short headline for the response body
    fn classify(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "Not Found"),
            AppError::Conflict(_) => (StatusCode::CONFLICT, "Conflict"),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "Validation Error"),
            AppError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Database Error"),
            AppError::Authz(err) => match err {
                AuthzError::NotFound { .. } => (StatusCode::NOT_FOUND, "Not Found"),
                AuthzError::InvalidModel(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Invalid Model"),
                AuthzError::EnforcerInit(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "Enforcer Unavailable")
                }
                AuthzError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Policy Storage Error"),
                AuthzError::Matcher(_) => (StatusCode::UNPROCESSABLE_ENTITY, "Request Rejected"),
                AuthzError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "Timeout"),
                AuthzError::Sync { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "Policy Sync Failed"),
            },
        }
    }

    /// Text shown to the caller; database failures stay in the log
    fn details(&self) -> Option<String> {
        match self {
            AppError::NotFound(msg) | AppError::Conflict(msg) | AppError::Validation(msg) => {
                Some(msg.clone())
            }
            AppError::Database(_) => None,
            AppError::Authz(err) => Some(err.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = self.classify();
        if status.is_server_error() {
            tracing::error!("{} ({}): {}", message, status.as_u16(), self);
        }

        let body = ErrorResponse {
            code: status.as_u16(),
            message,
            details: self.details(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type alias for application
pub type AppResult<T> = Result<T, AppError>;

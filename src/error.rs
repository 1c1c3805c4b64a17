//! Application error types

use crate::validation::ValidationError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Validation failed: {}", summarize(.0))]
    Validation(Vec<ValidationError>),

    #[error("Compliance contradiction: {0}")]
    ComplianceContradiction(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not ready: {0}")]
    NotReady(String),

    #[error("Version conflict: {0}")]
    Conflict(String),

    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn summarize(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl AppError {
    /// Stable machine-readable code for clients
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Http(_) => "HTTP_ERROR",
            AppError::Encryption(_) => "ENCRYPTION_ERROR",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::ComplianceContradiction(_) => "COMPLIANCE_CONTRADICTION",
            AppError::AccessDenied(_) => "ACCESS_DENIED",
            AppError::Unauthenticated(_) => "UNAUTHENTICATED",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::NotReady(_) => "NOT_READY",
            AppError::Conflict(_) => "VERSION_CONFLICT",
            AppError::InvalidTransition(_) => "INVALID_TRANSITION",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Io(_) => "IO_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status equivalent of this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::ComplianceContradiction(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::AccessDenied(_) => StatusCode::FORBIDDEN,
            AppError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::NotReady(_) | AppError::Conflict(_) | AppError::InvalidTransition(_) => {
                StatusCode::CONFLICT
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Serializable error response for API clients
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub status: String,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ValidationError>,
}

impl From<AppError> for ErrorResponse {
    fn from(err: AppError) -> Self {
        let code = err.code().to_string();
        let message = err.to_string();
        let errors = match err {
            AppError::Validation(errors) => errors,
            _ => Vec::new(),
        };

        ErrorResponse {
            status: "error".to_string(),
            code,
            message,
            errors,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }
        (status, Json(ErrorResponse::from(self))).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_response_keeps_field_errors() {
        let err = AppError::Validation(vec![ValidationError::new(
            "title",
            "Title is required",
            "TITLE_REQUIRED",
        )]);
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);

        let response = ErrorResponse::from(err);
        assert_eq!(response.code, "VALIDATION_ERROR");
        assert_eq!(response.errors.len(), 1);
        assert_eq!(response.errors[0].code, "TITLE_REQUIRED");
        assert!(response.message.contains("title: Title is required"));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(AppError::NotReady("x".into()).status_code(), StatusCode::CONFLICT);
        assert_eq!(AppError::AccessDenied("x".into()).status_code(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::NotFound("x".into()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::Internal("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}

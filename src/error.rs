use axum::{Json,
    http::StatusCode,
    response::IntoResponse
};
use chrono::Utc;
use serde_json::json;
use thiserror::Error;

use crate::storage::StorageError;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Business rule violation: {0}")]
    BusinessRuleViolation(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    DatabaseError(#[from] sqlx::Error),
}

impl AppError {
    /// Stable error code reported to API consumers.
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::InvalidArgument(_) => "E1002",
            AppError::MissingParameter(_) => "E1003",
            AppError::NotFound(_) => "E4000",
            AppError::Conflict(_) => "E4001",
            AppError::BusinessRuleViolation(_) => "E6000",
            AppError::PermissionDenied(_) => "E3000",
            AppError::InternalError(_) | AppError::Storage(_) => "E1000",
            AppError::DatabaseError(_) => "E8000",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidArgument(_) | AppError::MissingParameter(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::BusinessRuleViolation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            AppError::InternalError(_) | AppError::Storage(_) | AppError::DatabaseError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Convert `AppError` into an HTTP response.
impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let error_code = self.error_code();

        // Internal details stay in the logs
        let message = match &self {
            AppError::DatabaseError(err) => {
                tracing::error!("Database Error: {:}", err);
                "Database error".to_string()
            }
            AppError::Storage(err) => {
                tracing::error!("Storage Error: {:}", err);
                "Storage error".to_string()
            }
            AppError::InternalError(msg) => {
                tracing::error!("Internal Error: {}", msg);
                msg.clone()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "success": false,
            "message": message,
            "data": null,
            "code": status.as_u16(),
            "error_code": error_code,
            "timestamp": Utc::now().to_rfc3339(),
        }));
        (status, body).into_response()
    }
}

pub type Result<T, E = AppError> = std::result::Result<T, E>;

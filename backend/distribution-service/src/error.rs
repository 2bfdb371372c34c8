/// Error types for Distribution Service
///
/// Every fallible operation in the service returns [`AppError`]. Errors are
/// converted to JSON HTTP responses so the ingestion clients and the admin
/// dashboard get a stable `{error, status}` shape.
use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use thiserror::Error;

/// Result type for distribution-service operations
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error types
#[derive(Debug, Error)]
pub enum AppError {
    /// Database operation failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Redis operation failed
    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    /// Payload failed field validation
    #[error("Invalid payload: {0}")]
    InvalidPayload(#[from] validator::ValidationErrors),

    /// Request-level validation failed
    #[error("Validation error: {0}")]
    Validation(String),

    /// Request body could not be parsed
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Missing or incorrect credentials
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Background queue is saturated
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("malformed JSON: {}", err))
    }
}

impl AppError {
    /// True for errors caused by the caller's input. These are never retried.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AppError::InvalidPayload(_) | AppError::Validation(_) | AppError::BadRequest(_)
        )
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Database(_) | AppError::Cache(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::InvalidPayload(_) | AppError::Validation(_) | AppError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();

        // Storage internals stay in the logs, not in the response body.
        let error_msg = match self {
            AppError::Database(e) => {
                tracing::error!(error = %e, "database error");
                "Database error".to_string()
            }
            AppError::Cache(e) => {
                tracing::error!(error = %e, "cache error");
                "Cache error".to_string()
            }
            other => other.to_string(),
        };

        let mut body = serde_json::json!({
            "error": error_msg,
            "status": status.as_u16(),
        });

        if let AppError::InvalidPayload(errors) = self {
            if let Ok(details) = serde_json::to_value(errors) {
                body["details"] = details;
            }
        }

        HttpResponse::build(status).json(body)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(format!("{:#}", err))
    }
}

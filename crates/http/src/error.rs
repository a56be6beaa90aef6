//! Error handling for the bookstore HTTP layer

use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bookstore_authz::AuthzError;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

/// Standard error response format for all HTTP errors
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub details: Vec<serde_json::Value>,
    pub message: String,
    pub code: String,
    pub trace_id: String,
    pub timestamp: String,
}

/// Application error types that map to HTTP responses
#[derive(Error, Debug)]
pub enum AppError {
    #[error("validation error: {message}")]
    Validation {
        details: Vec<serde_json::Value>,
        code: String,
        message: String,
    },

    #[error("not found: {message}")]
    NotFound { message: String, code: String },

    #[error("unauthorized: {message}")]
    Unauthorized { message: String, code: String },

    #[error("forbidden: {message}")]
    Forbidden { message: String, code: String },

    #[error("bad request: {message}")]
    BadRequest { message: String, code: String },

    #[error("timeout: {message}")]
    Timeout { message: String, code: String },

    #[error("service unavailable: {message}")]
    Unavailable { message: String, code: String },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Create a validation error
    pub fn validation(details: Vec<serde_json::Value>, message: impl Into<String>) -> Self {
        Self::Validation {
            details,
            code: "validation_error".to_string(),
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
            code: "not_found".to_string(),
        }
    }

    /// Create an unauthorized error
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
            code: "unauthorized".to_string(),
        }
    }

    /// Create a forbidden error
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
            code: "forbidden".to_string(),
        }
    }

    /// Create a bad request error
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
            code: "bad_request".to_string(),
        }
    }

    /// Create a timeout error for an operation that exceeded `limit`
    pub fn timeout(limit: Duration) -> Self {
        Self::Timeout {
            message: format!("operation exceeded {} ms", limit.as_millis()),
            code: "timeout".to_string(),
        }
    }

    /// Create a store-unavailable error
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
            code: "store_unavailable".to_string(),
        }
    }
}

impl From<AuthzError> for AppError {
    fn from(error: AuthzError) -> Self {
        match error {
            AuthzError::Unauthenticated => Self::unauthorized(error.to_string()),
            AuthzError::Forbidden { .. } => Self::forbidden(error.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let error_id = Uuid::new_v4();
        let timestamp = OffsetDateTime::now_utc().to_string();

        let (status, error_code, message, details) = match self {
            AppError::Validation {
                details,
                code,
                message,
            } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                code,
                message,
                Some(details),
            ),
            AppError::NotFound { message, code } => (StatusCode::NOT_FOUND, code, message, None),
            AppError::Unauthorized { message, code } => {
                (StatusCode::UNAUTHORIZED, code, message, None)
            }
            AppError::Forbidden { message, code } => (StatusCode::FORBIDDEN, code, message, None),
            AppError::BadRequest { message, code } => {
                (StatusCode::BAD_REQUEST, code, message, None)
            }
            AppError::Timeout { message, code } => {
                (StatusCode::GATEWAY_TIMEOUT, code, message, None)
            }
            AppError::Unavailable { message, code } => {
                (StatusCode::SERVICE_UNAVAILABLE, code, message, None)
            }
            AppError::Internal(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error".to_string(),
                e.to_string(),
                None,
            ),
        };

        tracing::error!(
            error_id = %error_id,
            error_code = %error_code,
            status_code = %status.as_u16(),
            message = %message,
            "Request error"
        );

        // In production, we might want to hide internal error details
        let message = if cfg!(not(debug_assertions)) && status == StatusCode::INTERNAL_SERVER_ERROR
        {
            "An internal server error occurred".to_string()
        } else {
            message
        };

        let body = ErrorBody {
            details: details.unwrap_or_default(),
            message,
            code: error_code,
            trace_id: error_id.to_string(),
            timestamp,
        };

        (status, Json(json!({ "success": false, "error": body }))).into_response()
    }
}

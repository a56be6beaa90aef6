use std::time::Duration;

use bookstore_db::StoreError;
use bookstore_http::AppError;
use serde::Serialize;
use thiserror::Error;

/// A single rejected input field, reported as `{"field": ..., "error": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub error: String,
}

impl FieldError {
    pub fn new(field: &'static str, error: impl Into<String>) -> Self {
        Self {
            field,
            error: error.into(),
        }
    }
}

/// Errors raised by the catalog store and the query service.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("invalid input")]
    Validation(Vec<FieldError>),

    #[error("book '{0}' not found")]
    NotFound(String),

    #[error("catalog operation exceeded {} ms", .0.as_millis())]
    Timeout(Duration),

    #[error("catalog store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("catalog store failed: {0}")]
    Store(String),
}

impl CatalogError {
    pub fn invalid(field: &'static str, error: impl Into<String>) -> Self {
        Self::Validation(vec![FieldError::new(field, error)])
    }
}

impl From<StoreError> for CatalogError {
    fn from(error: StoreError) -> Self {
        if error.is_unavailable() {
            Self::StoreUnavailable(error.to_string())
        } else {
            Self::Store(error.to_string())
        }
    }
}

impl From<serde_json::Error> for CatalogError {
    fn from(error: serde_json::Error) -> Self {
        Self::Store(format!("malformed book document: {error}"))
    }
}

impl From<CatalogError> for AppError {
    fn from(error: CatalogError) -> Self {
        match error {
            CatalogError::Validation(fields) => {
                let details = fields
                    .iter()
                    .map(|field| serde_json::json!(field))
                    .collect();
                AppError::validation(details, "request contains invalid fields")
            }
            CatalogError::NotFound(id) => AppError::not_found(format!("book '{id}' not found")),
            CatalogError::Timeout(limit) => AppError::timeout(limit),
            CatalogError::StoreUnavailable(message) => AppError::unavailable(message),
            CatalogError::Store(message) => AppError::Internal(anyhow::anyhow!(message)),
        }
    }
}

//! Error handling module
//!
//! Centralized error types and HTTP response conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::domain::DomainError;
use crate::store::StoreError;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Client errors (4xx)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // Domain errors
    #[error(transparent)]
    Domain(#[from] DomainError),

    // Store errors, mapped by kind
    #[error(transparent)]
    Store(#[from] StoreError),

    // Server errors (5xx)
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl From<crate::domain::PasswordError> for AppError {
    fn from(err: crate::domain::PasswordError) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        self.classify().0
    }

    fn classify(&self) -> (StatusCode, &'static str, Option<String>) {
        match self {
            AppError::InvalidRequest(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", Some(msg.clone()))
            }

            AppError::Domain(domain_err) => match domain_err {
                DomainError::InsufficientFunds { .. } => (
                    StatusCode::BAD_REQUEST,
                    "insufficient_funds",
                    Some(domain_err.to_string()),
                ),
                DomainError::InvalidAmount(err) => {
                    (StatusCode::BAD_REQUEST, "invalid_amount", Some(err.to_string()))
                }
                DomainError::SameAccountTransfer => {
                    (StatusCode::BAD_REQUEST, "same_account_transfer", None)
                }
                DomainError::CurrencyMismatch { .. } => (
                    StatusCode::BAD_REQUEST,
                    "currency_mismatch",
                    Some(domain_err.to_string()),
                ),
                DomainError::UnsupportedCurrency(code) => {
                    (StatusCode::BAD_REQUEST, "unsupported_currency", Some(code.clone()))
                }
                DomainError::InvalidField { .. } => (
                    StatusCode::BAD_REQUEST,
                    "invalid_field",
                    Some(domain_err.to_string()),
                ),
                DomainError::IncorrectPassword => {
                    (StatusCode::UNAUTHORIZED, "incorrect_password", None)
                }
            },

            AppError::Store(store_err) => match store_err {
                StoreError::NotFound(what) => {
                    (StatusCode::NOT_FOUND, "not_found", Some(what.clone()))
                }
                // Constraint violations are reported as permission denied
                StoreError::UniqueViolation(msg) => {
                    (StatusCode::FORBIDDEN, "already_exists", Some(msg.clone()))
                }
                StoreError::ForeignKeyViolation(msg) => {
                    (StatusCode::FORBIDDEN, "invalid_reference", Some(msg.clone()))
                }
                StoreError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout", None),
                StoreError::InvalidData(_) | StoreError::Database(_) => {
                    tracing::error!("Store error: {:?}", store_err);
                    (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
                }
            },

            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
            AppError::Config(e) => {
                tracing::error!("Config error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "config_error", None)
            }
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, details) = self.classify();

        let body = ErrorResponse {
            error: self.to_string(),
            error_code: error_code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

//! Domain Error Types
//!
//! Pure domain errors that don't depend on infrastructure.

use thiserror::Error;

use super::{AmountError, Currency};

/// Domain-specific errors
///
/// These errors represent business rule violations detected before or while
/// moving money. They are independent of the web/infrastructure layer.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// Debit would leave the account with a negative balance
    #[error("Insufficient funds in account {account_id}: balance would become {resulting_balance}")]
    InsufficientFunds {
        account_id: i64,
        resulting_balance: i64,
    },

    /// Invalid amount (zero, negative, or exceeds limit)
    #[error("Invalid amount: {0}")]
    InvalidAmount(#[from] AmountError),

    /// Transfer to same account
    #[error("Cannot transfer to the same account")]
    SameAccountTransfer,

    /// Account currency differs from the requested one
    #[error("Account {account_id} currency mismatch: {actual} vs {expected}")]
    CurrencyMismatch {
        account_id: i64,
        expected: Currency,
        actual: Currency,
    },

    /// Currency code outside the supported set
    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(String),

    /// Request field failed validation
    #[error("Invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// Password does not match the stored hash
    #[error("Incorrect password")]
    IncorrectPassword,
}

impl DomainError {
    pub fn invalid_field(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }

    /// Validation errors are rejected before any storage access
    pub fn is_validation_error(&self) -> bool {
        !matches!(
            self,
            Self::InsufficientFunds { .. } | Self::IncorrectPassword
        )
    }
}

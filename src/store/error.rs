//! Store Errors

use std::time::Duration;

/// PostgreSQL SQLSTATE for foreign key violations
pub const FOREIGN_KEY_VIOLATION: &str = "23503";

/// PostgreSQL SQLSTATE for unique constraint violations
pub const UNIQUE_VIOLATION: &str = "23505";

/// Errors that can occur in the store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Requested record does not exist (or is not yet visible)
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Duplicate value for a unique column
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    /// Referenced row does not exist
    #[error("Foreign key constraint violated: {0}")]
    ForeignKeyViolation(String),

    /// Unit of work did not finish before its deadline and was rolled back
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Stored row could not be mapped to a domain value
    #[error("Invalid stored data: {0}")]
    InvalidData(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(sqlx::Error),
}

impl StoreError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => StoreError::NotFound("row not found".to_string()),
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                Some(UNIQUE_VIOLATION) => StoreError::UniqueViolation(db_err.message().to_string()),
                Some(FOREIGN_KEY_VIOLATION) => {
                    StoreError::ForeignKeyViolation(db_err.message().to_string())
                }
                _ => StoreError::Database(err),
            },
            _ => StoreError::Database(err),
        }
    }
}

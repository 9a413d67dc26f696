//! Worker error types

use thiserror::Error;

/// Outcome of a failed task handler.
///
/// The processor consults the variant to decide between scheduling another
/// attempt and archiving the task.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskError {
    /// Never retried; the task is archived after this attempt
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// Retried with backoff until the task's retry budget is spent
    #[error("retriable failure: {0}")]
    Retriable(String),
}

impl TaskError {
    pub fn permanent(reason: impl std::fmt::Display) -> Self {
        Self::Permanent(reason.to_string())
    }

    pub fn retriable(reason: impl std::fmt::Display) -> Self {
        Self::Retriable(reason.to_string())
    }

    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Retriable(_))
    }
}

/// Broker failures
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    #[error("Broker configuration error: {0}")]
    Config(String),

    #[error("Task encoding error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure to hand a task to the broker
#[derive(Debug, Error)]
pub enum DistributeError {
    #[error("failed to marshal task payload: {0}")]
    Payload(#[source] serde_json::Error),

    #[error("failed to enqueue task: {0}")]
    Enqueue(#[from] BrokerError),
}

//! Task broker interface
//!
//! The distributor and the processor never talk to each other; both are
//! clients of a broker. A task moves between four places inside a broker:
//! scheduled (not yet due), pending (due), active (handed to a processor)
//! and archived (dead letters).

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::BrokerError;
use super::task::{Queue, Task, TaskInfo};

#[async_trait]
pub trait TaskBroker: Send + Sync {
    /// Store the task as pending, or scheduled when it is not yet due.
    async fn enqueue(&self, task: Task) -> Result<TaskInfo, BrokerError>;

    /// Move the first available pending task into the active set.
    ///
    /// Queues are tried in the given order; `None` means every queue is empty.
    async fn dequeue(&self, queues: &[Queue]) -> Result<Option<Task>, BrokerError>;

    /// Promote scheduled tasks that are due at `now` to pending and return
    /// how many were moved.
    async fn forward_scheduled(
        &self,
        queues: &[Queue],
        now: DateTime<Utc>,
    ) -> Result<u64, BrokerError>;

    /// Remove a successfully processed task from the active set.
    async fn complete(&self, task: &Task) -> Result<(), BrokerError>;

    /// Move an active task back to the scheduled set for another attempt.
    ///
    /// The caller has already updated `retried` and `last_error`.
    async fn retry(&self, task: &Task, process_at: DateTime<Utc>) -> Result<(), BrokerError>;

    /// Move an active task to the archive.
    async fn archive(&self, task: &Task) -> Result<(), BrokerError>;
}

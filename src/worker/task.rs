//! Task model
//!
//! A task is a typed, JSON-encoded payload plus the delivery policy the
//! broker and processor apply to it.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

/// Default number of retries before a task is archived
pub const DEFAULT_MAX_RETRY: u32 = 25;

/// Upper bound for the delay between two attempts
const MAX_RETRY_DELAY: Duration = Duration::from_secs(3600);

/// Named queue a task is delivered through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Queue {
    Critical,
    Default,
}

impl Queue {
    /// Queues in the order processors drain them
    pub const PRIORITY_ORDER: [Queue; 2] = [Queue::Critical, Queue::Default];

    pub fn name(&self) -> &'static str {
        match self {
            Queue::Critical => "critical",
            Queue::Default => "default",
        }
    }
}

impl fmt::Display for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Delivery options chosen by the distributor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOptions {
    pub queue: Queue,
    pub max_retry: u32,
    pub process_in: Option<Duration>,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            queue: Queue::Default,
            max_retry: DEFAULT_MAX_RETRY,
            process_in: None,
        }
    }
}

impl TaskOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(mut self, queue: Queue) -> Self {
        self.queue = queue;
        self
    }

    pub fn max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry;
        self
    }

    /// Delay the first attempt
    pub fn process_in(mut self, delay: Duration) -> Self {
        self.process_in = Some(delay);
        self
    }
}

/// Unit of deferred work as stored by the broker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(with = "hex")]
    pub payload: Vec<u8>,
    pub queue: Queue,
    pub max_retry: u32,
    /// Failed attempts so far
    pub retried: u32,
    pub process_at: DateTime<Utc>,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Task {
    pub fn new(type_name: impl Into<String>, payload: Vec<u8>, options: &TaskOptions) -> Self {
        let now = Utc::now();
        let process_at = match options.process_in {
            Some(delay) => now + chrono::Duration::from_std(delay).unwrap_or_default(),
            None => now,
        };
        Self {
            id: Uuid::new_v4(),
            type_name: type_name.into(),
            payload,
            queue: options.queue,
            max_retry: options.max_retry,
            retried: 0,
            process_at,
            enqueued_at: now,
            last_error: None,
        }
    }

    /// Build a task whose payload is the JSON encoding of `payload`
    pub fn with_json<P: Serialize>(
        type_name: impl Into<String>,
        payload: &P,
        options: &TaskOptions,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(type_name, serde_json::to_vec(payload)?, options))
    }

    pub fn decode_payload<P: DeserializeOwned>(&self) -> Result<P, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }

    /// Whether the task should run now or wait in the scheduled set
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.process_at <= now
    }

    pub fn retries_exhausted(&self) -> bool {
        self.retried >= self.max_retry
    }

    pub fn payload_lossy(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Exponential backoff: 2^retried seconds, capped at one hour
pub fn retry_delay(retried: u32) -> Duration {
    let secs = 1u64.checked_shl(retried.min(32)).unwrap_or(u64::MAX);
    Duration::from_secs(secs).min(MAX_RETRY_DELAY)
}

/// Lifecycle of a task as seen by the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting in a queue (pending or scheduled)
    Enqueued,
    /// Handed to a handler
    Processing,
    /// Failed with a retriable error, waiting for its next attempt
    RetryScheduled,
    Succeeded,
    /// Archived after a permanent error or exhausted retries
    Failed,
}

/// Broker acknowledgement of an enqueue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    pub id: Uuid,
    pub type_name: String,
    pub queue: Queue,
    pub max_retry: u32,
    pub process_at: DateTime<Utc>,
    pub state: TaskState,
}

impl From<&Task> for TaskInfo {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id,
            type_name: task.type_name.clone(),
            queue: task.queue,
            max_retry: task.max_retry,
            process_at: task.process_at,
            state: TaskState::Enqueued,
        }
    }
}

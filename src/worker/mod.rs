//! Background tasks
//!
//! The distributor enqueues tasks into a broker; processors, possibly in a
//! separate process, pull them back out and run the matching handler.
//! Failures are either `Permanent` (archived at once) or `Retriable`
//! (rescheduled with exponential backoff until `max_retry` is reached).

pub mod broker;
pub mod distributor;
pub mod error;
pub mod memory_broker;
pub mod processor;
pub mod redis_broker;
pub mod send_verify_email;
pub mod task;

pub use broker::TaskBroker;
pub use distributor::TaskDistributor;
pub use error::{BrokerError, DistributeError, TaskError};
pub use memory_broker::MemoryBroker;
pub use processor::{ProcessorConfig, ProcessorHandle, TaskHandler, TaskProcessor};
pub use redis_broker::RedisBroker;
pub use send_verify_email::{PayloadSendVerifyEmail, SendVerifyEmailHandler, TASK_SEND_VERIFY_EMAIL};
pub use task::{Queue, Task, TaskInfo, TaskOptions, TaskState};

//! Task distributor
//!
//! Serializes payloads and hands tasks to the broker. Returns once the
//! broker has acknowledged the enqueue, never waits for processing.

use std::sync::Arc;

use serde::Serialize;

use super::broker::TaskBroker;
use super::error::DistributeError;
use super::send_verify_email::{PayloadSendVerifyEmail, TASK_SEND_VERIFY_EMAIL};
use super::task::{Task, TaskInfo, TaskOptions};

#[derive(Clone)]
pub struct TaskDistributor {
    broker: Arc<dyn TaskBroker>,
}

impl TaskDistributor {
    pub fn new(broker: Arc<dyn TaskBroker>) -> Self {
        Self { broker }
    }

    /// Enqueue a task of `type_name` carrying the JSON encoding of `payload`
    pub async fn distribute_task<P: Serialize + Sync>(
        &self,
        type_name: &str,
        payload: &P,
        options: TaskOptions,
    ) -> Result<TaskInfo, DistributeError> {
        let task =
            Task::with_json(type_name, payload, &options).map_err(DistributeError::Payload)?;
        let payload_text = task.payload_lossy();

        let info = self.broker.enqueue(task).await?;

        tracing::info!(
            task_id = %info.id,
            task_type = %info.type_name,
            payload = %payload_text,
            queue = %info.queue,
            max_retry = info.max_retry,
            process_at = %info.process_at,
            "enqueued task"
        );

        Ok(info)
    }

    pub async fn distribute_task_send_verify_email(
        &self,
        payload: &PayloadSendVerifyEmail,
        options: TaskOptions,
    ) -> Result<TaskInfo, DistributeError> {
        self.distribute_task(TASK_SEND_VERIFY_EMAIL, payload, options)
            .await
    }
}

//! Task processor
//!
//! Long-running loop that pulls due tasks from the broker and dispatches
//! each one to the handler registered for its type. At most
//! `concurrency` handlers run at once. A separate tick promotes scheduled
//! tasks whose time has come.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use super::broker::TaskBroker;
use super::error::{BrokerError, TaskError};
use super::task::{retry_delay, Queue, Task, TaskState};

/// Business action behind one task type
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn process_task(&self, task: &Task) -> Result<(), TaskError>;
}

/// Configuration for the processor loop
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Handlers allowed to run in parallel (default: 4)
    pub concurrency: usize,
    /// Sleep when every queue is empty (default: 200ms)
    pub poll_interval: Duration,
    /// Interval for promoting scheduled tasks (default: 1 second)
    pub scheduler_interval: Duration,
    /// Queues in the order they are drained
    pub queues: Vec<Queue>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval: Duration::from_millis(200),
            scheduler_interval: Duration::from_secs(1),
            queues: Queue::PRIORITY_ORDER.to_vec(),
        }
    }
}

pub struct TaskProcessor {
    broker: Arc<dyn TaskBroker>,
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    config: ProcessorConfig,
}

impl TaskProcessor {
    pub fn new(broker: Arc<dyn TaskBroker>) -> Self {
        Self::with_config(broker, ProcessorConfig::default())
    }

    pub fn with_config(broker: Arc<dyn TaskBroker>, config: ProcessorConfig) -> Self {
        Self {
            broker,
            handlers: HashMap::new(),
            config,
        }
    }

    /// Register the handler for a task type
    pub fn handle(mut self, type_name: &str, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.insert(type_name.to_string(), handler);
        self
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Promote scheduled tasks that are due now
    pub async fn forward_scheduled(&self) -> Result<u64, BrokerError> {
        self.broker
            .forward_scheduled(&self.config.queues, Utc::now())
            .await
    }

    /// Dequeue and process a single task on the calling task.
    ///
    /// Returns the state the task was left in, or `None` when every queue
    /// was empty.
    pub async fn process_next(&self) -> Result<Option<TaskState>, BrokerError> {
        match self.broker.dequeue(&self.config.queues).await? {
            Some(task) => Ok(Some(self.dispatch(task).await?)),
            None => Ok(None),
        }
    }

    /// Start the processor loop in the background
    pub fn start(self) -> ProcessorHandle {
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let processor = Arc::new(self);
        let join = tokio::spawn(async move {
            processor.run(token).await;
        });
        ProcessorHandle { shutdown, join }
    }

    async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        tracing::info!(
            concurrency = self.config.concurrency,
            queues = ?self.config.queues,
            handlers = ?self.handlers.keys().collect::<Vec<_>>(),
            "Task processor started"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut in_flight = JoinSet::new();
        let mut scheduler = interval(self.config.scheduler_interval);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                _ = scheduler.tick() => {
                    match self.forward_scheduled().await {
                        Ok(0) => {}
                        Ok(count) => tracing::debug!(count, "Forwarded scheduled tasks"),
                        Err(e) => tracing::error!(error = %e, "Forwarding scheduled tasks failed"),
                    }
                }

                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    log_join_result(joined);
                }

                permit = semaphore.clone().acquire_owned() => {
                    let Ok(permit) = permit else { break };

                    match self.broker.dequeue(&self.config.queues).await {
                        Ok(Some(task)) => {
                            let processor = Arc::clone(&self);
                            in_flight.spawn(async move {
                                let _permit = permit;
                                processor.dispatch(task).await
                            });
                        }
                        Ok(None) => {
                            drop(permit);
                            tokio::select! {
                                _ = shutdown.cancelled() => break,
                                _ = tokio::time::sleep(self.config.poll_interval) => {}
                            }
                        }
                        Err(e) => {
                            drop(permit);
                            tracing::error!(error = %e, "Dequeue failed");
                            tokio::select! {
                                _ = shutdown.cancelled() => break,
                                _ = tokio::time::sleep(self.config.poll_interval) => {}
                            }
                        }
                    }
                }
            }
        }

        tracing::info!(in_flight = in_flight.len(), "Task processor draining");
        while let Some(joined) = in_flight.join_next().await {
            log_join_result(joined);
        }
        tracing::info!("Task processor stopped");
    }

    /// Run the handler and record the outcome with the broker
    async fn dispatch(&self, mut task: Task) -> Result<TaskState, BrokerError> {
        let payload = task.payload_lossy();

        let Some(handler) = self.handlers.get(&task.type_name) else {
            task.last_error = Some(format!("no handler for task type {}", task.type_name));
            tracing::error!(
                task_id = %task.id,
                task_type = %task.type_name,
                payload = %payload,
                "No handler registered, archiving task"
            );
            self.broker.archive(&task).await?;
            return Ok(TaskState::Failed);
        };

        match handler.process_task(&task).await {
            Ok(()) => {
                self.broker.complete(&task).await?;
                tracing::info!(
                    task_id = %task.id,
                    task_type = %task.type_name,
                    payload = %payload,
                    retried = task.retried,
                    "processed task"
                );
                Ok(TaskState::Succeeded)
            }
            Err(e) => {
                tracing::error!(
                    task_id = %task.id,
                    task_type = %task.type_name,
                    payload = %payload,
                    retried = task.retried,
                    max_retry = task.max_retry,
                    error = %e,
                    "process task failed"
                );
                task.last_error = Some(e.to_string());

                if !e.is_retriable() || task.retries_exhausted() {
                    self.broker.archive(&task).await?;
                    tracing::warn!(
                        task_id = %task.id,
                        task_type = %task.type_name,
                        "Task archived"
                    );
                    return Ok(TaskState::Failed);
                }

                let delay = retry_delay(task.retried);
                task.retried += 1;
                let process_at =
                    Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
                self.broker.retry(&task, process_at).await?;
                Ok(TaskState::RetryScheduled)
            }
        }
    }
}

fn log_join_result(joined: Result<Result<TaskState, BrokerError>, tokio::task::JoinError>) {
    match joined {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "Recording task outcome failed"),
        Err(e) => tracing::error!(error = %e, "Task handler panicked"),
    }
}

/// Handle to a running processor
pub struct ProcessorHandle {
    shutdown: CancellationToken,
    join: JoinHandle<()>,
}

impl ProcessorHandle {
    /// Token that stops the processor when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop taking new tasks and wait for in-flight handlers to finish
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.join.await {
            tracing::error!(error = %e, "Task processor exited abnormally");
        }
    }
}

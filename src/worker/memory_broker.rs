//! In-process task broker
//!
//! Same transitions as the Redis broker, kept in a mutex-guarded map. Used
//! by tests and by single-process development setups.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::broker::TaskBroker;
use super::error::BrokerError;
use super::task::{Queue, Task, TaskInfo, TaskState};

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Uuid>,
    scheduled: Vec<Uuid>,
    active: Vec<Uuid>,
}

#[derive(Default)]
struct State {
    tasks: HashMap<Uuid, Task>,
    states: HashMap<Uuid, TaskState>,
    queues: HashMap<Queue, QueueState>,
    completed: Vec<Task>,
    archived: Vec<Task>,
    /// Number of times each task was handed out
    deliveries: HashMap<Uuid, u32>,
}

impl State {
    fn queue(&mut self, queue: Queue) -> &mut QueueState {
        self.queues.entry(queue).or_default()
    }

    fn take_active(&mut self, task: &Task) -> Result<(), BrokerError> {
        let queue = self.queue(task.queue);
        match queue.active.iter().position(|id| *id == task.id) {
            Some(index) => {
                queue.active.remove(index);
                Ok(())
            }
            None => Err(BrokerError::Config(format!("task {} is not active", task.id))),
        }
    }
}

/// Broker that lives inside the process
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<State>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn state_of(&self, id: Uuid) -> Option<TaskState> {
        self.state.lock().await.states.get(&id).copied()
    }

    /// How many times a task was dequeued
    pub async fn deliveries(&self, id: Uuid) -> u32 {
        self.state
            .lock()
            .await
            .deliveries
            .get(&id)
            .copied()
            .unwrap_or(0)
    }

    pub async fn completed(&self) -> Vec<Task> {
        self.state.lock().await.completed.clone()
    }

    pub async fn archived(&self) -> Vec<Task> {
        self.state.lock().await.archived.clone()
    }

    /// Tasks waiting in a queue, due or not
    pub async fn queued_len(&self, queue: Queue) -> usize {
        let mut state = self.state.lock().await;
        let queue = state.queue(queue);
        queue.pending.len() + queue.scheduled.len()
    }

    /// Tasks waiting in a queue, pending first
    pub async fn queued_tasks(&self, queue: Queue) -> Vec<Task> {
        let mut state = self.state.lock().await;
        let ids: Vec<Uuid> = {
            let queue = state.queue(queue);
            queue.pending.iter().chain(queue.scheduled.iter()).copied().collect()
        };
        ids.iter().filter_map(|id| state.tasks.get(id).cloned()).collect()
    }

    pub async fn get_task(&self, id: Uuid) -> Option<Task> {
        self.state.lock().await.tasks.get(&id).cloned()
    }
}

#[async_trait]
impl TaskBroker for MemoryBroker {
    async fn enqueue(&self, task: Task) -> Result<TaskInfo, BrokerError> {
        let mut state = self.state.lock().await;
        if state.tasks.contains_key(&task.id) {
            return Err(BrokerError::Config(format!(
                "task id {} already exists",
                task.id
            )));
        }

        let info = TaskInfo::from(&task);
        let queue = state.queue(task.queue);
        if task.is_due(Utc::now()) {
            queue.pending.push_back(task.id);
        } else {
            queue.scheduled.push(task.id);
        }
        state.states.insert(task.id, TaskState::Enqueued);
        state.tasks.insert(task.id, task);
        Ok(info)
    }

    async fn dequeue(&self, queues: &[Queue]) -> Result<Option<Task>, BrokerError> {
        let mut state = self.state.lock().await;

        for queue in queues {
            let queue_state = state.queue(*queue);
            let Some(id) = queue_state.pending.pop_front() else {
                continue;
            };
            queue_state.active.push(id);

            let Some(task) = state.tasks.get(&id).cloned() else {
                state.queue(*queue).active.retain(|active| *active != id);
                continue;
            };
            state.states.insert(id, TaskState::Processing);
            *state.deliveries.entry(id).or_default() += 1;
            return Ok(Some(task));
        }

        Ok(None)
    }

    async fn forward_scheduled(
        &self,
        queues: &[Queue],
        now: DateTime<Utc>,
    ) -> Result<u64, BrokerError> {
        let mut state = self.state.lock().await;
        let mut forwarded = 0;

        for queue in queues {
            let scheduled = std::mem::take(&mut state.queue(*queue).scheduled);
            let (due, waiting): (Vec<Uuid>, Vec<Uuid>) = scheduled
                .into_iter()
                .partition(|id| state.tasks.get(id).map_or(true, |t| t.is_due(now)));

            forwarded += due.len() as u64;
            let queue_state = state.queue(*queue);
            queue_state.scheduled = waiting;
            queue_state.pending.extend(due);
        }

        Ok(forwarded)
    }

    async fn complete(&self, task: &Task) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        state.take_active(task)?;
        state.tasks.remove(&task.id);
        state.states.insert(task.id, TaskState::Succeeded);
        state.completed.push(task.clone());
        Ok(())
    }

    async fn retry(&self, task: &Task, process_at: DateTime<Utc>) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        state.take_active(task)?;

        let mut task = task.clone();
        task.process_at = process_at;
        state.queue(task.queue).scheduled.push(task.id);
        state.states.insert(task.id, TaskState::RetryScheduled);
        state.tasks.insert(task.id, task);
        Ok(())
    }

    async fn archive(&self, task: &Task) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        state.take_active(task)?;
        state.tasks.remove(&task.id);
        state.states.insert(task.id, TaskState::Failed);
        state.archived.push(task.clone());
        Ok(())
    }
}

//! Redis task broker
//!
//! Key layout, per namespace `ns` (default `simple_bank`) and queue `q`:
//!
//! - `{ns}:{q}:pending` -> LIST of due task ids
//! - `{ns}:{q}:active` -> LIST of ids handed to a processor
//! - `{ns}:{q}:scheduled` -> ZSET of ids scored by `process_at` (unix ms)
//! - `{ns}:{q}:archived` -> LIST of dead-lettered ids, newest first
//! - `{ns}:t:{id}` -> JSON encoded task
//!
//! Every state transition runs as one Lua script so a task id is never
//! visible in two places at once.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_redis::{Config, Connection, Pool, Runtime};
use uuid::Uuid;

use super::broker::TaskBroker;
use super::error::BrokerError;
use super::task::{Queue, Task, TaskInfo, TaskState};

/// Key namespace used unless `with_namespace` overrides it
pub const DEFAULT_NAMESPACE: &str = "simple_bank";

/// Archived tasks kept per queue before the oldest are dropped
pub const MAX_ARCHIVED_TASKS: i64 = 10_000;

/// Scheduled tasks promoted per queue and scheduler tick
const FORWARD_BATCH_SIZE: i64 = 100;

// =========================================================================
// Lua scripts
// =========================================================================

/// KEYS: task, pending, scheduled
/// ARGV: task json, task id, process_at ms, 1 when due now
const ENQUEUE_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return 0
end
redis.call('SET', KEYS[1], ARGV[1])
if ARGV[4] == '1' then
    redis.call('LPUSH', KEYS[2], ARGV[2])
else
    redis.call('ZADD', KEYS[3], tonumber(ARGV[3]), ARGV[2])
end
return 1
";

/// KEYS: pending, active
/// ARGV: task key prefix
///
/// Ids whose task record is gone are dropped and the next one is tried.
const DEQUEUE_SCRIPT: &str = r"
while true do
    local id = redis.call('RPOPLPUSH', KEYS[1], KEYS[2])
    if not id then
        return false
    end
    local data = redis.call('GET', ARGV[1] .. id)
    if data then
        return data
    end
    redis.call('LREM', KEYS[2], 1, id)
end
";

/// KEYS: scheduled, pending
/// ARGV: now ms, batch size
const FORWARD_SCRIPT: &str = r"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, tonumber(ARGV[2]))
for _, id in ipairs(ids) do
    redis.call('ZREM', KEYS[1], id)
    redis.call('LPUSH', KEYS[2], id)
end
return #ids
";

/// KEYS: active, task
/// ARGV: task id
const COMPLETE_SCRIPT: &str = r"
redis.call('LREM', KEYS[1], 0, ARGV[1])
redis.call('DEL', KEYS[2])
return 1
";

/// KEYS: active, scheduled, task
/// ARGV: task id, task json, process_at ms
const RETRY_SCRIPT: &str = r"
redis.call('LREM', KEYS[1], 0, ARGV[1])
redis.call('SET', KEYS[3], ARGV[2])
redis.call('ZADD', KEYS[2], tonumber(ARGV[3]), ARGV[1])
return 1
";

/// KEYS: active, archived, task
/// ARGV: task id, task json, max archived, task key prefix
const ARCHIVE_SCRIPT: &str = r"
redis.call('LREM', KEYS[1], 0, ARGV[1])
redis.call('SET', KEYS[3], ARGV[2])
redis.call('LPUSH', KEYS[2], ARGV[1])
local max = tonumber(ARGV[3])
local overflow = redis.call('LRANGE', KEYS[2], max, -1)
for _, id in ipairs(overflow) do
    redis.call('DEL', ARGV[4] .. id)
end
redis.call('LTRIM', KEYS[2], 0, max - 1)
return 1
";

// =========================================================================
// RedisBroker
// =========================================================================

/// Broker backed by a pooled Redis connection
#[derive(Clone)]
pub struct RedisBroker {
    pool: Pool,
    namespace: String,
    max_archived: i64,
}

impl RedisBroker {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            namespace: DEFAULT_NAMESPACE.to_string(),
            max_archived: MAX_ARCHIVED_TASKS,
        }
    }

    /// Prefix every key with `namespace` instead of `simple_bank`
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Cap on archived tasks kept per queue
    pub fn with_max_archived(mut self, max_archived: i64) -> Self {
        self.max_archived = max_archived.max(1);
        self
    }

    fn queue_key(&self, queue: Queue, set: &str) -> String {
        format!("{}:{}:{set}", self.namespace, queue.name())
    }

    fn task_key_prefix(&self) -> String {
        format!("{}:t:", self.namespace)
    }

    fn task_key(&self, id: &Uuid) -> String {
        format!("{}{id}", self.task_key_prefix())
    }

    /// Create a broker from a Redis URL.
    ///
    /// No connection is opened until the first command.
    pub fn from_url(redis_url: &str) -> Result<Self, BrokerError> {
        let pool = Config::from_url(redis_url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| BrokerError::Config(e.to_string()))?;
        Ok(Self::new(pool))
    }

    async fn connection(&self) -> Result<Connection, BrokerError> {
        Ok(self.pool.get().await?)
    }

    /// Round-trip a PING to the server
    pub async fn ping(&self) -> Result<(), BrokerError> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut *conn).await?;
        Ok(())
    }

    /// Ids of archived tasks in a queue, newest first
    pub async fn archived_ids(&self, queue: Queue) -> Result<Vec<String>, BrokerError> {
        let mut conn = self.connection().await?;
        let ids: Vec<String> = redis::cmd("LRANGE")
            .arg(self.queue_key(queue, "archived"))
            .arg(0)
            .arg(-1)
            .query_async(&mut *conn)
            .await?;
        Ok(ids)
    }

    /// Load a stored task by id
    pub async fn get_task(&self, id: &Uuid) -> Result<Option<Task>, BrokerError> {
        let mut conn = self.connection().await?;
        let data: Option<String> = redis::cmd("GET")
            .arg(self.task_key(id))
            .query_async(&mut *conn)
            .await?;
        Ok(data.map(|json| serde_json::from_str(&json)).transpose()?)
    }

    /// State of a task id as recorded in Redis
    pub async fn task_state(&self, task: &Task) -> Result<Option<TaskState>, BrokerError> {
        let mut conn = self.connection().await?;
        let id = task.id.to_string();

        let in_archive: Option<i64> = redis::cmd("LPOS")
            .arg(self.queue_key(task.queue, "archived"))
            .arg(&id)
            .query_async(&mut *conn)
            .await?;
        if in_archive.is_some() {
            return Ok(Some(TaskState::Failed));
        }

        let in_active: Option<i64> = redis::cmd("LPOS")
            .arg(self.queue_key(task.queue, "active"))
            .arg(&id)
            .query_async(&mut *conn)
            .await?;
        if in_active.is_some() {
            return Ok(Some(TaskState::Processing));
        }

        let in_pending: Option<i64> = redis::cmd("LPOS")
            .arg(self.queue_key(task.queue, "pending"))
            .arg(&id)
            .query_async(&mut *conn)
            .await?;
        if in_pending.is_some() {
            return Ok(Some(TaskState::Enqueued));
        }

        let score: Option<f64> = redis::cmd("ZSCORE")
            .arg(self.queue_key(task.queue, "scheduled"))
            .arg(&id)
            .query_async(&mut *conn)
            .await?;
        Ok(score.map(|_| {
            if task.retried > 0 {
                TaskState::RetryScheduled
            } else {
                TaskState::Enqueued
            }
        }))
    }
}

#[async_trait]
impl TaskBroker for RedisBroker {
    async fn enqueue(&self, task: Task) -> Result<TaskInfo, BrokerError> {
        let json = serde_json::to_string(&task)?;
        let due = task.is_due(Utc::now());
        let mut conn = self.connection().await?;

        let created: i64 = redis::Script::new(ENQUEUE_SCRIPT)
            .key(self.task_key(&task.id))
            .key(self.queue_key(task.queue, "pending"))
            .key(self.queue_key(task.queue, "scheduled"))
            .arg(json)
            .arg(task.id.to_string())
            .arg(task.process_at.timestamp_millis())
            .arg(if due { "1" } else { "0" })
            .invoke_async(&mut *conn)
            .await?;

        if created == 0 {
            return Err(BrokerError::Config(format!(
                "task id {} already exists",
                task.id
            )));
        }

        Ok(TaskInfo::from(&task))
    }

    async fn dequeue(&self, queues: &[Queue]) -> Result<Option<Task>, BrokerError> {
        let mut conn = self.connection().await?;
        let script = redis::Script::new(DEQUEUE_SCRIPT);

        for queue in queues {
            let data: Option<String> = script
                .key(self.queue_key(*queue, "pending"))
                .key(self.queue_key(*queue, "active"))
                .arg(self.task_key_prefix())
                .invoke_async(&mut *conn)
                .await?;

            if let Some(json) = data {
                return Ok(Some(serde_json::from_str(&json)?));
            }
        }

        Ok(None)
    }

    async fn forward_scheduled(
        &self,
        queues: &[Queue],
        now: DateTime<Utc>,
    ) -> Result<u64, BrokerError> {
        let mut conn = self.connection().await?;
        let script = redis::Script::new(FORWARD_SCRIPT);
        let mut forwarded = 0;

        for queue in queues {
            let moved: u64 = script
                .key(self.queue_key(*queue, "scheduled"))
                .key(self.queue_key(*queue, "pending"))
                .arg(now.timestamp_millis())
                .arg(FORWARD_BATCH_SIZE)
                .invoke_async(&mut *conn)
                .await?;
            forwarded += moved;
        }

        Ok(forwarded)
    }

    async fn complete(&self, task: &Task) -> Result<(), BrokerError> {
        let mut conn = self.connection().await?;
        let _: i64 = redis::Script::new(COMPLETE_SCRIPT)
            .key(self.queue_key(task.queue, "active"))
            .key(self.task_key(&task.id))
            .arg(task.id.to_string())
            .invoke_async(&mut *conn)
            .await?;
        Ok(())
    }

    async fn retry(&self, task: &Task, process_at: DateTime<Utc>) -> Result<(), BrokerError> {
        let json = serde_json::to_string(task)?;
        let mut conn = self.connection().await?;
        let _: i64 = redis::Script::new(RETRY_SCRIPT)
            .key(self.queue_key(task.queue, "active"))
            .key(self.queue_key(task.queue, "scheduled"))
            .key(self.task_key(&task.id))
            .arg(task.id.to_string())
            .arg(json)
            .arg(process_at.timestamp_millis())
            .invoke_async(&mut *conn)
            .await?;
        Ok(())
    }

    async fn archive(&self, task: &Task) -> Result<(), BrokerError> {
        let json = serde_json::to_string(task)?;
        let mut conn = self.connection().await?;
        let _: i64 = redis::Script::new(ARCHIVE_SCRIPT)
            .key(self.queue_key(task.queue, "active"))
            .key(self.queue_key(task.queue, "archived"))
            .key(self.task_key(&task.id))
            .arg(task.id.to_string())
            .arg(json)
            .arg(self.max_archived)
            .arg(self.task_key_prefix())
            .invoke_async(&mut *conn)
            .await?;
        Ok(())
    }
}

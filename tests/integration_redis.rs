//! Redis integration tests for the task broker
//!
//! Each test runs in its own key namespace and skips when `REDIS_URL` is
//! unset.

use std::time::Duration;

use chrono::Utc;

use simple_bank::worker::{Queue, Task, TaskBroker, TaskOptions, TaskState};

mod common;

fn task(queue: Queue) -> Task {
    Task::new("task:test", b"{}".to_vec(), &TaskOptions::new().queue(queue))
}

#[tokio::test]
async fn test_dequeue_drains_critical_before_default() {
    let Some(redis) = common::setup_test_broker().await else {
        return;
    };
    let broker = &redis.broker;

    let low = task(Queue::Default);
    let high = task(Queue::Critical);
    broker.enqueue(low.clone()).await.unwrap();
    broker.enqueue(high.clone()).await.unwrap();
    assert_eq!(broker.task_state(&low).await.unwrap(), Some(TaskState::Enqueued));

    let first = broker.dequeue(&Queue::PRIORITY_ORDER).await.unwrap().unwrap();
    let second = broker.dequeue(&Queue::PRIORITY_ORDER).await.unwrap().unwrap();
    assert_eq!(first.id, high.id);
    assert_eq!(second.id, low.id);
    assert_eq!(broker.task_state(&low).await.unwrap(), Some(TaskState::Processing));
    assert!(broker.dequeue(&Queue::PRIORITY_ORDER).await.unwrap().is_none());
}

#[tokio::test]
async fn test_duplicate_task_id_is_rejected() {
    let Some(redis) = common::setup_test_broker().await else {
        return;
    };
    let queued = task(Queue::Default);
    redis.broker.enqueue(queued.clone()).await.unwrap();
    assert!(redis.broker.enqueue(queued).await.is_err());
}

#[tokio::test]
async fn test_delayed_task_is_forwarded_when_due() {
    let Some(redis) = common::setup_test_broker().await else {
        return;
    };
    let broker = &redis.broker;

    let delayed = Task::new(
        "task:test",
        Vec::new(),
        &TaskOptions::new().process_in(Duration::from_secs(10)),
    );
    broker.enqueue(delayed.clone()).await.unwrap();
    assert_eq!(broker.task_state(&delayed).await.unwrap(), Some(TaskState::Enqueued));

    assert!(broker.dequeue(&Queue::PRIORITY_ORDER).await.unwrap().is_none());
    assert_eq!(
        broker.forward_scheduled(&Queue::PRIORITY_ORDER, Utc::now()).await.unwrap(),
        0
    );

    let later = Utc::now() + chrono::Duration::seconds(11);
    assert_eq!(
        broker.forward_scheduled(&Queue::PRIORITY_ORDER, later).await.unwrap(),
        1
    );
    let dequeued = broker.dequeue(&Queue::PRIORITY_ORDER).await.unwrap().unwrap();
    assert_eq!(dequeued.id, delayed.id);
}

#[tokio::test]
async fn test_retry_goes_through_scheduled_back_to_pending() {
    let Some(redis) = common::setup_test_broker().await else {
        return;
    };
    let broker = &redis.broker;
    broker.enqueue(task(Queue::Default)).await.unwrap();

    let mut active = broker.dequeue(&[Queue::Default]).await.unwrap().unwrap();
    active.retried += 1;
    active.last_error = Some("smtp unavailable".to_string());
    let process_at = Utc::now() + chrono::Duration::seconds(2);
    broker.retry(&active, process_at).await.unwrap();

    assert_eq!(
        broker.task_state(&active).await.unwrap(),
        Some(TaskState::RetryScheduled)
    );
    assert!(broker.dequeue(&[Queue::Default]).await.unwrap().is_none());

    let stored = broker.get_task(&active.id).await.unwrap().unwrap();
    assert_eq!(stored.retried, 1);
    assert_eq!(stored.last_error.as_deref(), Some("smtp unavailable"));

    let moved = broker
        .forward_scheduled(&[Queue::Default], process_at + chrono::Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(moved, 1);
    assert_eq!(broker.task_state(&active).await.unwrap(), Some(TaskState::Enqueued));

    let again = broker.dequeue(&[Queue::Default]).await.unwrap().unwrap();
    assert_eq!(again.id, active.id);
    assert_eq!(again.retried, 1);
}

#[tokio::test]
async fn test_complete_deletes_task_record() {
    let Some(redis) = common::setup_test_broker().await else {
        return;
    };
    let broker = &redis.broker;
    let queued = task(Queue::Critical);
    broker.enqueue(queued.clone()).await.unwrap();
    assert!(broker.get_task(&queued.id).await.unwrap().is_some());

    let active = broker.dequeue(&Queue::PRIORITY_ORDER).await.unwrap().unwrap();
    broker.complete(&active).await.unwrap();

    assert!(broker.get_task(&queued.id).await.unwrap().is_none());
    assert_eq!(broker.task_state(&queued).await.unwrap(), None);
    assert!(broker.dequeue(&Queue::PRIORITY_ORDER).await.unwrap().is_none());
}

#[tokio::test]
async fn test_archive_keeps_newest_tasks_only() {
    let Some(redis) = common::setup_test_broker().await else {
        return;
    };
    let redis = redis.with_max_archived(2);
    let broker = &redis.broker;

    let tasks: Vec<Task> = (0..3).map(|_| task(Queue::Default)).collect();
    for queued in &tasks {
        broker.enqueue(queued.clone()).await.unwrap();
    }
    for _ in &tasks {
        let active = broker.dequeue(&[Queue::Default]).await.unwrap().unwrap();
        broker.archive(&active).await.unwrap();
    }

    let archived = broker.archived_ids(Queue::Default).await.unwrap();
    assert_eq!(archived.len(), 2);

    // Pending is FIFO, so the first task was archived first and trimmed.
    let oldest = &tasks[0];
    assert!(!archived.contains(&oldest.id.to_string()));
    assert!(broker.get_task(&oldest.id).await.unwrap().is_none());

    let newest = &tasks[2];
    assert_eq!(archived[0], newest.id.to_string());
    assert_eq!(broker.task_state(newest).await.unwrap(), Some(TaskState::Failed));
    assert!(broker.get_task(&newest.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_dequeue_skips_ids_without_task_record() {
    let Some(redis) = common::setup_test_broker().await else {
        return;
    };
    let broker = &redis.broker;

    let lost = task(Queue::Default);
    let live = task(Queue::Default);
    broker.enqueue(lost.clone()).await.unwrap();
    broker.enqueue(live.clone()).await.unwrap();
    redis.delete_key(&redis.task_key(&lost.id)).await;

    let dequeued = broker.dequeue(&[Queue::Default]).await.unwrap().unwrap();
    assert_eq!(dequeued.id, live.id);
    assert_eq!(broker.task_state(&lost).await.unwrap(), None);
    assert!(broker.dequeue(&[Queue::Default]).await.unwrap().is_none());
}

//! Queue registry behaviour through the façade: create/read-back,
//! validation, completion and deletion.

mod common;

use common::harness;
use tasklane_core::domain::{NewTask, QueueConfig, QueueStatus, TaskTemplate};
use tasklane_core::error::AppError;
use tasklane_core::port::task_executor::mocks::MockTaskExecutor;

#[tokio::test]
async fn test_create_and_read_back_returns_identical_config() {
    let h = harness(MockTaskExecutor::new_success()).await;

    let mut config = QueueConfig::new("reports", 3)
        .with_retry(2, 1_500)
        .with_priority(7)
        .with_cron("0 6 * * *");
    config.description = Some("nightly reports".to_string());
    config.cron_template = Some(TaskTemplate {
        title: "build report".to_string(),
        description: None,
        priority: 1,
        metadata: serde_json::json!({"command": "make", "args": ["report"]}),
    });

    let created = h.manager.create_queue(config.clone(), false).await.unwrap();
    let fetched = h.manager.get_queue(&created.queue.id).await.unwrap();

    assert_eq!(fetched.queue.config, config);
    assert_eq!(fetched.status, QueueStatus::Paused);
    assert_eq!(fetched.counts.total(), 0);
}

#[tokio::test]
async fn test_invalid_config_is_rejected_without_side_effects() {
    let h = harness(MockTaskExecutor::new_success()).await;

    let zero = h.manager.create_queue(QueueConfig::new("a", 0), true).await;
    assert!(matches!(zero, Err(AppError::Config(_))));

    let bad_cron = h
        .manager
        .create_queue(QueueConfig::new("b", 1).with_cron("every morning"), true)
        .await;
    assert!(matches!(bad_cron, Err(AppError::Config(_))));

    let negative_delay = h
        .manager
        .create_queue(QueueConfig::new("c", 1).with_retry(1, -1), true)
        .await;
    assert!(matches!(negative_delay, Err(AppError::Config(_))));

    assert!(h.manager.list_queues().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_list_orders_by_priority() {
    let h = harness(MockTaskExecutor::new_success()).await;
    h.active_queue(QueueConfig::new("low", 1).with_priority(1)).await;
    h.active_queue(QueueConfig::new("high", 1).with_priority(9)).await;

    let names: Vec<String> = h
        .manager
        .list_queues()
        .await
        .unwrap()
        .into_iter()
        .map(|q| q.queue.config.name)
        .collect();
    assert_eq!(names, vec!["high", "low"]);
}

#[tokio::test]
async fn test_enqueue_validation() {
    let h = harness(MockTaskExecutor::new_success()).await;
    let queue_id = h.active_queue(QueueConfig::new("emails", 1)).await;

    let empty = h.manager.enqueue_task(&queue_id, NewTask::new("  ")).await;
    assert!(matches!(empty, Err(AppError::Validation(_))));

    let unknown = h
        .manager
        .enqueue_task(&"missing".to_string(), NewTask::new("x"))
        .await;
    assert!(matches!(unknown, Err(AppError::NotFound(_))));

    let task = h.enqueue(&queue_id, "welcome", 0).await;
    assert_eq!(task.metadata, serde_json::json!({}));
}

#[tokio::test]
async fn test_complete_requires_drained_queue() {
    let h = harness(MockTaskExecutor::new_success()).await;
    let queue_id = h.active_queue(QueueConfig::new("emails", 1)).await;
    let task = h.enqueue(&queue_id, "welcome", 0).await;

    let err = h.manager.complete_queue(&queue_id).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));

    h.manager.cancel_task(&queue_id, &task.id).await.unwrap();
    let completed = h.manager.complete_queue(&queue_id).await.unwrap();
    assert_eq!(completed.status, QueueStatus::Completed);

    // Completed queues take no new work and cannot be executed
    let enqueue = h.manager.enqueue_task(&queue_id, NewTask::new("late")).await;
    assert!(matches!(enqueue, Err(AppError::InvalidState(_))));
    let execute = h.manager.execute_queue_now(&queue_id).await;
    assert!(matches!(execute, Err(AppError::InvalidState(_))));

    // Activation reopens it
    let reopened = h.manager.activate_queue(&queue_id).await.unwrap();
    assert_eq!(reopened.status, QueueStatus::Active);
    h.enqueue(&queue_id, "late", 0).await;
}

#[tokio::test]
async fn test_execute_paused_queue_is_invalid_state() {
    let h = harness(MockTaskExecutor::new_success()).await;
    let created = h
        .manager
        .create_queue(QueueConfig::new("emails", 1), false)
        .await
        .unwrap();
    h.enqueue(&created.queue.id, "welcome", 0).await;

    let err = h.manager.execute_queue_now(&created.queue.id).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));
    assert_eq!(h.executor.call_count(), 0);
}

#[tokio::test]
async fn test_delete_removes_all_tasks() {
    let h = harness(MockTaskExecutor::new_success()).await;
    let queue_id = h.active_queue(QueueConfig::new("emails", 2)).await;

    let mut tasks = Vec::new();
    for i in 0..5 {
        tasks.push(h.enqueue(&queue_id, &format!("mail {}", i), 0).await);
    }

    let removed = h.manager.delete_queue(&queue_id).await.unwrap();
    assert_eq!(removed, 5);

    for task in &tasks {
        let err = h.manager.get_task(&queue_id, &task.id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
    assert!(matches!(
        h.manager.get_queue(&queue_id).await,
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        h.manager.delete_queue(&queue_id).await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_get_task_checks_owning_queue() {
    let h = harness(MockTaskExecutor::new_success()).await;
    let first = h.active_queue(QueueConfig::new("first", 1)).await;
    let second = h.active_queue(QueueConfig::new("second", 1)).await;
    let task = h.enqueue(&first, "welcome", 0).await;

    let err = h.manager.get_task(&second, &task.id).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

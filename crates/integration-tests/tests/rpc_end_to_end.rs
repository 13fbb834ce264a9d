//! Daemon-shaped wiring driven through the SDK: JSON-RPC server, running
//! scheduler and the event subscription.

use std::sync::Arc;
use std::time::Duration;

use tasklane_api_rpc::{RpcServer, RpcServerConfig};
use tasklane_core::application::{shutdown_channel, EngineConfig, QueueManager};
use tasklane_core::port::id_provider::UuidProvider;
use tasklane_core::port::task_executor::mocks::MockTaskExecutor;
use tasklane_core::port::time_provider::SystemTimeProvider;
use tasklane_infra_sqlite::{
    create_pool, run_migrations, SqliteQueueRepository, SqliteTaskRepository,
};
use tasklane_sdk::{
    CreateQueueRequest, EnqueueTaskRequest, QueueEvent, QueueStatus, TaskStatus, TasklaneClient,
};

#[tokio::test]
async fn test_sdk_round_trip_against_running_daemon() {
    let pool = create_pool("sqlite::memory:").await.unwrap();
    run_migrations(&pool).await.unwrap();

    let manager = Arc::new(QueueManager::new(
        Arc::new(SqliteQueueRepository::new(pool.clone())),
        Arc::new(SqliteTaskRepository::new(pool)),
        Arc::new(MockTaskExecutor::new_success()),
        Arc::new(UuidProvider),
        Arc::new(SystemTimeProvider),
        EngineConfig {
            tick_interval_ms: 20,
            ..Default::default()
        },
    ));

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let scheduler = manager.scheduler();
    let scheduler_handle = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

    let config = RpcServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
    };
    let (addr, server) = RpcServer::new(config, Arc::clone(&manager))
        .start()
        .await
        .unwrap();

    let client = TasklaneClient::connect(format!("http://{}", addr))
        .await
        .unwrap();

    let queue = client
        .create_queue(CreateQueueRequest::new("emails", 2).with_retry(1, 0))
        .await
        .unwrap();
    assert_eq!(queue.status, QueueStatus::Active);
    assert_eq!(queue.concurrency, 2);

    let mut events = client.subscribe_events(Some(&queue.id)).await.unwrap();

    let task = client
        .enqueue_task(
            &queue.id,
            EnqueueTaskRequest::new("welcome").with_priority(3),
        )
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Pending);

    let finished = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = events.next().await {
            if let QueueEvent::TaskStatusChanged {
                task_id, status, ..
            } = event.unwrap()
            {
                if task_id == task.id && status.is_terminal() {
                    return status;
                }
            }
        }
        panic!("event stream closed");
    })
    .await
    .unwrap();
    assert_eq!(finished, TaskStatus::Completed);

    let stored = client.get_task(&queue.id, &task.id).await.unwrap();
    assert_eq!(stored.status, TaskStatus::Completed);

    // Domain errors surface as typed RPC codes
    let err = client.cancel_task(&queue.id, &task.id).await.unwrap_err();
    assert!(err.is_invalid_state());
    let err = client.get_queue("missing").await.unwrap_err();
    assert!(err.is_not_found());

    let listed = client.list_queues().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].counts.completed, 1);

    let paused = client.deactivate_queue(&queue.id).await.unwrap();
    assert_eq!(paused.status, QueueStatus::Paused);

    let deleted = client.delete_queue(&queue.id).await.unwrap();
    assert!(deleted.deleted);
    assert_eq!(deleted.tasks_removed, 1);
    assert!(client.list_tasks(&queue.id).await.unwrap().is_empty());

    shutdown_tx.shutdown();
    server.stop().unwrap();
    scheduler_handle.await.unwrap();
}

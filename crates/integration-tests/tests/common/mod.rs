//! Shared wiring for the integration tests: in-memory SQLite, a manual
//! clock and a scripted executor.

#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use sqlx::SqlitePool;
use tasklane_core::application::{EngineConfig, QueueManager};
use tasklane_core::domain::{QueueConfig, QueueCounts, QueueId, QueuedTask, TaskId, TaskStatus};
use tasklane_core::error::{AppError, Result};
use tasklane_core::port::id_provider::mocks::SequentialIdProvider;
use tasklane_core::port::task_executor::mocks::MockTaskExecutor;
use tasklane_core::port::time_provider::mocks::ManualTimeProvider;
use tasklane_core::port::{TaskExecutor, TaskRepository};
use tasklane_infra_sqlite::{
    create_pool, run_migrations, SqliteQueueRepository, SqliteTaskRepository,
};

pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// 2026-01-05 09:00:00 UTC
pub fn start_millis() -> i64 {
    Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0)
        .unwrap()
        .timestamp_millis()
}

pub struct Harness {
    pub manager: Arc<QueueManager>,
    pub executor: Arc<MockTaskExecutor>,
    pub clock: Arc<ManualTimeProvider>,
    pub task_repo: Arc<SqliteTaskRepository>,
    pub pool: SqlitePool,
}

pub async fn setup_pool() -> SqlitePool {
    let pool = create_pool("sqlite::memory:").await.unwrap();
    run_migrations(&pool).await.unwrap();
    pool
}

pub async fn harness(executor: MockTaskExecutor) -> Harness {
    harness_with(executor, EngineConfig::default()).await
}

pub async fn harness_with(executor: MockTaskExecutor, config: EngineConfig) -> Harness {
    harness_around(executor, config, |repo| repo as Arc<dyn TaskRepository>).await
}

/// Like [`harness_with`], but the engine sees the task store through `wrap`
pub async fn harness_around<F>(executor: MockTaskExecutor, config: EngineConfig, wrap: F) -> Harness
where
    F: FnOnce(Arc<SqliteTaskRepository>) -> Arc<dyn TaskRepository>,
{
    let pool = setup_pool().await;
    let executor = Arc::new(executor);
    let clock = Arc::new(ManualTimeProvider::new(start_millis()));
    let task_repo = Arc::new(SqliteTaskRepository::new(pool.clone()));

    let manager = QueueManager::new(
        Arc::new(SqliteQueueRepository::new(pool.clone())),
        wrap(task_repo.clone()),
        executor.clone(),
        Arc::new(SequentialIdProvider::new("id")),
        clock.clone(),
        config,
    );

    Harness {
        manager: Arc::new(manager),
        executor,
        clock,
        task_repo,
        pool,
    }
}

/// Build a manager around an arbitrary executor (e.g. the subprocess one)
pub async fn manager_with_executor(executor: Arc<dyn TaskExecutor>) -> Arc<QueueManager> {
    let pool = setup_pool().await;
    Arc::new(QueueManager::new(
        Arc::new(SqliteQueueRepository::new(pool.clone())),
        Arc::new(SqliteTaskRepository::new(pool)),
        executor,
        Arc::new(SequentialIdProvider::new("id")),
        Arc::new(ManualTimeProvider::new(start_millis())),
        EngineConfig::default(),
    ))
}

impl Harness {
    pub async fn active_queue(&self, config: QueueConfig) -> QueueId {
        self.manager.create_queue(config, true).await.unwrap().queue.id
    }

    pub async fn enqueue(&self, queue_id: &QueueId, title: &str, priority: i32) -> QueuedTask {
        self.manager
            .enqueue_task(
                queue_id,
                tasklane_core::domain::NewTask::new(title).with_priority(priority),
            )
            .await
            .unwrap()
    }

    pub async fn task(&self, queue_id: &QueueId, task: &QueuedTask) -> QueuedTask {
        self.manager.get_task(queue_id, &task.id).await.unwrap()
    }

    pub async fn counts(&self, queue_id: &QueueId) -> QueueCounts {
        self.task_repo.counts(queue_id).await.unwrap()
    }

    /// One scheduler cycle, returning the number of tasks dispatched
    pub async fn cycle(&self) -> usize {
        self.manager.scheduler().run_cycle().await.unwrap().dispatched
    }

    pub async fn wait_idle(&self) {
        tokio::time::timeout(WAIT_TIMEOUT, self.manager.dispatcher().wait_idle())
            .await
            .expect("dispatcher did not go idle");
    }
}

/// Task store whose next `update` calls fail with a database error
pub struct FlakyTaskRepository {
    inner: Arc<SqliteTaskRepository>,
    failures_left: AtomicUsize,
    failed: AtomicUsize,
}

impl FlakyTaskRepository {
    pub fn new(inner: Arc<SqliteTaskRepository>, failures: usize) -> Self {
        Self {
            inner,
            failures_left: AtomicUsize::new(failures),
            failed: AtomicUsize::new(0),
        }
    }

    pub fn failed_updates(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskRepository for FlakyTaskRepository {
    async fn insert(&self, task: &QueuedTask) -> Result<()> {
        self.inner.insert(task).await
    }

    async fn insert_if_open(&self, task: &QueuedTask) -> Result<bool> {
        self.inner.insert_if_open(task).await
    }

    async fn find_by_id(&self, id: &TaskId) -> Result<Option<QueuedTask>> {
        self.inner.find_by_id(id).await
    }

    async fn list_by_queue(&self, queue_id: &QueueId) -> Result<Vec<QueuedTask>> {
        self.inner.list_by_queue(queue_id).await
    }

    async fn update(&self, task: &QueuedTask) -> Result<QueuedTask> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            self.failed.fetch_add(1, Ordering::SeqCst);
            return Err(AppError::Database("database is locked".to_string()));
        }
        self.inner.update(task).await
    }

    async fn reserve_due(
        &self,
        queue_id: &QueueId,
        now_millis: i64,
        max: u32,
    ) -> Result<Vec<QueuedTask>> {
        self.inner.reserve_due(queue_id, now_millis, max).await
    }

    async fn counts(&self, queue_id: &QueueId) -> Result<QueueCounts> {
        self.inner.counts(queue_id).await
    }

    async fn count_processing_total(&self) -> Result<i64> {
        self.inner.count_processing_total().await
    }

    async fn find_by_status(&self, status: TaskStatus) -> Result<Vec<QueuedTask>> {
        self.inner.find_by_status(status).await
    }
}

/// Poll `condition` until it holds or the timeout elapses
pub async fn wait_until<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

// SQLite TaskRepository Implementation

use crate::error::{map_sqlx_error, to_u32};
use async_trait::async_trait;
use sqlx::query::Query;
use sqlx::sqlite::SqliteArguments;
use sqlx::{Sqlite, SqlitePool};
use std::cmp::Reverse;
use tasklane_core::domain::{QueueCounts, QueueId, QueuedTask, TaskId, TaskStatus};
use tasklane_core::error::{AppError, Result};
use tasklane_core::port::TaskRepository;

/// Dispatch order shared by listing and reservation
const DISPATCH_ORDER: &str =
    "priority DESC, COALESCE(scheduled_for, created_at) ASC, created_at ASC, id ASC";

pub(crate) const INSERT_TASK: &str = r#"
    INSERT INTO tasks (
        id, queue_id, title, description, priority, status,
        retry_count, scheduled_for, started_at, completed_at,
        error, output, metadata, cancel_requested, version,
        created_at, updated_at
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

/// Same row as [`INSERT_TASK`], written only while the queue is open.
/// The trailing placeholder is the queue id again.
const INSERT_TASK_IF_OPEN: &str = r#"
    INSERT INTO tasks (
        id, queue_id, title, description, priority, status,
        retry_count, scheduled_for, started_at, completed_at,
        error, output, metadata, cancel_requested, version,
        created_at, updated_at
    )
    SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?
    WHERE EXISTS (SELECT 1 FROM queues WHERE id = ? AND completed = 0)
"#;

pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn json_text(value: &Option<serde_json::Value>) -> Option<String> {
    value.as_ref().map(|v| v.to_string())
}

/// Bind every column of a task row in `INSERT_TASK` order
pub(crate) fn bind_task<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    task: &'q QueuedTask,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    query
        .bind(&task.id)
        .bind(&task.queue_id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.priority)
        .bind(task.status.as_str())
        .bind(i64::from(task.retry_count))
        .bind(task.scheduled_for)
        .bind(task.started_at)
        .bind(task.completed_at)
        .bind(&task.error)
        .bind(json_text(&task.output))
        .bind(task.metadata.to_string())
        .bind(if task.cancel_requested { 1 } else { 0 })
        .bind(task.version)
        .bind(task.created_at)
        .bind(task.updated_at)
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    async fn insert(&self, task: &QueuedTask) -> Result<()> {
        bind_task(sqlx::query(INSERT_TASK), task)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn insert_if_open(&self, task: &QueuedTask) -> Result<bool> {
        let result = bind_task(sqlx::query(INSERT_TASK_IF_OPEN), task)
            .bind(&task.queue_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_by_id(&self, id: &TaskId) -> Result<Option<QueuedTask>> {
        let row = sqlx::query_as::<_, TaskRow>("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(TaskRow::into_task).transpose()
    }

    async fn list_by_queue(&self, queue_id: &QueueId) -> Result<Vec<QueuedTask>> {
        let sql = format!("SELECT * FROM tasks WHERE queue_id = ? ORDER BY {}", DISPATCH_ORDER);
        let rows: Vec<TaskRow> = sqlx::query_as(&sql)
            .bind(queue_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        rows.into_iter().map(TaskRow::into_task).collect()
    }

    async fn update(&self, task: &QueuedTask) -> Result<QueuedTask> {
        let row = sqlx::query_as::<_, TaskRow>(
            r#"
            UPDATE tasks
            SET title = ?, description = ?, priority = ?, status = ?,
                retry_count = ?, scheduled_for = ?, started_at = ?, completed_at = ?,
                error = ?, output = ?, metadata = ?, cancel_requested = ?,
                updated_at = ?, version = version + 1
            WHERE id = ? AND version = ?
            RETURNING *
            "#,
        )
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.priority)
        .bind(task.status.as_str())
        .bind(i64::from(task.retry_count))
        .bind(task.scheduled_for)
        .bind(task.started_at)
        .bind(task.completed_at)
        .bind(&task.error)
        .bind(json_text(&task.output))
        .bind(task.metadata.to_string())
        .bind(if task.cancel_requested { 1 } else { 0 })
        .bind(task.updated_at)
        .bind(&task.id)
        .bind(task.version)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if let Some(row) = row {
            return row.into_task();
        }

        // Nothing matched: either the task is gone or someone else wrote first
        let stored: Option<i64> = sqlx::query_scalar("SELECT version FROM tasks WHERE id = ?")
            .bind(&task.id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        match stored {
            None => Err(AppError::NotFound(format!("task {}", task.id))),
            Some(version) => Err(AppError::Conflict(format!(
                "task {} is at version {}, update was based on {}",
                task.id, version, task.version
            ))),
        }
    }

    async fn reserve_due(
        &self,
        queue_id: &QueueId,
        now_millis: i64,
        max: u32,
    ) -> Result<Vec<QueuedTask>> {
        // Free slots are computed inside the statement, so two overlapping
        // reservations can never push the queue past its concurrency.
        // A negative LIMIT means "unbounded" in SQLite, hence MAX(0, ...).
        let sql = format!(
            r#"
            UPDATE tasks
            SET status = 'processing', started_at = ?1, updated_at = ?1, version = version + 1
            WHERE id IN (
                SELECT id FROM tasks
                WHERE queue_id = ?2
                  AND status = 'pending'
                  AND (scheduled_for IS NULL OR scheduled_for <= ?1)
                ORDER BY {order}
                LIMIT MAX(0, MIN(
                    ?3,
                    COALESCE(
                        (SELECT concurrency FROM queues
                         WHERE id = ?2 AND is_active = 1 AND completed = 0),
                        0
                    ) - (SELECT COUNT(*) FROM tasks WHERE queue_id = ?2 AND status = 'processing')
                ))
            )
            RETURNING *
            "#,
            order = DISPATCH_ORDER
        );

        let rows: Vec<TaskRow> = sqlx::query_as(&sql)
            .bind(now_millis)
            .bind(queue_id)
            .bind(i64::from(max))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        let mut tasks = rows
            .into_iter()
            .map(TaskRow::into_task)
            .collect::<Result<Vec<_>>>()?;

        // RETURNING order is unspecified
        tasks.sort_by_key(|t| {
            (
                Reverse(t.priority),
                t.scheduled_for.unwrap_or(t.created_at),
                t.created_at,
                t.id.clone(),
            )
        });
        Ok(tasks)
    }

    async fn counts(&self, queue_id: &QueueId) -> Result<QueueCounts> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM tasks WHERE queue_id = ? GROUP BY status",
        )
        .bind(queue_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let mut counts = QueueCounts::default();
        for (status, count) in rows {
            match parse_status(&status)? {
                TaskStatus::Pending => counts.pending = count,
                TaskStatus::Processing => counts.processing = count,
                TaskStatus::Completed => counts.completed = count,
                TaskStatus::Failed => counts.failed = count,
                TaskStatus::Cancelled => counts.cancelled = count,
            }
        }
        Ok(counts)
    }

    async fn count_processing_total(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE status = 'processing'")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    async fn find_by_status(&self, status: TaskStatus) -> Result<Vec<QueuedTask>> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            r#"
            SELECT * FROM tasks
            WHERE status = ?
            ORDER BY created_at ASC
            "#,
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(TaskRow::into_task).collect()
    }
}

fn parse_status(value: &str) -> Result<TaskStatus> {
    value
        .parse()
        .map_err(|_| AppError::Database(format!("Unknown task status in database: {}", value)))
}

/// SQLite row representation
#[derive(Debug, sqlx::FromRow)]
struct TaskRow {
    id: String,
    queue_id: String,
    title: String,
    description: Option<String>,
    priority: i32,
    status: String,
    retry_count: i64,
    scheduled_for: Option<i64>,
    started_at: Option<i64>,
    completed_at: Option<i64>,
    error: Option<String>,
    output: Option<String>,
    metadata: String,
    cancel_requested: i32, // SQLite boolean as integer
    version: i64,
    created_at: i64,
    updated_at: i64,
}

impl TaskRow {
    fn into_task(self) -> Result<QueuedTask> {
        let output = self
            .output
            .as_deref()
            .map(serde_json::from_str::<serde_json::Value>)
            .transpose()?;

        Ok(QueuedTask {
            id: self.id,
            queue_id: self.queue_id,
            title: self.title,
            description: self.description,
            priority: self.priority,
            status: parse_status(&self.status)?,
            retry_count: to_u32(self.retry_count, "retry_count")?,
            scheduled_for: self.scheduled_for,
            started_at: self.started_at,
            completed_at: self.completed_at,
            error: self.error,
            output,
            metadata: serde_json::from_str(&self.metadata)?,
            cancel_requested: self.cancel_requested != 0,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations, SqliteQueueRepository};
    use tasklane_core::domain::{Queue, QueueConfig};
    use tasklane_core::port::QueueRepository;

    async fn setup(concurrency: u32) -> (SqliteQueueRepository, SqliteTaskRepository, Queue) {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        let queues = SqliteQueueRepository::new(pool.clone());
        let tasks = SqliteTaskRepository::new(pool);

        let queue = Queue::new("q-1", 1_000, QueueConfig::new("work", concurrency), true);
        queues.insert(&queue).await.unwrap();
        (queues, tasks, queue)
    }

    fn task(id: &str, priority: i32, created_at: i64) -> QueuedTask {
        let mut task = QueuedTask::new(id, created_at, "q-1", id, serde_json::json!({}));
        task.priority = priority;
        task
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let (_queues, repo, _) = setup(1).await;
        let mut t = task("t-1", 0, 2_000);
        t.metadata = serde_json::json!({"command": "echo", "args": ["hi"]});
        repo.insert(&t).await.unwrap();

        let found = repo.find_by_id(&t.id).await.unwrap();
        assert_eq!(found, Some(t));
    }

    #[tokio::test]
    async fn test_insert_if_open_rejects_completed_queue() {
        let (queues, repo, queue) = setup(1).await;
        assert!(repo.insert_if_open(&task("a", 0, 2_000)).await.unwrap());

        queues.set_flags(&queue.id, true, true, 3_000).await.unwrap();
        assert!(!repo.insert_if_open(&task("b", 0, 4_000)).await.unwrap());
        assert_eq!(repo.find_by_id(&"b".to_string()).await.unwrap(), None);

        let mut orphan = task("c", 0, 5_000);
        orphan.queue_id = "missing".to_string();
        assert!(!repo.insert_if_open(&orphan).await.unwrap());
    }

    #[tokio::test]
    async fn test_insert_into_unknown_queue_violates_foreign_key() {
        let (_queues, repo, _) = setup(1).await;
        let mut orphan = task("t-1", 0, 2_000);
        orphan.queue_id = "missing".to_string();
        assert!(matches!(repo.insert(&orphan).await, Err(AppError::Database(_))));
    }

    #[tokio::test]
    async fn test_reserve_due_respects_concurrency_and_priority() {
        let (_queues, repo, queue) = setup(2).await;
        repo.insert(&task("low", 0, 2_000)).await.unwrap();
        repo.insert(&task("high", 5, 3_000)).await.unwrap();
        repo.insert(&task("mid", 3, 4_000)).await.unwrap();

        let reserved = repo.reserve_due(&queue.id, 10_000, 10).await.unwrap();
        let ids: Vec<&str> = reserved.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["high", "mid"]);
        assert!(reserved.iter().all(|t| t.status == TaskStatus::Processing));
        assert!(reserved.iter().all(|t| t.started_at == Some(10_000)));

        // No free slots left
        assert!(repo.reserve_due(&queue.id, 10_000, 10).await.unwrap().is_empty());
        assert_eq!(repo.counts(&queue.id).await.unwrap().processing, 2);
    }

    #[tokio::test]
    async fn test_reserve_due_skips_future_and_inactive() {
        let (queues, repo, queue) = setup(3).await;
        let mut later = task("later", 0, 2_000);
        later.scheduled_for = Some(50_000);
        repo.insert(&later).await.unwrap();

        assert!(repo.reserve_due(&queue.id, 10_000, 3).await.unwrap().is_empty());

        queues.set_flags(&queue.id, false, false, 11_000).await.unwrap();
        assert!(repo.reserve_due(&queue.id, 60_000, 3).await.unwrap().is_empty());

        queues.set_flags(&queue.id, true, false, 12_000).await.unwrap();
        assert_eq!(repo.reserve_due(&queue.id, 60_000, 3).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_is_compare_and_swap() {
        let (_queues, repo, _) = setup(1).await;
        let t = task("t-1", 0, 2_000);
        repo.insert(&t).await.unwrap();

        let mut first = t.clone();
        first.description = Some("first".to_string());
        let stored = repo.update(&first).await.unwrap();
        assert_eq!(stored.version, 1);

        // Stale copy loses
        let mut stale = t.clone();
        stale.description = Some("stale".to_string());
        assert!(matches!(repo.update(&stale).await, Err(AppError::Conflict(_))));

        let mut gone = t.clone();
        gone.id = "missing".to_string();
        assert!(matches!(repo.update(&gone).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_queue_cascades() {
        let (queues, repo, queue) = setup(1).await;
        for i in 0..5 {
            repo.insert(&task(&format!("t-{}", i), 0, 2_000 + i))
                .await
                .unwrap();
        }

        assert_eq!(queues.delete(&queue.id).await.unwrap(), 5);
        assert!(repo.list_by_queue(&queue.id).await.unwrap().is_empty());
        assert!(repo.find_by_id(&"t-0".to_string()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_counts_group_by_status() {
        let (_queues, repo, queue) = setup(1).await;
        repo.insert(&task("a", 0, 2_000)).await.unwrap();
        repo.insert(&task("b", 0, 2_001)).await.unwrap();
        repo.reserve_due(&queue.id, 3_000, 1).await.unwrap();

        let counts = repo.counts(&queue.id).await.unwrap();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.processing, 1);
        assert_eq!(counts.total(), 2);
        assert_eq!(repo.count_processing_total().await.unwrap(), 1);
        assert_eq!(
            repo.counts(&"unknown".to_string()).await.unwrap(),
            QueueCounts::default()
        );
    }
}

// SQLite QueueRepository Implementation

use crate::error::{map_sqlx_error, to_u32};
use crate::task_repository::{bind_task, INSERT_TASK};
use async_trait::async_trait;
use sqlx::SqlitePool;
use tasklane_core::domain::{Queue, QueueConfig, QueueId, QueuedTask, TaskTemplate};
use tasklane_core::error::{AppError, Result};
use tasklane_core::port::QueueRepository;
use tracing::debug;

pub struct SqliteQueueRepository {
    pool: SqlitePool,
}

impl SqliteQueueRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueueRepository for SqliteQueueRepository {
    async fn insert(&self, queue: &Queue) -> Result<()> {
        let template = queue
            .config
            .cron_template
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO queues (
                id, name, description, concurrency, retry_limit, retry_delay_ms,
                priority, cron_expression, cron_template,
                is_active, completed, last_fired_at, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&queue.id)
        .bind(&queue.config.name)
        .bind(&queue.config.description)
        .bind(i64::from(queue.config.concurrency))
        .bind(i64::from(queue.config.retry_limit))
        .bind(queue.config.retry_delay_ms)
        .bind(queue.config.priority)
        .bind(&queue.config.cron_expression)
        .bind(&template)
        .bind(if queue.is_active { 1 } else { 0 })
        .bind(if queue.completed { 1 } else { 0 })
        .bind(queue.last_fired_at)
        .bind(queue.created_at)
        .bind(queue.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn find_by_id(&self, id: &QueueId) -> Result<Option<Queue>> {
        let row = sqlx::query_as::<_, QueueRow>("SELECT * FROM queues WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(QueueRow::into_queue).transpose()
    }

    async fn list(&self) -> Result<Vec<Queue>> {
        let rows: Vec<QueueRow> =
            sqlx::query_as("SELECT * FROM queues ORDER BY priority DESC, created_at ASC, id ASC")
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        rows.into_iter().map(QueueRow::into_queue).collect()
    }

    async fn set_flags(
        &self,
        id: &QueueId,
        is_active: bool,
        completed: bool,
        now_millis: i64,
    ) -> Result<Queue> {
        let row = sqlx::query_as::<_, QueueRow>(
            r#"
            UPDATE queues
            SET is_active = ?, completed = ?, updated_at = ?
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(if is_active { 1 } else { 0 })
        .bind(if completed { 1 } else { 0 })
        .bind(now_millis)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        match row {
            Some(row) => row.into_queue(),
            None => Err(AppError::NotFound(format!("queue {}", id))),
        }
    }

    async fn mark_completed(&self, id: &QueueId, now_millis: i64) -> Result<Queue> {
        let row = sqlx::query_as::<_, QueueRow>(
            r#"
            UPDATE queues
            SET completed = 1, updated_at = ?
            WHERE id = ?
              AND NOT EXISTS (
                  SELECT 1 FROM tasks
                  WHERE queue_id = queues.id AND status IN ('pending', 'processing')
              )
            RETURNING *
            "#,
        )
        .bind(now_millis)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if let Some(row) = row {
            return row.into_queue();
        }

        match self.find_by_id(id).await? {
            None => Err(AppError::NotFound(format!("queue {}", id))),
            Some(_) => Err(AppError::InvalidState(format!(
                "queue {} still has pending or processing tasks",
                id
            ))),
        }
    }

    async fn record_fire(
        &self,
        id: &QueueId,
        expected: Option<i64>,
        now_millis: i64,
        task: &QueuedTask,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        // `IS` compares NULL-safely, so the first fire claims from NULL
        let claimed = sqlx::query(
            r#"
            UPDATE queues
            SET last_fired_at = ?, updated_at = ?
            WHERE id = ? AND last_fired_at IS ?
            "#,
        )
        .bind(now_millis)
        .bind(now_millis)
        .bind(id)
        .bind(expected)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?
        .rows_affected();

        if claimed != 1 {
            tx.rollback().await.map_err(map_sqlx_error)?;
            return Ok(false);
        }

        bind_task(sqlx::query(INSERT_TASK), task)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        debug!(queue_id = %id, task_id = %task.id, fired_at = %now_millis, "Cron fire recorded");
        Ok(true)
    }

    async fn delete(&self, id: &QueueId) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let tasks = sqlx::query("DELETE FROM tasks WHERE queue_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?
            .rows_affected();

        let queues = sqlx::query("DELETE FROM queues WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?
            .rows_affected();

        if queues == 0 {
            tx.rollback().await.map_err(map_sqlx_error)?;
            return Err(AppError::NotFound(format!("queue {}", id)));
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        debug!(queue_id = %id, tasks_removed = %tasks, "Queue rows deleted");
        Ok(tasks)
    }
}

/// SQLite row representation
#[derive(Debug, sqlx::FromRow)]
struct QueueRow {
    id: String,
    name: String,
    description: Option<String>,
    concurrency: i64,
    retry_limit: i64,
    retry_delay_ms: i64,
    priority: i32,
    cron_expression: Option<String>,
    cron_template: Option<String>,
    is_active: i32, // SQLite boolean as integer
    completed: i32, // SQLite boolean as integer
    last_fired_at: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

impl QueueRow {
    fn into_queue(self) -> Result<Queue> {
        let cron_template = self
            .cron_template
            .as_deref()
            .map(serde_json::from_str::<TaskTemplate>)
            .transpose()?;

        Ok(Queue {
            id: self.id,
            config: QueueConfig {
                name: self.name,
                description: self.description,
                concurrency: to_u32(self.concurrency, "concurrency")?,
                retry_limit: to_u32(self.retry_limit, "retry_limit")?,
                retry_delay_ms: self.retry_delay_ms,
                priority: self.priority,
                cron_expression: self.cron_expression,
                cron_template,
            },
            is_active: self.is_active != 0,
            completed: self.completed != 0,
            last_fired_at: self.last_fired_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

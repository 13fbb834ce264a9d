// Task Repository Port (Interface)

use crate::domain::{QueueCounts, QueueId, QueuedTask, TaskId, TaskStatus};
use crate::error::Result;
use async_trait::async_trait;

/// Repository interface for QueuedTask persistence
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Insert a new task
    async fn insert(&self, task: &QueuedTask) -> Result<()>;

    /// Insert a new task only while its queue exists and is not completed
    ///
    /// Returns false when the guard rejected the insert.
    async fn insert_if_open(&self, task: &QueuedTask) -> Result<bool>;

    /// Find task by ID
    async fn find_by_id(&self, id: &TaskId) -> Result<Option<QueuedTask>>;

    /// All tasks of a queue in dispatch order
    async fn list_by_queue(&self, queue_id: &QueueId) -> Result<Vec<QueuedTask>>;

    /// Optimistic update: succeeds only if the stored version equals
    /// `task.version`. Returns the stored task with its bumped version.
    ///
    /// # Errors
    /// - AppError::NotFound if the task was deleted
    /// - AppError::Conflict if another writer got there first
    async fn update(&self, task: &QueuedTask) -> Result<QueuedTask>;

    /// Atomically move up to `max` due pending tasks of an active queue to
    /// `processing`, never exceeding the queue's concurrency limit.
    ///
    /// Returned tasks are in dispatch order (priority desc, due time asc).
    async fn reserve_due(
        &self,
        queue_id: &QueueId,
        now_millis: i64,
        max: u32,
    ) -> Result<Vec<QueuedTask>>;

    /// Per-status counts for a queue
    async fn counts(&self, queue_id: &QueueId) -> Result<QueueCounts>;

    /// Number of tasks in `processing` across all queues
    async fn count_processing_total(&self) -> Result<i64>;

    /// Find all tasks in a state (used by startup recovery)
    async fn find_by_status(&self, status: TaskStatus) -> Result<Vec<QueuedTask>>;
}

// Queue Repository Port (Interface)

use crate::domain::{Queue, QueueId, QueuedTask};
use crate::error::Result;
use async_trait::async_trait;

/// Repository interface for Queue persistence
#[async_trait]
pub trait QueueRepository: Send + Sync {
    /// Insert a new queue
    async fn insert(&self, queue: &Queue) -> Result<()>;

    /// Find queue by ID
    async fn find_by_id(&self, id: &QueueId) -> Result<Option<Queue>>;

    /// All queues, highest priority first, then oldest first
    async fn list(&self) -> Result<Vec<Queue>>;

    /// Overwrite the lifecycle flags, returning the updated queue
    ///
    /// # Errors
    /// - AppError::NotFound if the queue does not exist
    async fn set_flags(
        &self,
        id: &QueueId,
        is_active: bool,
        completed: bool,
        now_millis: i64,
    ) -> Result<Queue>;

    /// Mark the queue completed, but only while it has no pending or
    /// processing task
    ///
    /// # Errors
    /// - AppError::NotFound if the queue does not exist
    /// - AppError::InvalidState if open work remains
    async fn mark_completed(&self, id: &QueueId, now_millis: i64) -> Result<Queue>;

    /// Record a cron fire and store the task it created, atomically
    ///
    /// The fire is claimed only if `last_fired_at` still equals `expected`.
    /// Returns false when another evaluator already claimed it; nothing is
    /// written then.
    async fn record_fire(
        &self,
        id: &QueueId,
        expected: Option<i64>,
        now_millis: i64,
        task: &QueuedTask,
    ) -> Result<bool>;

    /// Delete a queue together with all of its tasks
    ///
    /// Returns the number of tasks removed.
    ///
    /// # Errors
    /// - AppError::NotFound if the queue does not exist
    async fn delete(&self, id: &QueueId) -> Result<u64>;
}

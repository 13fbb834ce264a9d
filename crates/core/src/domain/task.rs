// Queued Task Domain Model

use crate::domain::error::{DomainError, Result};
use crate::domain::queue::QueueId;
use serde::{Deserialize, Serialize};

/// Task ID (UUID v4)
pub type TaskId = String;

/// Priority (higher number = dispatched first)
pub type Priority = i32;

/// Task State Machine
///
/// `pending -> processing -> {completed | failed}`, plus `cancelled` from
/// pending/processing and manual retry `failed -> pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Pending,
        TaskStatus::Processing,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::InvalidStateTransition {
                from: s.to_string(),
                to: "?".to_string(),
            })
    }
}

/// Result of a cancel request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Pending task moved straight to `cancelled`
    Cancelled,
    /// Processing task flagged; finalized once the running attempt returns
    Requested,
}

/// Client request to enqueue a task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Do not dispatch before this time (epoch ms)
    #[serde(default)]
    pub scheduled_for: Option<i64>,
}

impl NewTask {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_scheduled_for(mut self, at: i64) -> Self {
        self.scheduled_for = Some(at);
        self
    }
}

/// Queued Task Entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedTask {
    pub id: TaskId,
    pub queue_id: QueueId,
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub status: TaskStatus,

    // Retry bookkeeping
    pub retry_count: u32,
    pub scheduled_for: Option<i64>, // earliest eligible dispatch (epoch ms)

    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,

    /// Last failure detail, overwritten on each failed attempt
    pub error: Option<String>,
    pub output: Option<serde_json::Value>,
    /// Opaque payload handed to the executor
    pub metadata: serde_json::Value,

    pub cancel_requested: bool,
    /// Optimistic concurrency counter, bumped by the store on every write
    pub version: i64,

    pub created_at: i64,
    pub updated_at: i64,
}

impl QueuedTask {
    /// Create a new pending task
    ///
    /// # Arguments
    ///
    /// * `id` - Unique task ID (injected, not generated)
    /// * `created_at` - Creation timestamp in epoch ms (injected, not system time)
    /// * `queue_id` - Owning queue
    /// * `title` - Human readable title
    /// * `metadata` - Payload passed to the executor
    pub fn new(
        id: impl Into<String>,
        created_at: i64,
        queue_id: impl Into<String>,
        title: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            queue_id: queue_id.into(),
            title: title.into(),
            description: None,
            priority: 0,
            status: TaskStatus::Pending,
            retry_count: 0,
            scheduled_for: None,
            started_at: None,
            completed_at: None,
            error: None,
            output: None,
            metadata,
            cancel_requested: false,
            version: 0,
            created_at,
            updated_at: created_at,
        }
    }

    /// Create a test task with deterministic ID and timestamp (for tests only)
    ///
    /// IDs are `test-task-1`, `test-task-2`, ... and timestamps start at 1000.
    pub fn new_test(queue_id: impl Into<String>, title: impl Into<String>) -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static TEST_COUNTER: AtomicU64 = AtomicU64::new(1);

        let counter = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        Self::new(
            format!("test-task-{}", counter),
            (counter * 1000) as i64,
            queue_id,
            title,
            serde_json::json!({}),
        )
    }

    /// Eligible for dispatch at `now_millis`
    pub fn is_due(&self, now_millis: i64) -> bool {
        self.status == TaskStatus::Pending && self.scheduled_for.map_or(true, |at| at <= now_millis)
    }

    fn transition_error(&self, to: TaskStatus) -> DomainError {
        DomainError::InvalidStateTransition {
            from: self.status.to_string(),
            to: to.to_string(),
        }
    }

    fn expect_processing(&self, to: TaskStatus) -> Result<()> {
        if self.status != TaskStatus::Processing {
            return Err(self.transition_error(to));
        }
        Ok(())
    }

    /// processing -> completed
    pub fn complete(&mut self, now_millis: i64, output: Option<serde_json::Value>) -> Result<()> {
        self.expect_processing(TaskStatus::Completed)?;
        self.status = TaskStatus::Completed;
        self.completed_at = Some(now_millis);
        self.output = output;
        self.updated_at = now_millis;
        Ok(())
    }

    /// processing -> pending, eligible again at `retry_at`
    pub fn schedule_retry(&mut self, now_millis: i64, retry_at: i64, error: String) -> Result<()> {
        self.expect_processing(TaskStatus::Pending)?;
        self.status = TaskStatus::Pending;
        self.retry_count += 1;
        self.scheduled_for = Some(retry_at);
        self.started_at = None;
        self.error = Some(error);
        self.updated_at = now_millis;
        Ok(())
    }

    /// processing -> failed (retries exhausted)
    pub fn fail(&mut self, now_millis: i64, error: String) -> Result<()> {
        self.expect_processing(TaskStatus::Failed)?;
        self.status = TaskStatus::Failed;
        self.completed_at = Some(now_millis);
        self.error = Some(error);
        self.updated_at = now_millis;
        Ok(())
    }

    /// Cancel request: immediate for pending, cooperative for processing.
    ///
    /// A second request on a processing task that is already flagged is
    /// rejected, same as cancelling a terminal task.
    pub fn request_cancel(&mut self, now_millis: i64) -> Result<CancelOutcome> {
        match self.status {
            TaskStatus::Pending => {
                self.status = TaskStatus::Cancelled;
                self.completed_at = Some(now_millis);
                self.updated_at = now_millis;
                Ok(CancelOutcome::Cancelled)
            }
            TaskStatus::Processing if !self.cancel_requested => {
                self.cancel_requested = true;
                self.updated_at = now_millis;
                Ok(CancelOutcome::Requested)
            }
            _ => Err(self.transition_error(TaskStatus::Cancelled)),
        }
    }

    /// processing (cancel requested) -> cancelled, discarding the attempt result
    pub fn finish_cancelled(&mut self, now_millis: i64) -> Result<()> {
        self.expect_processing(TaskStatus::Cancelled)?;
        if !self.cancel_requested {
            return Err(self.transition_error(TaskStatus::Cancelled));
        }
        self.status = TaskStatus::Cancelled;
        self.completed_at = Some(now_millis);
        self.updated_at = now_millis;
        Ok(())
    }

    /// failed -> pending (manual override, ignores retry limit)
    pub fn manual_retry(&mut self, now_millis: i64) -> Result<()> {
        if self.status != TaskStatus::Failed {
            return Err(self.transition_error(TaskStatus::Pending));
        }
        self.status = TaskStatus::Pending;
        self.scheduled_for = Some(now_millis);
        self.started_at = None;
        self.completed_at = None;
        self.updated_at = now_millis;
        Ok(())
    }

    /// processing -> pending after a crash of the previous process
    ///
    /// A task with an accepted cancellation must be finished with
    /// [`finish_cancelled`](Self::finish_cancelled) instead.
    pub fn requeue_orphan(&mut self, now_millis: i64) -> Result<()> {
        self.expect_processing(TaskStatus::Pending)?;
        if self.cancel_requested {
            return Err(self.transition_error(TaskStatus::Pending));
        }
        self.status = TaskStatus::Pending;
        self.started_at = None;
        self.updated_at = now_millis;
        Ok(())
    }
}

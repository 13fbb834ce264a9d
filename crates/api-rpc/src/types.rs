//! RPC Request/Response Types
//!
//! Defines the JSON-RPC method parameters and results. Queue and task
//! payloads reuse the core domain types so the wire format follows them.

use serde::{Deserialize, Serialize};
use tasklane_core::domain::{NewTask, QueueConfig, QueueSummary, QueuedTask};

fn default_true() -> bool {
    true
}

/// queue.create.v1 - Create a queue
#[derive(Debug, Deserialize)]
pub struct CreateQueueRequest {
    #[serde(flatten)]
    pub config: QueueConfig,
    /// Create paused when false
    #[serde(default = "default_true")]
    pub is_active: bool,
}

/// queue.get/activate/deactivate/complete/execute/delete.v1 and task.list.v1
#[derive(Debug, Deserialize)]
pub struct QueueRequest {
    pub queue_id: String,
}

/// task.get/retry/cancel.v1
#[derive(Debug, Deserialize)]
pub struct TaskRequest {
    pub queue_id: String,
    pub task_id: String,
}

/// task.enqueue.v1 - Add a task to a queue
#[derive(Debug, Deserialize)]
pub struct EnqueueTaskRequest {
    pub queue_id: String,
    #[serde(flatten)]
    pub task: NewTask,
}

/// queue.events.subscribe.v1 - optional filter
#[derive(Debug, Default, Deserialize)]
pub struct SubscribeRequest {
    #[serde(default)]
    pub queue_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueListResponse {
    pub queues: Vec<QueueSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskListResponse {
    pub queue_id: String,
    pub tasks: Vec<QueuedTask>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecuteQueueResponse {
    pub queue_id: String,
    pub dispatched: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteQueueResponse {
    pub queue_id: String,
    pub deleted: bool,
    pub tasks_removed: u64,
}

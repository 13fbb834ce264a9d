//! SDK Types
//!
//! Mirrors the daemon's JSON-RPC payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Task created on each cron fire of a scheduled queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTemplate {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub metadata: Value,
}

/// queue.create.v1 parameters
#[derive(Debug, Clone, Serialize)]
pub struct CreateQueueRequest {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub concurrency: u32,
    pub retry_limit: u32,
    pub retry_delay_ms: i64,
    pub priority: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cron_expression: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cron_template: Option<TaskTemplate>,
    pub is_active: bool,
}

impl CreateQueueRequest {
    pub fn new(name: impl Into<String>, concurrency: u32) -> Self {
        Self {
            name: name.into(),
            description: None,
            concurrency,
            retry_limit: 0,
            retry_delay_ms: 0,
            priority: 0,
            cron_expression: None,
            cron_template: None,
            is_active: true,
        }
    }

    pub fn with_retry(mut self, retry_limit: u32, retry_delay_ms: i64) -> Self {
        self.retry_limit = retry_limit;
        self.retry_delay_ms = retry_delay_ms;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_cron(mut self, expression: impl Into<String>, template: Option<TaskTemplate>) -> Self {
        self.cron_expression = Some(expression.into());
        self.cron_template = template;
        self
    }

    /// Create the queue paused
    pub fn paused(mut self) -> Self {
        self.is_active = false;
        self
    }
}

/// task.enqueue.v1 parameters (queue id is passed separately)
#[derive(Debug, Clone, Default, Serialize)]
pub struct EnqueueTaskRequest {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub priority: i32,
    pub metadata: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_for: Option<i64>,
}

impl EnqueueTaskRequest {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            metadata: Value::Object(Default::default()),
            ..Default::default()
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Do not dispatch before this time (epoch ms)
    pub fn scheduled_for(mut self, at: i64) -> Self {
        self.scheduled_for = Some(at);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Active,
    Paused,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
}

/// Queue with derived status and live task counts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub concurrency: u32,
    pub retry_limit: u32,
    pub retry_delay_ms: i64,
    pub priority: i32,
    #[serde(default)]
    pub cron_expression: Option<String>,
    #[serde(default)]
    pub cron_template: Option<TaskTemplate>,
    pub is_active: bool,
    pub completed: bool,
    #[serde(default)]
    pub last_fired_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    pub status: QueueStatus,
    pub counts: QueueCounts,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: String,
    pub queue_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub priority: i32,
    pub status: TaskStatus,
    pub retry_count: u32,
    #[serde(default)]
    pub scheduled_for: Option<i64>,
    #[serde(default)]
    pub started_at: Option<i64>,
    #[serde(default)]
    pub completed_at: Option<i64>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub metadata: Value,
    pub cancel_requested: bool,
    pub version: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct QueueListResponse {
    pub queues: Vec<QueueInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TaskListResponse {
    pub tasks: Vec<TaskInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteQueueResponse {
    pub queue_id: String,
    pub dispatched: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteQueueResponse {
    pub queue_id: String,
    pub deleted: bool,
    pub tasks_removed: u64,
}

/// Change notification pushed on `queue.events.v1`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueEvent {
    QueueCreated {
        queue_id: String,
        at: i64,
    },
    QueueUpdated {
        queue_id: String,
        status: QueueStatus,
        is_active: bool,
        at: i64,
    },
    QueueDeleted {
        queue_id: String,
        tasks_removed: u64,
        at: i64,
    },
    TaskEnqueued {
        queue_id: String,
        task_id: String,
        at: i64,
    },
    TaskStatusChanged {
        queue_id: String,
        task_id: String,
        status: TaskStatus,
        retry_count: u32,
        at: i64,
    },
    TaskCancelRequested {
        queue_id: String,
        task_id: String,
        at: i64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_request_omits_unset_cron() {
        let value = serde_json::to_value(CreateQueueRequest::new("emails", 2).paused()).unwrap();
        assert_eq!(value["is_active"], false);
        assert!(value.get("cron_expression").is_none());
    }

    #[test]
    fn test_event_decodes_tagged_payload() {
        let event: QueueEvent = serde_json::from_value(json!({
            "type": "task_status_changed",
            "queue_id": "q-1",
            "task_id": "t-1",
            "status": "failed",
            "retry_count": 1,
            "at": 1000
        }))
        .unwrap();

        assert_eq!(
            event,
            QueueEvent::TaskStatusChanged {
                queue_id: "q-1".into(),
                task_id: "t-1".into(),
                status: TaskStatus::Failed,
                retry_count: 1,
                at: 1000,
            }
        );
    }

    #[test]
    fn test_cancel_requested_event_decodes() {
        let event: QueueEvent = serde_json::from_value(json!({
            "type": "task_cancel_requested",
            "queue_id": "q-1",
            "task_id": "t-1",
            "at": 2000
        }))
        .unwrap();

        assert_eq!(
            event,
            QueueEvent::TaskCancelRequested {
                queue_id: "q-1".into(),
                task_id: "t-1".into(),
                at: 2000,
            }
        );
    }
}

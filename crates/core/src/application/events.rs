// Change notification for queue and task state

use crate::domain::{QueueId, QueueStatus, TaskId, TaskStatus};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

/// Event pushed to subscribers after every committed state change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueEvent {
    QueueCreated {
        queue_id: QueueId,
        at: i64,
    },
    QueueUpdated {
        queue_id: QueueId,
        status: QueueStatus,
        is_active: bool,
        at: i64,
    },
    QueueDeleted {
        queue_id: QueueId,
        tasks_removed: u64,
        at: i64,
    },
    TaskEnqueued {
        queue_id: QueueId,
        task_id: TaskId,
        at: i64,
    },
    TaskStatusChanged {
        queue_id: QueueId,
        task_id: TaskId,
        status: TaskStatus,
        retry_count: u32,
        at: i64,
    },
    /// A running task was asked to stop; its final status follows later
    TaskCancelRequested {
        queue_id: QueueId,
        task_id: TaskId,
        at: i64,
    },
}

impl QueueEvent {
    pub fn queue_id(&self) -> &str {
        match self {
            QueueEvent::QueueCreated { queue_id, .. }
            | QueueEvent::QueueUpdated { queue_id, .. }
            | QueueEvent::QueueDeleted { queue_id, .. }
            | QueueEvent::TaskEnqueued { queue_id, .. }
            | QueueEvent::TaskStatusChanged { queue_id, .. }
            | QueueEvent::TaskCancelRequested { queue_id, .. } => queue_id,
        }
    }
}

/// Fan-out of [`QueueEvent`]s. Slow subscribers lag and lose the oldest
/// events; publishers never block.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<QueueEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: QueueEvent) {
        // No subscribers is the common case for a headless daemon
        if let Err(broadcast::error::SendError(event)) = self.tx.send(event) {
            trace!(queue_id = %event.queue_id(), "No event subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

// Domain Layer - Pure business logic and entities

pub mod error;
pub mod queue;
pub mod task;

// Re-exports
pub use error::DomainError;
pub use queue::{
    parse_cron, Queue, QueueConfig, QueueCounts, QueueId, QueueStatus, QueueSummary, TaskTemplate,
};
pub use task::{CancelOutcome, NewTask, Priority, QueuedTask, TaskId, TaskStatus};

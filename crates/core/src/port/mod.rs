// Port Layer - Interfaces for external dependencies

pub mod id_provider; // For deterministic testing
pub mod queue_repository;
pub mod task_executor;
pub mod task_repository;
pub mod time_provider;

// Re-exports
pub use id_provider::{IdProvider, UuidProvider};
pub use queue_repository::QueueRepository;
pub use task_executor::{
    cancel_channel, CancelHandle, CancelToken, ExecutionError, ExecutionOutput, TaskExecutor,
};
pub use task_repository::TaskRepository;
pub use time_provider::{SystemTimeProvider, TimeProvider};

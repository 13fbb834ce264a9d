// Tasklane Infrastructure - SQLite Adapter
// Implements: QueueRepository, TaskRepository

mod connection;
mod error;
mod migration;
mod queue_repository;
mod task_repository;

pub use connection::create_pool;
pub use migration::run_migrations;
pub use queue_repository::SqliteQueueRepository;
pub use task_repository::SqliteTaskRepository;

// Note: sqlx::Error conversion is handled by a helper function (error::map_sqlx_error)
// due to Rust's orphan rules (cannot implement From<sqlx::Error> for AppError here)

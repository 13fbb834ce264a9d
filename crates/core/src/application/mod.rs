// Application Layer - Use Cases and Business Logic

pub mod config;
pub mod constants;
pub mod cron;
pub mod dispatcher;
pub mod events;
pub mod manager;
pub mod recovery;
pub mod retry;
pub mod scheduler;
pub mod shutdown;

// Re-exports
pub use config::EngineConfig;
pub use cron::CronTrigger;
pub use dispatcher::Dispatcher;
pub use events::{EventBus, QueueEvent};
pub use manager::QueueManager;
pub use recovery::RecoveryService;
pub use retry::{RetryDecision, RetryPolicy};
pub use scheduler::{CycleReport, Scheduler};
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

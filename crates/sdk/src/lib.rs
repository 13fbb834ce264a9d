//! Tasklane SDK - Rust Client Library
//!
//! Typed client for the Tasklane daemon's JSON-RPC API.
//!
//! # Example
//!
//! ```no_run
//! use tasklane_sdk::{CreateQueueRequest, EnqueueTaskRequest, TasklaneClient};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = TasklaneClient::connect("http://127.0.0.1:9630").await?;
//!
//!     let queue = client
//!         .create_queue(CreateQueueRequest::new("emails", 2).with_retry(3, 5_000))
//!         .await?;
//!
//!     let task = client
//!         .enqueue_task(
//!             &queue.id,
//!             EnqueueTaskRequest::new("send welcome mail")
//!                 .with_metadata(json!({"command": "sendmail", "args": ["bob@example.com"]})),
//!         )
//!         .await?;
//!
//!     println!("Task enqueued: {} ({})", task.id, task.status);
//!     Ok(())
//! }
//! ```

mod client;
mod error;
mod types;

pub use client::{EventSubscription, TasklaneClient};
pub use error::{Result, SdkError};
pub use types::{
    CreateQueueRequest, DeleteQueueResponse, EnqueueTaskRequest, ExecuteQueueResponse,
    QueueCounts, QueueEvent, QueueInfo, QueueStatus, TaskInfo, TaskStatus, TaskTemplate,
};

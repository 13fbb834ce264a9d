//! Simple SDK Example
//!
//! Creates a queue, enqueues a shell task and follows it to completion.
//!
//! # Usage
//!
//! 1. Start the daemon:
//!    ```bash
//!    cargo run --package tasklane-daemon
//!    ```
//!
//! 2. Run this example:
//!    ```bash
//!    cargo run --package tasklane-sdk --example simple
//!    ```

use serde_json::json;
use tasklane_sdk::{CreateQueueRequest, EnqueueTaskRequest, QueueEvent, TasklaneClient};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Tasklane SDK - Simple Example");
    println!("=============================\n");

    println!("1. Connecting to daemon...");
    let client = TasklaneClient::connect("http://127.0.0.1:9630").await?;
    println!("   ✓ Connected\n");

    println!("2. Creating queue...");
    let queue = client
        .create_queue(CreateQueueRequest::new("example", 2).with_retry(1, 1_000))
        .await?;
    println!("   ✓ Queue {} ({:?})\n", queue.id, queue.status);

    let mut events = client.subscribe_events(Some(&queue.id)).await?;

    println!("3. Enqueuing a task...");
    let task = client
        .enqueue_task(
            &queue.id,
            EnqueueTaskRequest::new("say hello").with_metadata(json!({
                "command": "echo",
                "args": ["{\"greeting\": \"hello\"}"]
            })),
        )
        .await?;
    println!("   ✓ Task {} is {}\n", task.id, task.status);

    println!("4. Waiting for the task to finish...");
    while let Some(event) = events.next().await {
        if let QueueEvent::TaskStatusChanged {
            task_id, status, ..
        } = event?
        {
            println!("   • {} -> {}", task_id, status);
            if task_id == task.id && status.is_terminal() {
                break;
            }
        }
    }

    let finished = client.get_task(&queue.id, &task.id).await?;
    println!("\n   Output: {}", finished.output.unwrap_or_default());

    println!("\n5. Cleaning up...");
    let deleted = client.delete_queue(&queue.id).await?;
    println!("   ✓ Removed queue and {} task(s)", deleted.tasks_removed);

    Ok(())
}

//! Tasklane CLI - Command-line interface for the Tasklane queue engine

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tabled::{Table, Tabled};

const DEFAULT_RPC_URL: &str = "http://127.0.0.1:9630";

#[derive(Parser)]
#[command(name = "tasklane")]
#[command(about = "Tasklane queue engine CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// RPC server URL
    #[arg(long, env = "TASKLANE_RPC_URL", default_value = DEFAULT_RPC_URL, global = true)]
    rpc_url: String,

    /// Print raw JSON results instead of tables
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage queues
    #[command(subcommand)]
    Queue(QueueCommand),

    /// Manage tasks
    #[command(subcommand)]
    Task(TaskCommand),
}

#[derive(Subcommand)]
enum QueueCommand {
    /// Create a queue
    Create(CreateQueueArgs),
    /// List all queues with live task counts
    List,
    /// Show one queue
    Get { queue_id: String },
    /// Resume dispatching
    Activate { queue_id: String },
    /// Stop dispatching (running tasks finish)
    Deactivate { queue_id: String },
    /// Mark a drained queue completed
    Complete { queue_id: String },
    /// Dispatch due tasks now
    Execute { queue_id: String },
    /// Delete a queue and all of its tasks
    Delete { queue_id: String },
}

#[derive(Args)]
struct CreateQueueArgs {
    /// Queue name
    #[arg(short, long)]
    name: String,

    /// Max tasks processing at once
    #[arg(short, long, default_value = "1")]
    concurrency: u32,

    /// Automatic retries after a failed attempt
    #[arg(long, default_value = "0")]
    retry_limit: u32,

    /// Delay before each retry, in milliseconds
    #[arg(long, default_value = "0")]
    retry_delay_ms: i64,

    /// Priority (higher = dispatched first)
    #[arg(short, long, default_value = "0")]
    priority: i32,

    /// Cron expression (5 or 6 fields)
    #[arg(long)]
    cron: Option<String>,

    #[arg(short, long)]
    description: Option<String>,

    /// Create the queue inactive
    #[arg(long)]
    paused: bool,
}

#[derive(Subcommand)]
enum TaskCommand {
    /// Add a task to a queue
    Enqueue(EnqueueTaskArgs),
    /// List the tasks of a queue
    List { queue_id: String },
    /// Show one task
    Get { queue_id: String, task_id: String },
    /// Re-run a failed task
    Retry { queue_id: String, task_id: String },
    /// Cancel a pending or running task
    Cancel { queue_id: String, task_id: String },
}

#[derive(Args)]
struct EnqueueTaskArgs {
    queue_id: String,

    #[arg(short, long)]
    title: String,

    #[arg(short, long, default_value = "0")]
    priority: i32,

    /// Metadata as JSON string, e.g. '{"command": "echo", "args": ["hi"]}'
    #[arg(long)]
    metadata: Option<String>,

    #[arg(short, long)]
    description: Option<String>,

    /// Earliest dispatch time (epoch ms)
    #[arg(long)]
    scheduled_for: Option<i64>,
}

#[derive(Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: Value,
    id: u64,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    #[allow(dead_code)]
    jsonrpc: String,
    #[allow(dead_code)]
    id: u64,
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

#[derive(Tabled)]
struct QueueRow {
    id: String,
    name: String,
    status: String,
    concurrency: String,
    priority: String,
    pending: String,
    processing: String,
    completed: String,
    failed: String,
    cancelled: String,
}

#[derive(Tabled)]
struct TaskRow {
    id: String,
    title: String,
    status: String,
    priority: String,
    retries: String,
    error: String,
}

async fn call_rpc(url: &str, method: &str, params: Value) -> Result<Value> {
    let request = JsonRpcRequest {
        jsonrpc: "2.0".to_string(),
        method: method.to_string(),
        params,
        id: 1,
    };

    let client = reqwest::Client::new();
    let response: JsonRpcResponse = client
        .post(url)
        .json(&request)
        .send()
        .await
        .context("Failed to connect to daemon")?
        .json()
        .await
        .context("Failed to parse response")?;

    if let Some(error) = response.error {
        anyhow::bail!("RPC error ({}): {}", error.code, error.message);
    }

    response
        .result
        .ok_or_else(|| anyhow::anyhow!("No result in response"))
}

fn text(value: &Value) -> String {
    match value {
        Value::Null => "-".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn queue_row(queue: &Value) -> QueueRow {
    let counts = &queue["counts"];
    QueueRow {
        id: text(&queue["id"]),
        name: text(&queue["name"]),
        status: text(&queue["status"]),
        concurrency: text(&queue["concurrency"]),
        priority: text(&queue["priority"]),
        pending: text(&counts["pending"]),
        processing: text(&counts["processing"]),
        completed: text(&counts["completed"]),
        failed: text(&counts["failed"]),
        cancelled: text(&counts["cancelled"]),
    }
}

fn task_row(task: &Value) -> TaskRow {
    TaskRow {
        id: text(&task["id"]),
        title: text(&task["title"]),
        status: text(&task["status"]),
        priority: text(&task["priority"]),
        retries: text(&task["retry_count"]),
        error: text(&task["error"]),
    }
}

fn create_queue_params(args: CreateQueueArgs) -> Value {
    json!({
        "name": args.name,
        "description": args.description,
        "concurrency": args.concurrency,
        "retry_limit": args.retry_limit,
        "retry_delay_ms": args.retry_delay_ms,
        "priority": args.priority,
        "cron_expression": args.cron,
        "is_active": !args.paused,
    })
}

fn enqueue_task_params(args: EnqueueTaskArgs) -> Result<Value> {
    let metadata: Value = match args.metadata {
        Some(raw) => serde_json::from_str(&raw).context("Invalid JSON metadata")?,
        None => json!({}),
    };

    Ok(json!({
        "queue_id": args.queue_id,
        "title": args.title,
        "description": args.description,
        "priority": args.priority,
        "metadata": metadata,
        "scheduled_for": args.scheduled_for,
    }))
}

struct Output {
    json: bool,
}

impl Output {
    fn queues(&self, headline: Option<String>, queues: &[Value]) {
        if self.json {
            self.raw(&Value::Array(queues.to_vec()));
            return;
        }
        if let Some(headline) = headline {
            println!("{}", headline.green().bold());
            println!();
        }
        if queues.is_empty() {
            println!("{}", "No queues".yellow());
        } else {
            println!("{}", Table::new(queues.iter().map(queue_row)));
        }
    }

    fn tasks(&self, headline: Option<String>, tasks: &[Value]) {
        if self.json {
            self.raw(&Value::Array(tasks.to_vec()));
            return;
        }
        if let Some(headline) = headline {
            println!("{}", headline.green().bold());
            println!();
        }
        if tasks.is_empty() {
            println!("{}", "No tasks".yellow());
        } else {
            println!("{}", Table::new(tasks.iter().map(task_row)));
        }
    }

    fn message(&self, result: &Value, message: String) {
        if self.json {
            self.raw(result);
        } else {
            println!("{}", message.green().bold());
        }
    }

    fn raw(&self, value: &Value) {
        match serde_json::to_string_pretty(value) {
            Ok(s) => println!("{}", s),
            Err(_) => println!("{}", value),
        }
    }
}

async fn run_queue(url: &str, out: &Output, command: QueueCommand) -> Result<()> {
    match command {
        QueueCommand::Create(args) => {
            let queue = call_rpc(url, "queue.create.v1", create_queue_params(args)).await?;
            out.queues(Some("✓ Queue created".to_string()), &[queue]);
        }
        QueueCommand::List => {
            let result = call_rpc(url, "queue.list.v1", json!({})).await?;
            let queues = result["queues"].as_array().cloned().unwrap_or_default();
            out.queues(None, &queues);
        }
        QueueCommand::Get { queue_id } => {
            let queue = call_rpc(url, "queue.get.v1", json!({ "queue_id": queue_id })).await?;
            if out.json {
                out.raw(&queue);
            } else {
                out.queues(None, &[queue.clone()]);
                println!("  {} {}", "Retry:".bold(), format_retry(&queue));
                println!("  {} {}", "Cron:".bold(), text(&queue["cron_expression"]));
            }
        }
        QueueCommand::Activate { queue_id } => {
            let queue =
                call_rpc(url, "queue.activate.v1", json!({ "queue_id": queue_id })).await?;
            out.queues(Some(format!("✓ Queue {} activated", queue_id)), &[queue]);
        }
        QueueCommand::Deactivate { queue_id } => {
            let queue =
                call_rpc(url, "queue.deactivate.v1", json!({ "queue_id": queue_id })).await?;
            out.queues(Some(format!("✓ Queue {} deactivated", queue_id)), &[queue]);
        }
        QueueCommand::Complete { queue_id } => {
            let queue =
                call_rpc(url, "queue.complete.v1", json!({ "queue_id": queue_id })).await?;
            out.queues(Some(format!("✓ Queue {} completed", queue_id)), &[queue]);
        }
        QueueCommand::Execute { queue_id } => {
            let result =
                call_rpc(url, "queue.execute.v1", json!({ "queue_id": queue_id })).await?;
            let message = format!(
                "✓ Dispatched {} task(s) from queue {}",
                text(&result["dispatched"]),
                queue_id
            );
            out.message(&result, message);
        }
        QueueCommand::Delete { queue_id } => {
            let result = call_rpc(url, "queue.delete.v1", json!({ "queue_id": queue_id })).await?;
            let message = format!(
                "✓ Queue {} deleted ({} task(s) removed)",
                queue_id,
                text(&result["tasks_removed"])
            );
            out.message(&result, message);
        }
    }
    Ok(())
}

async fn run_task(url: &str, out: &Output, command: TaskCommand) -> Result<()> {
    match command {
        TaskCommand::Enqueue(args) => {
            let task = call_rpc(url, "task.enqueue.v1", enqueue_task_params(args)?).await?;
            out.tasks(Some("✓ Task enqueued".to_string()), &[task]);
        }
        TaskCommand::List { queue_id } => {
            let result = call_rpc(url, "task.list.v1", json!({ "queue_id": queue_id })).await?;
            let tasks = result["tasks"].as_array().cloned().unwrap_or_default();
            out.tasks(None, &tasks);
        }
        TaskCommand::Get { queue_id, task_id } => {
            let params = json!({ "queue_id": queue_id, "task_id": task_id });
            let task = call_rpc(url, "task.get.v1", params).await?;
            if out.json {
                out.raw(&task);
            } else {
                out.tasks(None, &[task.clone()]);
                if !task["output"].is_null() {
                    println!("{}", "Output:".cyan().bold());
                    out.raw(&task["output"]);
                }
            }
        }
        TaskCommand::Retry { queue_id, task_id } => {
            let params = json!({ "queue_id": queue_id, "task_id": task_id });
            let task = call_rpc(url, "task.retry.v1", params).await?;
            out.tasks(Some(format!("✓ Task {} queued for retry", task_id)), &[task]);
        }
        TaskCommand::Cancel { queue_id, task_id } => {
            let params = json!({ "queue_id": queue_id, "task_id": task_id });
            let task = call_rpc(url, "task.cancel.v1", params).await?;
            let headline = if task["status"] == "cancelled" {
                format!("✓ Task {} cancelled", task_id)
            } else {
                format!("✓ Cancellation requested for running task {}", task_id)
            };
            out.tasks(Some(headline), &[task]);
        }
    }
    Ok(())
}

fn format_retry(queue: &Value) -> String {
    format!(
        "{} attempt(s), {} ms apart",
        text(&queue["retry_limit"]),
        text(&queue["retry_delay_ms"])
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let out = Output { json: cli.json };

    let result = match cli.command {
        Commands::Queue(command) => run_queue(&cli.rpc_url, &out, command).await,
        Commands::Task(command) => run_task(&cli.rpc_url, &out, command).await,
    };

    if let Err(e) = &result {
        eprintln!("{} {:#}", "✗".red().bold(), e);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_nested_commands() {
        let cli = Cli::try_parse_from([
            "tasklane", "queue", "create", "--name", "emails", "--concurrency", "3", "--paused",
        ])
        .unwrap();

        match cli.command {
            Commands::Queue(QueueCommand::Create(args)) => {
                let params = create_queue_params(args);
                assert_eq!(params["name"], "emails");
                assert_eq!(params["concurrency"], 3);
                assert_eq!(params["is_active"], false);
            }
            _ => panic!("expected queue create"),
        }
    }

    #[test]
    fn test_enqueue_params_parse_metadata() {
        let cli = Cli::try_parse_from([
            "tasklane",
            "task",
            "enqueue",
            "q-1",
            "--title",
            "say hi",
            "--metadata",
            r#"{"command": "echo"}"#,
        ])
        .unwrap();

        let Commands::Task(TaskCommand::Enqueue(args)) = cli.command else {
            panic!("expected task enqueue");
        };
        let params = enqueue_task_params(args).unwrap();
        assert_eq!(params["queue_id"], "q-1");
        assert_eq!(params["metadata"]["command"], "echo");
    }

    #[test]
    fn test_enqueue_rejects_bad_metadata() {
        let args = EnqueueTaskArgs {
            queue_id: "q-1".to_string(),
            title: "x".to_string(),
            priority: 0,
            metadata: Some("{not json".to_string()),
            description: None,
            scheduled_for: None,
        };
        assert!(enqueue_task_params(args).is_err());
    }

    #[test]
    fn test_queue_row_reads_counts() {
        let row = queue_row(&json!({
            "id": "q-1",
            "name": "emails",
            "status": "active",
            "concurrency": 2,
            "priority": 0,
            "counts": {"pending": 4, "processing": 2, "completed": 1, "failed": 0, "cancelled": 0}
        }));
        assert_eq!(row.pending, "4");
        assert_eq!(row.status, "active");
    }
}

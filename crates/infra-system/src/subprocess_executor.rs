// Subprocess executor implementation
// reason: async-trait, tokio for async process management
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use tasklane_core::application::constants::GRACEFUL_SHUTDOWN_TIMEOUT_MS;
use tasklane_core::domain::QueuedTask;
use tasklane_core::port::{
    CancelToken, ExecutionError, ExecutionOutput, TaskExecutor, TimeProvider,
};

/// Command description carried in task metadata
///
/// ```json
/// { "command": "python3", "args": ["crawl.py"], "env": {"LANG": "C"}, "working_dir": "/srv" }
/// ```
#[derive(Debug, Clone, Deserialize)]
struct CommandSpec {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: HashMap<String, String>,
    #[serde(default = "default_working_dir")]
    working_dir: String,
}

fn default_working_dir() -> String {
    ".".to_string()
}

/// Subprocess executor
/// Spawns isolated child processes with environment allowlisting
pub struct SubprocessExecutor {
    time_provider: Arc<dyn TimeProvider>,
    env_allowlist: Vec<String>,
    graceful_timeout: Duration,
}

impl SubprocessExecutor {
    /// Create a new subprocess executor
    ///
    /// # Arguments
    /// * `time_provider` - Time provider for duration tracking
    /// * `env_allowlist` - Environment variables a task may set (security constraint)
    ///
    /// # Example
    /// ```ignore
    /// let executor = SubprocessExecutor::new(
    ///     Arc::new(SystemTimeProvider),
    ///     vec!["PATH".to_string(), "HOME".to_string(), "USER".to_string()],
    /// );
    /// ```
    pub fn new(time_provider: Arc<dyn TimeProvider>, env_allowlist: Vec<String>) -> Self {
        Self {
            time_provider,
            env_allowlist,
            graceful_timeout: Duration::from_millis(GRACEFUL_SHUTDOWN_TIMEOUT_MS as u64),
        }
    }

    /// Override the SIGTERM -> SIGKILL grace period
    pub fn with_graceful_timeout(mut self, timeout: Duration) -> Self {
        self.graceful_timeout = timeout;
        self
    }

    /// Filter environment variables to allowlist only
    fn filter_env(&self, env: &HashMap<String, String>) -> HashMap<String, String> {
        env.iter()
            .filter(|(k, _)| self.env_allowlist.contains(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Parse task metadata to extract execution parameters
    fn parse_metadata(&self, task: &QueuedTask) -> Result<CommandSpec, ExecutionError> {
        let cmd: CommandSpec = serde_json::from_value(task.metadata.clone())
            .map_err(|e| ExecutionError::InvalidMetadata(e.to_string()))?;
        if cmd.command.trim().is_empty() {
            return Err(ExecutionError::InvalidMetadata(
                "'command' cannot be empty".to_string(),
            ));
        }
        Ok(cmd)
    }

    fn spawn(&self, cmd: &CommandSpec) -> Result<Child, ExecutionError> {
        Command::new(&cmd.command)
            .args(&cmd.args)
            .envs(self.filter_env(&cmd.env))
            .current_dir(&cmd.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecutionError::SpawnFailed(format!("{}: {}", cmd.command, e)))
    }

    /// Stop the child: SIGTERM first, SIGKILL after the grace period
    async fn terminate(&self, child: &mut Child) {
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            info!(pid = %pid, "Sending SIGTERM for graceful shutdown");
            if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok() {
                if tokio::time::timeout(self.graceful_timeout, child.wait())
                    .await
                    .is_ok()
                {
                    info!(pid = %pid, "Process exited gracefully after SIGTERM");
                    return;
                }
                warn!(pid = %pid, "Process did not exit after SIGTERM, sending SIGKILL");
            }
        }

        if let Err(e) = child.kill().await {
            warn!(error = %e, "Failed to kill child process");
        }
    }
}

fn drain<R>(pipe: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        buf
    })
}

/// Stdout is stored as task output: parsed as JSON when possible,
/// otherwise wrapped as `{"stdout": "..."}`
fn stdout_to_output(stdout: &str) -> Option<serde_json::Value> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(
        serde_json::from_str(trimmed)
            .unwrap_or_else(|_| serde_json::json!({ "stdout": trimmed })),
    )
}

#[async_trait]
impl TaskExecutor for SubprocessExecutor {
    async fn execute(
        &self,
        task: &QueuedTask,
        cancel: CancelToken,
    ) -> Result<ExecutionOutput, ExecutionError> {
        let cmd = self.parse_metadata(task)?;
        let start_time = self.time_provider.now_millis();

        info!(
            task_id = %task.id,
            command = %cmd.command,
            args = ?cmd.args,
            working_dir = %cmd.working_dir,
            "Starting subprocess execution"
        );

        let mut child = self.spawn(&cmd)?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = tokio::select! {
            status = child.wait() => status.map_err(|e| ExecutionError::Io(e.to_string()))?,
            _ = cancel.cancelled() => {
                info!(task_id = %task.id, "Cancellation requested, stopping subprocess");
                self.terminate(&mut child).await;
                return Err(ExecutionError::Cancelled);
            }
        };

        let stdout = String::from_utf8_lossy(&stdout.await.unwrap_or_default()).to_string();
        let stderr = String::from_utf8_lossy(&stderr.await.unwrap_or_default()).to_string();
        let duration_ms = self.time_provider.now_millis() - start_time;

        info!(
            task_id = %task.id,
            duration_ms = %duration_ms,
            exit_code = ?status.code(),
            "Subprocess execution completed"
        );

        if status.success() {
            Ok(ExecutionOutput {
                output: stdout_to_output(&stdout),
                duration_ms,
            })
        } else {
            Err(ExecutionError::NonZeroExit {
                code: status.code(),
                stderr: stderr.trim().to_string(),
            })
        }
    }
}

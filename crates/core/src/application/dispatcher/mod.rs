// Dispatcher: runs reserved tasks through the executor and records the outcome

mod pool;

pub use pool::WorkerPools;

use crate::application::constants::{FINALIZE_RETRY_BASE, FINALIZE_RETRY_MAX, MAX_CAS_ATTEMPTS};
use crate::application::events::{EventBus, QueueEvent};
use crate::application::retry::RetryPolicy;
use crate::domain::{Queue, QueueId, QueuedTask, TaskId, TaskStatus};
use crate::error::{AppError, Result};
use crate::port::{
    cancel_channel, CancelHandle, CancelToken, ExecutionError, ExecutionOutput, TaskExecutor,
    TaskRepository, TimeProvider,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

struct InFlight {
    queue_id: QueueId,
    cancel: CancelHandle,
}

/// Executes tasks the scheduler has already moved to `processing`
///
/// Each task runs on its own tokio task, behind the owning queue's worker
/// pool. Executor panics and timeouts are turned into failed attempts.
pub struct Dispatcher {
    task_repo: Arc<dyn TaskRepository>,
    executor: Arc<dyn TaskExecutor>,
    time_provider: Arc<dyn TimeProvider>,
    events: EventBus,
    retry_policy: RetryPolicy,
    pools: WorkerPools,
    in_flight: Mutex<HashMap<TaskId, InFlight>>,
    idle: Notify,
    execution_timeout: Option<Duration>,
}

impl Dispatcher {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        executor: Arc<dyn TaskExecutor>,
        time_provider: Arc<dyn TimeProvider>,
        events: EventBus,
        execution_timeout: Option<Duration>,
    ) -> Self {
        Self {
            task_repo,
            executor,
            time_provider,
            events,
            retry_policy: RetryPolicy::new(),
            pools: WorkerPools::new(),
            in_flight: Mutex::new(HashMap::new()),
            idle: Notify::new(),
            execution_timeout,
        }
    }

    fn in_flight_map(&self) -> std::sync::MutexGuard<'_, HashMap<TaskId, InFlight>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start executing a reserved task in the background
    pub fn dispatch(self: &Arc<Self>, queue: &Queue, task: QueuedTask) {
        let (handle, token) = cancel_channel();
        self.in_flight_map().insert(
            task.id.clone(),
            InFlight {
                queue_id: queue.id.clone(),
                cancel: handle,
            },
        );

        debug!(queue_id = %queue.id, task_id = %task.id, "Dispatching task");
        self.events.publish(QueueEvent::TaskStatusChanged {
            queue_id: task.queue_id.clone(),
            task_id: task.id.clone(),
            status: task.status,
            retry_count: task.retry_count,
            at: task.updated_at,
        });

        let this = Arc::clone(self);
        let queue = queue.clone();
        tokio::spawn(async move {
            let task_id = task.id.clone();
            this.run(queue, task, token).await;
            this.release(&task_id);
        });
    }

    async fn run(&self, queue: Queue, task: QueuedTask, token: CancelToken) {
        let Some(permit) = self.pools.acquire(&queue.id, queue.config.concurrency).await else {
            debug!(queue_id = %queue.id, task_id = %task.id, "Worker pool closed, dropping task");
            return;
        };

        let task_id = task.id.clone();
        let outcome = self.run_attempt(&task, token).await;

        if let Err(e) = self.finalize(&queue, task, &outcome).await {
            error!(
                queue_id = %queue.id,
                task_id = %task_id,
                error = %e,
                "Failed to record task outcome"
            );
            self.release_stranded(&queue, &task_id, e).await;
        }
        drop(permit);
    }

    /// Last resort when the outcome could not be written: record the attempt
    /// as failed so the task stops holding a processing slot
    async fn release_stranded(&self, queue: &Queue, task_id: &TaskId, cause: AppError) {
        let current = match self.task_repo.find_by_id(task_id).await {
            Ok(Some(task)) => task,
            Ok(None) => return,
            Err(e) => {
                error!(task_id = %task_id, error = %e, "Task stays processing until recovery");
                return;
            }
        };

        let fallback: std::result::Result<ExecutionOutput, ExecutionError> =
            Err(ExecutionError::Failed(format!(
                "outcome could not be recorded: {}",
                cause
            )));
        if let Err(e) = self.finalize(queue, current, &fallback).await {
            error!(task_id = %task_id, error = %e, "Task stays processing until recovery");
        }
    }

    /// One executor call, isolated on its own tokio task
    async fn run_attempt(
        &self,
        task: &QueuedTask,
        token: CancelToken,
    ) -> std::result::Result<ExecutionOutput, ExecutionError> {
        let executor = Arc::clone(&self.executor);
        let attempt = task.clone();
        let handle = tokio::spawn(async move { executor.execute(&attempt, token).await });
        let abort = handle.abort_handle();

        let joined = match self.execution_timeout {
            Some(limit) => match tokio::time::timeout(limit, handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    abort.abort();
                    warn!(task_id = %task.id, timeout_ms = %limit.as_millis(), "Task timed out");
                    return Err(ExecutionError::Timeout(limit.as_millis() as i64));
                }
            },
            None => handle.await,
        };

        match joined {
            Ok(result) => result,
            Err(join_err) if join_err.is_panic() => {
                let message = panic_message(join_err.into_panic());
                error!(task_id = %task.id, panic_msg = %message, "Task executor panicked");
                Err(ExecutionError::Panicked(message))
            }
            Err(join_err) => Err(ExecutionError::Failed(join_err.to_string())),
        }
    }

    /// Record the attempt outcome with a compare-and-swap loop
    async fn finalize(
        &self,
        queue: &Queue,
        reserved: QueuedTask,
        outcome: &std::result::Result<ExecutionOutput, ExecutionError>,
    ) -> Result<()> {
        let mut current = reserved;
        let mut last_error = None;

        for attempt in 0..MAX_CAS_ATTEMPTS {
            if current.status != TaskStatus::Processing {
                warn!(
                    task_id = %current.id,
                    status = %current.status,
                    "Task left processing before its attempt finished"
                );
                return Ok(());
            }

            let now = self.time_provider.now_millis();
            let mut next = current.clone();
            if next.cancel_requested {
                next.finish_cancelled(now)?;
            } else {
                match outcome {
                    Ok(output) => next.complete(now, output.output.clone())?,
                    Err(e) => {
                        self.retry_policy
                            .apply(&mut next, &queue.config, e.to_string(), now)?;
                    }
                }
            }

            match self.task_repo.update(&next).await {
                Ok(stored) => {
                    info!(
                        queue_id = %stored.queue_id,
                        task_id = %stored.id,
                        status = %stored.status,
                        retry_count = %stored.retry_count,
                        "Task attempt finished"
                    );
                    self.events.publish(QueueEvent::TaskStatusChanged {
                        queue_id: stored.queue_id.clone(),
                        task_id: stored.id.clone(),
                        status: stored.status,
                        retry_count: stored.retry_count,
                        at: now,
                    });
                    return Ok(());
                }
                Err(AppError::Conflict(_)) => {
                    current = match self.task_repo.find_by_id(&current.id).await? {
                        Some(task) => task,
                        None => return Ok(()),
                    };
                }
                Err(AppError::NotFound(_)) => {
                    debug!(task_id = %current.id, "Task deleted while running");
                    return Ok(());
                }
                Err(AppError::Database(message)) => {
                    // A stale version after an ambiguous write shows up as a conflict next time
                    let delay = finalize_backoff(attempt);
                    warn!(
                        task_id = %current.id,
                        attempt = %(attempt + 1),
                        delay_ms = %delay.as_millis(),
                        error = %message,
                        "Recording task outcome failed, retrying"
                    );
                    last_error = Some(message);
                    if attempt + 1 < MAX_CAS_ATTEMPTS {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        match last_error {
            Some(message) => Err(AppError::Database(message)),
            None => Err(AppError::Conflict(format!(
                "gave up recording outcome of task {} after {} attempts",
                current.id, MAX_CAS_ATTEMPTS
            ))),
        }
    }

    fn release(&self, task_id: &TaskId) {
        let mut in_flight = self.in_flight_map();
        in_flight.remove(task_id);
        if in_flight.is_empty() {
            self.idle.notify_waiters();
        }
    }

    /// Fire the cancel token of a running task. Returns false if the task
    /// is not running here.
    pub fn cancel_in_flight(&self, task_id: &TaskId) -> bool {
        match self.in_flight_map().get(task_id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel everything running for a queue and close its worker pool
    pub fn teardown(&self, queue_id: &QueueId) -> usize {
        let cancelled = {
            let in_flight = self.in_flight_map();
            let mut count = 0;
            for entry in in_flight.values().filter(|e| &e.queue_id == queue_id) {
                entry.cancel.cancel();
                count += 1;
            }
            count
        };
        self.pools.remove(queue_id);
        debug!(queue_id = %queue_id, cancelled = %cancelled, "Queue worker pool torn down");
        cancelled
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight_map().len()
    }

    /// Wait until no task is running
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Exponential backoff between outcome writes, capped
fn finalize_backoff(attempt: usize) -> Duration {
    let factor = 1u32 << attempt.min(10);
    FINALIZE_RETRY_BASE
        .saturating_mul(factor)
        .min(FINALIZE_RETRY_MAX)
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finalize_backoff_doubles_up_to_cap() {
        assert_eq!(finalize_backoff(0), FINALIZE_RETRY_BASE);
        assert_eq!(finalize_backoff(1), FINALIZE_RETRY_BASE * 2);
        assert_eq!(finalize_backoff(2), FINALIZE_RETRY_BASE * 4);
        assert_eq!(finalize_backoff(50), FINALIZE_RETRY_MAX);
    }

    #[test]
    fn test_panic_message_extracts_str_and_string() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new("bang".to_string())), "bang");
        assert_eq!(panic_message(Box::new(42_u8)), "Unknown panic");
    }
}

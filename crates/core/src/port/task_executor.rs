// Task Executor Port
// Abstraction for running one attempt of a queued task

use crate::domain::QueuedTask;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

/// Successful attempt
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionOutput {
    /// Stored verbatim on the task
    pub output: Option<serde_json::Value>,
    pub duration_ms: i64,
}

/// Execution errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),

    #[error("Process exited with code {code:?}: {stderr}")]
    NonZeroExit { code: Option<i32>, stderr: String },

    #[error("Execution timeout after {0}ms")]
    Timeout(i64),

    #[error("Execution cancelled")]
    Cancelled,

    #[error("Invalid task metadata: {0}")]
    InvalidMetadata(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Task panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Failed(String),
}

/// Receiving side of a cooperative cancellation signal
///
/// Executors poll [`CancelToken::is_cancelled`] or await
/// [`CancelToken::cancelled`] and stop early. Ignoring the token is allowed;
/// the engine then waits for the attempt to end on its own.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

/// Sending side, held by the dispatcher for every in-flight attempt
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

/// Create a linked handle/token pair
pub fn cancel_channel() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx: Arc::new(tx) }, CancelToken { rx })
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl CancelToken {
    /// Token that is never cancelled
    pub fn never() -> Self {
        let (_, token) = cancel_channel();
        token
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested. Never resolves if the
    /// handle is dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Task Executor trait
///
/// Implementations:
/// - SubprocessExecutor: spawns the command described by task metadata
/// - MockTaskExecutor: scripted behavior for tests
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Run one attempt of a task
    ///
    /// # Errors
    /// Any error counts as a failed attempt and goes through the retry policy.
    async fn execute(
        &self,
        task: &QueuedTask,
        cancel: CancelToken,
    ) -> Result<ExecutionOutput, ExecutionError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::domain::TaskId;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    /// Mock executor behavior
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Always succeed
        Success,
        /// Succeed with the given output
        SucceedWith(serde_json::Value),
        /// Always fail with message
        Fail(String),
        /// Fail the first N calls, then succeed
        FailTimes(usize, String),
        /// Panic with message (for panic isolation testing)
        Panic(String),
        /// Sleep, then succeed (ignores cancellation)
        Sleep(Duration),
        /// Block until `release` is called or the attempt is cancelled
        Gated,
        /// Block until the attempt is cancelled
        UntilCancelled,
    }

    /// Mock Task Executor for testing
    pub struct MockTaskExecutor {
        behavior: Mutex<MockBehavior>,
        call_count: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        executed: Mutex<Vec<TaskId>>,
        gate: Semaphore,
    }

    struct InFlightGuard<'a>(&'a AtomicUsize);

    impl Drop for InFlightGuard<'_> {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl MockTaskExecutor {
        pub fn new(behavior: MockBehavior) -> Self {
            Self {
                behavior: Mutex::new(behavior),
                call_count: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                executed: Mutex::new(Vec::new()),
                gate: Semaphore::new(0),
            }
        }

        pub fn new_success() -> Self {
            Self::new(MockBehavior::Success)
        }

        pub fn new_fail(message: impl Into<String>) -> Self {
            Self::new(MockBehavior::Fail(message.into()))
        }

        pub fn new_panic_inducing(message: impl Into<String>) -> Self {
            Self::new(MockBehavior::Panic(message.into()))
        }

        pub fn new_gated() -> Self {
            Self::new(MockBehavior::Gated)
        }

        pub fn set_behavior(&self, behavior: MockBehavior) {
            *self.behavior.lock().unwrap() = behavior;
        }

        /// Let `n` gated attempts finish
        pub fn release(&self, n: usize) {
            self.gate.add_permits(n);
        }

        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }

        pub fn in_flight(&self) -> usize {
            self.in_flight.load(Ordering::SeqCst)
        }

        /// Highest number of attempts observed running at the same time
        pub fn max_in_flight(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
        }

        /// Task IDs in the order their attempts started
        pub fn executed(&self) -> Vec<TaskId> {
            self.executed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TaskExecutor for MockTaskExecutor {
        async fn execute(
            &self,
            task: &QueuedTask,
            cancel: CancelToken,
        ) -> Result<ExecutionOutput, ExecutionError> {
            let call = self.call_count.fetch_add(1, Ordering::SeqCst);
            self.executed.lock().unwrap().push(task.id.clone());

            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(running, Ordering::SeqCst);
            let _guard = InFlightGuard(&self.in_flight);

            let behavior = self.behavior.lock().unwrap().clone();

            match behavior {
                MockBehavior::Success => Ok(ExecutionOutput {
                    output: Some(serde_json::json!({ "task": task.id })),
                    duration_ms: 1,
                }),
                MockBehavior::SucceedWith(value) => Ok(ExecutionOutput {
                    output: Some(value),
                    duration_ms: 1,
                }),
                MockBehavior::Fail(msg) => Err(ExecutionError::Failed(msg)),
                MockBehavior::FailTimes(n, msg) => {
                    if call < n {
                        Err(ExecutionError::Failed(msg))
                    } else {
                        Ok(ExecutionOutput::default())
                    }
                }
                MockBehavior::Panic(msg) => {
                    panic!("{}", msg); // Actually panic for panic isolation testing
                }
                MockBehavior::Sleep(duration) => {
                    tokio::time::sleep(duration).await;
                    Ok(ExecutionOutput::default())
                }
                MockBehavior::Gated => {
                    tokio::select! {
                        permit = self.gate.acquire() => {
                            if let Ok(permit) = permit {
                                permit.forget();
                            }
                            Ok(ExecutionOutput::default())
                        }
                        _ = cancel.cancelled() => Err(ExecutionError::Cancelled),
                    }
                }
                MockBehavior::UntilCancelled => {
                    cancel.cancelled().await;
                    Err(ExecutionError::Cancelled)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mocks::{MockBehavior, MockTaskExecutor};
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_token_resolves_after_cancel() {
        let (handle, token) = cancel_channel();
        assert!(!token.is_cancelled());

        handle.cancel();
        assert!(token.is_cancelled());
        tokio::time::timeout(Duration::from_millis(100), token.cancelled())
            .await
            .expect("token should resolve");
    }

    #[tokio::test]
    async fn test_never_token_stays_pending() {
        let token = CancelToken::never();
        let result = tokio::time::timeout(Duration::from_millis(20), token.cancelled()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_mock_fail_times_then_succeeds() {
        let executor = MockTaskExecutor::new(MockBehavior::FailTimes(1, "flaky".to_string()));
        let task = QueuedTask::new_test("q-1", "t");

        assert!(executor.execute(&task, CancelToken::never()).await.is_err());
        assert!(executor.execute(&task, CancelToken::never()).await.is_ok());
        assert_eq!(executor.call_count(), 2);
        assert_eq!(executor.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_mock_gated_observes_cancellation() {
        let executor = MockTaskExecutor::new_gated();
        let task = QueuedTask::new_test("q-1", "t");
        let (handle, token) = cancel_channel();
        handle.cancel();

        let result = executor.execute(&task, token).await;
        assert_eq!(result, Err(ExecutionError::Cancelled));
    }
}

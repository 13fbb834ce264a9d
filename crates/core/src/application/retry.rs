// Retry logic
use crate::domain::{QueueConfig, QueuedTask};
use tracing::{info, warn};

/// Retry decision result
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Back to pending, eligible again at `at` (epoch ms)
    Retry { at: i64 },
    /// Retry limit reached, task fails permanently
    Exhausted,
}

/// Fixed-delay retry policy driven by the owning queue's configuration
///
/// A failed attempt is retried while `retry_count < retry_limit`. The
/// retry becomes eligible `retry_delay_ms` after the failure.
#[derive(Debug, Default, Clone, Copy)]
pub struct RetryPolicy;

impl RetryPolicy {
    pub fn new() -> Self {
        Self
    }

    /// Decide what happens to a task whose attempt just failed
    pub fn decide(&self, task: &QueuedTask, queue: &QueueConfig, now_millis: i64) -> RetryDecision {
        if task.retry_count >= queue.retry_limit {
            warn!(
                task_id = %task.id,
                retry_count = %task.retry_count,
                retry_limit = %queue.retry_limit,
                "Retry limit reached"
            );
            return RetryDecision::Exhausted;
        }

        let at = now_millis + queue.retry_delay_ms.max(0);
        info!(
            task_id = %task.id,
            retry_count = %task.retry_count,
            retry_limit = %queue.retry_limit,
            retry_at = %at,
            "Scheduling retry"
        );
        RetryDecision::Retry { at }
    }

    /// Apply the decision to a processing task
    pub fn apply(
        &self,
        task: &mut QueuedTask,
        queue: &QueueConfig,
        error: String,
        now_millis: i64,
    ) -> crate::domain::error::Result<RetryDecision> {
        let decision = self.decide(task, queue, now_millis);
        match decision {
            RetryDecision::Retry { at } => task.schedule_retry(now_millis, at, error)?,
            RetryDecision::Exhausted => task.fail(now_millis, error)?,
        }
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskStatus;

    fn failing_task() -> QueuedTask {
        let mut task = QueuedTask::new_test("q-1", "job");
        task.status = TaskStatus::Processing;
        task.started_at = Some(1);
        task
    }

    #[test]
    fn test_retries_until_limit() {
        let policy = RetryPolicy::new();
        let config = QueueConfig::new("q", 1).with_retry(2, 500);
        let mut task = failing_task();

        assert_eq!(
            policy.apply(&mut task, &config, "e1".into(), 1_000).unwrap(),
            RetryDecision::Retry { at: 1_500 }
        );
        assert_eq!(task.retry_count, 1);

        task.status = TaskStatus::Processing;
        policy.apply(&mut task, &config, "e2".into(), 2_000).unwrap();
        assert_eq!(task.retry_count, 2);

        task.status = TaskStatus::Processing;
        assert_eq!(
            policy.apply(&mut task, &config, "e3".into(), 3_000).unwrap(),
            RetryDecision::Exhausted
        );
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.retry_count, 2);
        assert_eq!(task.error.as_deref(), Some("e3"));
    }

    #[test]
    fn test_zero_limit_fails_immediately() {
        let policy = RetryPolicy::new();
        let config = QueueConfig::new("q", 1);
        let task = failing_task();
        assert_eq!(policy.decide(&task, &config, 0), RetryDecision::Exhausted);
    }

    #[test]
    fn test_zero_delay_is_due_immediately() {
        let policy = RetryPolicy::new();
        let config = QueueConfig::new("q", 1).with_retry(1, 0);
        let mut task = failing_task();
        policy.apply(&mut task, &config, "boom".into(), 7_000).unwrap();
        assert!(task.is_due(7_000));
    }
}

// Crash recovery logic
use crate::domain::TaskStatus;
use crate::error::{AppError, Result};
use crate::port::{TaskRepository, TimeProvider};
use std::sync::Arc;
use tracing::{info, warn};

/// Crash recovery service
///
/// On daemon startup, no attempt can be running yet, so every task still in
/// `processing` was orphaned by the previous process. Those tasks go back to
/// `pending` with their retry count untouched, except tasks whose cancellation
/// was already accepted: those end as `cancelled`.
pub struct RecoveryService {
    task_repo: Arc<dyn TaskRepository>,
    time_provider: Arc<dyn TimeProvider>,
}

impl RecoveryService {
    pub fn new(task_repo: Arc<dyn TaskRepository>, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            task_repo,
            time_provider,
        }
    }

    /// Requeue orphaned tasks. Must run before the scheduler starts.
    ///
    /// # Returns
    /// Number of tasks recovered, requeued and cancelled alike
    pub async fn recover_orphaned_tasks(&self) -> Result<usize> {
        let orphans = self.task_repo.find_by_status(TaskStatus::Processing).await?;
        info!(found = %orphans.len(), "Starting orphaned task recovery");

        let mut recovered = 0;
        for mut task in orphans {
            let now = self.time_provider.now_millis();
            if task.cancel_requested {
                task.finish_cancelled(now)?;
            } else {
                task.requeue_orphan(now)?;
            }

            match self.task_repo.update(&task).await {
                Ok(stored) => {
                    info!(
                        queue_id = %stored.queue_id,
                        task_id = %stored.id,
                        status = %stored.status,
                        "Orphaned task recovered"
                    );
                    recovered += 1;
                }
                Err(AppError::Conflict(_)) | Err(AppError::NotFound(_)) => {
                    warn!(task_id = %task.id, "Orphaned task changed during recovery, skipping");
                }
                Err(e) => return Err(e),
            }
        }

        info!(recovered_count = %recovered, "Orphaned task recovery complete");
        Ok(recovered)
    }
}

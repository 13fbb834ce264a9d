// Queue Manager - public façade over the registry, task store and scheduler

use crate::application::config::EngineConfig;
use crate::application::constants::MAX_CAS_ATTEMPTS;
use crate::application::cron::CronTrigger;
use crate::application::dispatcher::Dispatcher;
use crate::application::events::{EventBus, QueueEvent};
use crate::application::scheduler::Scheduler;
use crate::domain::{
    CancelOutcome, NewTask, Queue, QueueConfig, QueueId, QueueSummary, QueuedTask, TaskId,
};
use crate::error::{AppError, Result};
use crate::port::{IdProvider, QueueRepository, TaskExecutor, TaskRepository, TimeProvider};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

pub struct QueueManager {
    queue_repo: Arc<dyn QueueRepository>,
    task_repo: Arc<dyn TaskRepository>,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
    events: EventBus,
    dispatcher: Arc<Dispatcher>,
    scheduler: Arc<Scheduler>,
}

impl QueueManager {
    /// Wire the engine together
    ///
    /// # Example
    /// ```ignore
    /// let manager = QueueManager::new(
    ///     queue_repo,
    ///     task_repo,
    ///     Arc::new(SubprocessExecutor::new()),
    ///     Arc::new(UuidProvider),
    ///     Arc::new(SystemTimeProvider),
    ///     EngineConfig::default(),
    /// );
    /// tokio::spawn(async move { manager.scheduler().run(shutdown_token).await });
    /// ```
    pub fn new(
        queue_repo: Arc<dyn QueueRepository>,
        task_repo: Arc<dyn TaskRepository>,
        executor: Arc<dyn TaskExecutor>,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
        config: EngineConfig,
    ) -> Self {
        let events = EventBus::new(config.event_capacity);
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&task_repo),
            executor,
            Arc::clone(&time_provider),
            events.clone(),
            config.execution_timeout(),
        ));
        let cron = CronTrigger::new(
            Arc::clone(&queue_repo),
            Arc::clone(&id_provider),
            events.clone(),
        );
        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&queue_repo),
            Arc::clone(&task_repo),
            Arc::clone(&dispatcher),
            cron,
            Arc::clone(&time_provider),
            config.tick_interval(),
            config.global_concurrency,
        ));

        Self {
            queue_repo,
            task_repo,
            id_provider,
            time_provider,
            events,
            dispatcher,
            scheduler,
        }
    }

    pub fn scheduler(&self) -> Arc<Scheduler> {
        Arc::clone(&self.scheduler)
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    // ------------------------------------------------------------------
    // Queues
    // ------------------------------------------------------------------

    pub async fn create_queue(&self, config: QueueConfig, is_active: bool) -> Result<QueueSummary> {
        config.validate()?;

        let now = self.time_provider.now_millis();
        let queue = Queue::new(self.id_provider.generate_id(), now, config, is_active);
        self.queue_repo.insert(&queue).await?;

        info!(
            queue_id = %queue.id,
            name = %queue.config.name,
            concurrency = %queue.config.concurrency,
            cron = ?queue.config.cron_expression,
            "Queue created"
        );
        self.events.publish(QueueEvent::QueueCreated {
            queue_id: queue.id.clone(),
            at: now,
        });

        Ok(QueueSummary::new(queue, Default::default()))
    }

    async fn load_queue(&self, id: &QueueId) -> Result<Queue> {
        self.queue_repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("queue {}", id)))
    }

    async fn summarize(&self, queue: Queue) -> Result<QueueSummary> {
        let counts = self.task_repo.counts(&queue.id).await?;
        Ok(QueueSummary::new(queue, counts))
    }

    pub async fn get_queue(&self, id: &QueueId) -> Result<QueueSummary> {
        let queue = self.load_queue(id).await?;
        self.summarize(queue).await
    }

    pub async fn list_queues(&self) -> Result<Vec<QueueSummary>> {
        let queues = self.queue_repo.list().await?;
        let mut summaries = Vec::with_capacity(queues.len());
        for queue in queues {
            summaries.push(self.summarize(queue).await?);
        }
        Ok(summaries)
    }

    async fn set_flags(&self, id: &QueueId, is_active: bool, completed: bool) -> Result<QueueSummary> {
        let now = self.time_provider.now_millis();
        let queue = self
            .queue_repo
            .set_flags(id, is_active, completed, now)
            .await?;
        self.announce(queue, now).await
    }

    async fn announce(&self, queue: Queue, now: i64) -> Result<QueueSummary> {
        info!(queue_id = %queue.id, status = %queue.status(), "Queue status changed");
        self.events.publish(QueueEvent::QueueUpdated {
            queue_id: queue.id.clone(),
            status: queue.status(),
            is_active: queue.is_active,
            at: now,
        });
        self.summarize(queue).await
    }

    /// Admit the queue to scheduling. Reopens a completed queue.
    pub async fn activate_queue(&self, id: &QueueId) -> Result<QueueSummary> {
        self.load_queue(id).await?;
        self.set_flags(id, true, false).await
    }

    /// Stop dispatching new tasks; running ones finish normally
    pub async fn deactivate_queue(&self, id: &QueueId) -> Result<QueueSummary> {
        let queue = self.load_queue(id).await?;
        self.set_flags(id, false, queue.completed).await
    }

    /// Report the queue completed. Only allowed without pending or processing
    /// work; the check and the write are one statement in the store.
    pub async fn complete_queue(&self, id: &QueueId) -> Result<QueueSummary> {
        let now = self.time_provider.now_millis();
        let queue = self.queue_repo.mark_completed(id, now).await?;
        self.announce(queue, now).await
    }

    /// Run a scheduling cycle for this queue right now. Returns the number
    /// of tasks dispatched.
    pub async fn execute_queue_now(&self, id: &QueueId) -> Result<usize> {
        let queue = self.load_queue(id).await?;
        if !queue.is_dispatchable() {
            return Err(AppError::InvalidState(format!(
                "queue {} is {}",
                id,
                queue.status()
            )));
        }

        let dispatched = self.scheduler.run_queue_now(&queue).await?;
        info!(queue_id = %id, dispatched = %dispatched, "Queue executed on demand");
        Ok(dispatched)
    }

    /// Delete the queue and all of its tasks. Running attempts are told to
    /// cancel and the queue's worker pool is closed.
    pub async fn delete_queue(&self, id: &QueueId) -> Result<u64> {
        let _cycle = self.scheduler.lock_cycle().await;

        let removed = self.queue_repo.delete(id).await?;
        let cancelled = self.dispatcher.teardown(id);

        info!(
            queue_id = %id,
            tasks_removed = %removed,
            cancelled_in_flight = %cancelled,
            "Queue deleted"
        );
        self.events.publish(QueueEvent::QueueDeleted {
            queue_id: id.clone(),
            tasks_removed: removed,
            at: self.time_provider.now_millis(),
        });
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Tasks
    // ------------------------------------------------------------------

    pub async fn enqueue_task(&self, queue_id: &QueueId, request: NewTask) -> Result<QueuedTask> {
        if request.title.trim().is_empty() {
            return Err(AppError::Validation("task title cannot be empty".to_string()));
        }

        let queue = self.load_queue(queue_id).await?;
        if queue.completed {
            return Err(AppError::InvalidState(format!(
                "queue {} is completed; activate it before enqueueing",
                queue_id
            )));
        }

        let now = self.time_provider.now_millis();
        let metadata = if request.metadata.is_null() {
            serde_json::json!({})
        } else {
            request.metadata
        };
        let mut task = QueuedTask::new(
            self.id_provider.generate_id(),
            now,
            queue_id.clone(),
            request.title,
            metadata,
        );
        task.description = request.description;
        task.priority = request.priority;
        task.scheduled_for = request.scheduled_for;

        // The queue may have been completed or deleted since it was loaded
        if !self.task_repo.insert_if_open(&task).await? {
            return Err(AppError::InvalidState(format!(
                "queue {} no longer accepts tasks",
                queue_id
            )));
        }

        info!(
            queue_id = %queue_id,
            task_id = %task.id,
            priority = %task.priority,
            "Task enqueued"
        );
        self.events.publish(QueueEvent::TaskEnqueued {
            queue_id: queue_id.clone(),
            task_id: task.id.clone(),
            at: now,
        });
        Ok(task)
    }

    pub async fn get_task(&self, queue_id: &QueueId, task_id: &TaskId) -> Result<QueuedTask> {
        self.task_repo
            .find_by_id(task_id)
            .await?
            .filter(|task| &task.queue_id == queue_id)
            .ok_or_else(|| AppError::NotFound(format!("task {} in queue {}", task_id, queue_id)))
    }

    /// Tasks of a queue in dispatch order. Unknown queues yield an empty list.
    pub async fn list_tasks(&self, queue_id: &QueueId) -> Result<Vec<QueuedTask>> {
        self.task_repo.list_by_queue(queue_id).await
    }

    /// Manually re-run a failed task, regardless of its retry count
    pub async fn retry_task(&self, queue_id: &QueueId, task_id: &TaskId) -> Result<QueuedTask> {
        let (task, ()) = self
            .mutate_task(queue_id, task_id, |task, now| task.manual_retry(now))
            .await?;

        info!(queue_id = %queue_id, task_id = %task_id, "Task manually retried");
        self.publish_status(&task);
        Ok(task)
    }

    /// Cancel a pending task, or ask a processing one to stop
    pub async fn cancel_task(&self, queue_id: &QueueId, task_id: &TaskId) -> Result<QueuedTask> {
        let (task, outcome) = self
            .mutate_task(queue_id, task_id, |task, now| task.request_cancel(now))
            .await?;

        match outcome {
            CancelOutcome::Cancelled => {
                info!(queue_id = %queue_id, task_id = %task_id, "Task cancelled");
                self.publish_status(&task);
            }
            CancelOutcome::Requested => {
                let signalled = self.dispatcher.cancel_in_flight(task_id);
                info!(
                    queue_id = %queue_id,
                    task_id = %task_id,
                    signalled = %signalled,
                    "Cancellation requested for running task"
                );
                self.events.publish(QueueEvent::TaskCancelRequested {
                    queue_id: task.queue_id.clone(),
                    task_id: task.id.clone(),
                    at: task.updated_at,
                });
            }
        }
        Ok(task)
    }

    /// Read-modify-write with optimistic retry on version conflicts
    async fn mutate_task<T, F>(
        &self,
        queue_id: &QueueId,
        task_id: &TaskId,
        mutate: F,
    ) -> Result<(QueuedTask, T)>
    where
        F: Fn(&mut QueuedTask, i64) -> crate::domain::error::Result<T> + Send + Sync,
        T: Send,
    {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let mut task = self.get_task(queue_id, task_id).await?;
            let value = mutate(&mut task, self.time_provider.now_millis())?;

            match self.task_repo.update(&task).await {
                Ok(stored) => return Ok((stored, value)),
                Err(AppError::Conflict(_)) => {
                    warn!(task_id = %task_id, attempt = %attempt, "Concurrent task update, re-reading");
                }
                Err(e) => return Err(e),
            }
        }

        Err(AppError::Conflict(format!(
            "task {} kept changing during update",
            task_id
        )))
    }

    fn publish_status(&self, task: &QueuedTask) {
        self.events.publish(QueueEvent::TaskStatusChanged {
            queue_id: task.queue_id.clone(),
            task_id: task.id.clone(),
            status: task.status,
            retry_count: task.retry_count,
            at: task.updated_at,
        });
    }
}

//! Scheduler - periodic selection cycle
//!
//! Each tick:
//! - evaluates cron triggers of active queues
//! - walks active queues by priority and reserves due tasks up to each
//!   queue's free slots (and the optional global budget)
//! - hands reserved tasks to the Dispatcher in dispatch order

use crate::application::cron::CronTrigger;
use crate::application::dispatcher::Dispatcher;
use crate::application::shutdown::ShutdownToken;
use crate::domain::Queue;
use crate::error::Result;
use crate::port::{QueueRepository, TaskRepository, TimeProvider};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// What one scheduling cycle did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub cron_fired: usize,
    pub dispatched: usize,
}

pub struct Scheduler {
    queue_repo: Arc<dyn QueueRepository>,
    task_repo: Arc<dyn TaskRepository>,
    dispatcher: Arc<Dispatcher>,
    cron: CronTrigger,
    time_provider: Arc<dyn TimeProvider>,
    tick_interval: Duration,
    global_concurrency: Option<u32>,
    cycle_lock: Mutex<()>,
}

impl Scheduler {
    pub fn new(
        queue_repo: Arc<dyn QueueRepository>,
        task_repo: Arc<dyn TaskRepository>,
        dispatcher: Arc<Dispatcher>,
        cron: CronTrigger,
        time_provider: Arc<dyn TimeProvider>,
        tick_interval: Duration,
        global_concurrency: Option<u32>,
    ) -> Self {
        Self {
            queue_repo,
            task_repo,
            dispatcher,
            cron,
            time_provider,
            tick_interval,
            global_concurrency,
            cycle_lock: Mutex::new(()),
        }
    }

    /// Run cycles until shutdown. Cycle errors are logged, never fatal.
    pub async fn run(&self, mut shutdown: ShutdownToken) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            tick_interval_ms = %self.tick_interval.as_millis(),
            global_concurrency = ?self.global_concurrency,
            "Scheduler started"
        );

        while !shutdown.is_shutdown() {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = ticker.tick() => {
                    match self.run_cycle().await {
                        Ok(report) if report != CycleReport::default() => {
                            debug!(
                                cron_fired = %report.cron_fired,
                                dispatched = %report.dispatched,
                                "Scheduler cycle"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "Scheduler cycle failed"),
                    }
                }
            }
        }

        info!("Scheduler stopped");
    }

    /// Serializes cycles with queue deletion so a deleted queue never gets
    /// a fresh dispatch
    pub async fn lock_cycle(&self) -> MutexGuard<'_, ()> {
        self.cycle_lock.lock().await
    }

    /// One full cycle over every queue
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let _guard = self.lock_cycle().await;
        let now = self.time_provider.now_millis();

        let queues = self.queue_repo.list().await?;
        let cron_fired = self.cron.evaluate(&queues, now).await;

        let mut budget = self.remaining_budget().await?;
        let mut dispatched = 0;

        for queue in queues.iter().filter(|q| q.is_dispatchable()) {
            let max = match budget {
                Some(0) => break,
                Some(left) => left.min(queue.config.concurrency),
                None => queue.config.concurrency,
            };

            match self.dispatch_queue(queue, now, max).await {
                Ok(n) => {
                    dispatched += n;
                    if let Some(left) = budget.as_mut() {
                        *left = left.saturating_sub(n as u32);
                    }
                }
                Err(e) => {
                    error!(queue_id = %queue.id, error = %e, "Queue cycle failed, skipping");
                }
            }
        }

        Ok(CycleReport {
            cron_fired,
            dispatched,
        })
    }

    /// Immediate cycle for a single queue, ignoring cron state
    pub async fn run_queue_now(&self, queue: &Queue) -> Result<usize> {
        let _guard = self.lock_cycle().await;
        let now = self.time_provider.now_millis();

        let max = match self.remaining_budget().await? {
            Some(left) => left.min(queue.config.concurrency),
            None => queue.config.concurrency,
        };
        if max == 0 {
            return Ok(0);
        }
        self.dispatch_queue(queue, now, max).await
    }

    async fn remaining_budget(&self) -> Result<Option<u32>> {
        match self.global_concurrency {
            Some(limit) => {
                let processing = self.task_repo.count_processing_total().await?;
                Ok(Some((i64::from(limit) - processing).max(0) as u32))
            }
            None => Ok(None),
        }
    }

    async fn dispatch_queue(&self, queue: &Queue, now_millis: i64, max: u32) -> Result<usize> {
        let reserved = self.task_repo.reserve_due(&queue.id, now_millis, max).await?;
        let count = reserved.len();

        if count > 0 {
            info!(queue_id = %queue.id, reserved = %count, "Reserved tasks for dispatch");
        }
        for task in reserved {
            self.dispatcher.dispatch(queue, task);
        }
        Ok(count)
    }
}

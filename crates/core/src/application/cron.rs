// Cron trigger: turns due cron schedules into tasks

use crate::application::constants::SCHEDULED_TITLE_SUFFIX;
use crate::application::events::{EventBus, QueueEvent};
use crate::domain::{parse_cron, Queue, QueuedTask};
use crate::error::{AppError, Result};
use crate::port::{IdProvider, QueueRepository};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info};

/// First fire time strictly after `after_millis`, if the schedule has one
pub fn next_fire_after(expression: &str, after_millis: i64) -> Result<Option<i64>> {
    let schedule = parse_cron(expression)?;
    let after: DateTime<Utc> = DateTime::from_timestamp_millis(after_millis).ok_or_else(|| {
        AppError::Validation(format!("timestamp out of range: {}", after_millis))
    })?;
    Ok(schedule.after(&after).next().map(|at| at.timestamp_millis()))
}

/// Evaluates the cron expressions of active queues once per scheduler tick
///
/// Missed intervals collapse into a single catch-up fire: the anchor for
/// the next evaluation is the time the trigger last fired, not the slot it
/// fired for.
pub struct CronTrigger {
    queue_repo: Arc<dyn QueueRepository>,
    id_provider: Arc<dyn IdProvider>,
    events: EventBus,
}

impl CronTrigger {
    pub fn new(
        queue_repo: Arc<dyn QueueRepository>,
        id_provider: Arc<dyn IdProvider>,
        events: EventBus,
    ) -> Self {
        Self {
            queue_repo,
            id_provider,
            events,
        }
    }

    /// Evaluate every queue; failures are logged per queue and skipped
    pub async fn evaluate(&self, queues: &[Queue], now_millis: i64) -> usize {
        let mut fired = 0;
        for queue in queues {
            match self.evaluate_queue(queue, now_millis).await {
                Ok(Some(_)) => fired += 1,
                Ok(None) => {}
                Err(e) => {
                    error!(queue_id = %queue.id, error = %e, "Cron evaluation failed");
                }
            }
        }
        fired
    }

    /// Fire the queue's schedule if it is due, returning the created task
    pub async fn evaluate_queue(&self, queue: &Queue, now_millis: i64) -> Result<Option<QueuedTask>> {
        if !queue.is_dispatchable() {
            return Ok(None);
        }
        let Some(expression) = queue.config.cron_expression.as_deref() else {
            return Ok(None);
        };

        let anchor = queue.last_fired_at.unwrap_or(queue.created_at);
        let due = match next_fire_after(expression, anchor)? {
            Some(next) => next <= now_millis,
            None => false,
        };
        if !due {
            return Ok(None);
        }

        let task = self.scheduled_task(queue, now_millis);
        if !self
            .queue_repo
            .record_fire(&queue.id, queue.last_fired_at, now_millis, &task)
            .await?
        {
            debug!(queue_id = %queue.id, "Cron fire already claimed");
            return Ok(None);
        }

        info!(
            queue_id = %queue.id,
            task_id = %task.id,
            cron = %expression,
            "Cron trigger fired"
        );
        self.events.publish(QueueEvent::TaskEnqueued {
            queue_id: queue.id.clone(),
            task_id: task.id.clone(),
            at: now_millis,
        });

        Ok(Some(task))
    }

    fn scheduled_task(&self, queue: &Queue, now_millis: i64) -> QueuedTask {
        let id = self.id_provider.generate_id();
        let mut task = match &queue.config.cron_template {
            Some(template) => {
                let mut task = QueuedTask::new(
                    id,
                    now_millis,
                    queue.id.clone(),
                    template.title.clone(),
                    template.metadata.clone(),
                );
                task.description = template.description.clone();
                task.priority = template.priority;
                task
            }
            None => QueuedTask::new(
                id,
                now_millis,
                queue.id.clone(),
                format!("{} {}", queue.config.name, SCHEDULED_TITLE_SUFFIX),
                serde_json::json!({}),
            ),
        };
        if task.metadata.is_null() {
            task.metadata = serde_json::json!({});
        }
        task.scheduled_for = Some(now_millis);
        task
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn millis(h: u32, m: u32, s: u32) -> i64 {
        Utc.with_ymd_and_hms(2024, 1, 1, h, m, s)
            .unwrap()
            .timestamp_millis()
    }

    #[test]
    fn test_next_fire_is_strictly_after_anchor() {
        let next = next_fire_after("*/5 * * * *", millis(10, 0, 0)).unwrap();
        assert_eq!(next, Some(millis(10, 5, 0)));
    }

    #[test]
    fn test_next_fire_with_seconds_field() {
        let next = next_fire_after("30 * * * * *", millis(10, 0, 0)).unwrap();
        assert_eq!(next, Some(millis(10, 0, 30)));
    }

    #[test]
    fn test_invalid_expression_is_config_error() {
        assert!(matches!(
            next_fire_after("not a cron", 0),
            Err(AppError::Config(_))
        ));
    }
}

// Queue Domain Model

use crate::domain::error::{DomainError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Queue identifier (UUID v4)
pub type QueueId = String;

/// Reported queue status (derived, never set directly)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Active,
    Paused,
    Completed,
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueStatus::Active => write!(f, "active"),
            QueueStatus::Paused => write!(f, "paused"),
            QueueStatus::Completed => write!(f, "completed"),
        }
    }
}

/// Task created by the cron trigger each time a scheduled queue fires
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTemplate {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Client-supplied queue configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Max tasks of this queue in `processing` at once
    pub concurrency: u32,
    #[serde(default)]
    pub retry_limit: u32,
    #[serde(default)]
    pub retry_delay_ms: i64,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub cron_expression: Option<String>,
    #[serde(default)]
    pub cron_template: Option<TaskTemplate>,
}

impl QueueConfig {
    pub fn new(name: impl Into<String>, concurrency: u32) -> Self {
        Self {
            name: name.into(),
            description: None,
            concurrency,
            retry_limit: 0,
            retry_delay_ms: 0,
            priority: 0,
            cron_expression: None,
            cron_template: None,
        }
    }

    pub fn with_retry(mut self, retry_limit: u32, retry_delay_ms: i64) -> Self {
        self.retry_limit = retry_limit;
        self.retry_delay_ms = retry_delay_ms;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_cron(mut self, expression: impl Into<String>) -> Self {
        self.cron_expression = Some(expression.into());
        self
    }

    /// Reject configurations the engine cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::InvalidConfig(
                "queue name cannot be empty".to_string(),
            ));
        }
        if self.concurrency == 0 {
            return Err(DomainError::InvalidConfig(
                "concurrency must be a positive integer".to_string(),
            ));
        }
        if self.retry_delay_ms < 0 {
            return Err(DomainError::InvalidConfig(format!(
                "retry delay must be non-negative, got {}ms",
                self.retry_delay_ms
            )));
        }
        if let Some(expr) = &self.cron_expression {
            parse_cron(expr)?;
        }
        Ok(())
    }
}

/// Parse a cron expression.
///
/// Accepts classic 5-field expressions (`min hour dom month dow`) as well as
/// the 6/7-field form with a leading seconds column. 5-field input fires at
/// second 0.
pub fn parse_cron(expr: &str) -> Result<cron::Schedule> {
    let fields = expr.split_whitespace().count();
    let normalized = match fields {
        5 => format!("0 {}", expr.trim()),
        6 | 7 => expr.trim().to_string(),
        n => {
            return Err(DomainError::InvalidCron {
                expr: expr.to_string(),
                reason: format!("expected 5, 6 or 7 fields, got {}", n),
            })
        }
    };

    cron::Schedule::from_str(&normalized).map_err(|e| DomainError::InvalidCron {
        expr: expr.to_string(),
        reason: e.to_string(),
    })
}

/// Queue Entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Queue {
    pub id: QueueId,
    #[serde(flatten)]
    pub config: QueueConfig,

    /// Admission gate: the scheduler ignores inactive queues
    pub is_active: bool,
    /// Set only by an explicit completion report
    pub completed: bool,
    /// Last cron fire (epoch ms)
    pub last_fired_at: Option<i64>,

    pub created_at: i64, // epoch ms
    pub updated_at: i64,
}

impl Queue {
    /// Create a new queue with injected ID and timestamp
    pub fn new(id: impl Into<String>, created_at: i64, config: QueueConfig, is_active: bool) -> Self {
        Self {
            id: id.into(),
            config,
            is_active,
            completed: false,
            last_fired_at: None,
            created_at,
            updated_at: created_at,
        }
    }

    pub fn status(&self) -> QueueStatus {
        if self.completed {
            QueueStatus::Completed
        } else if self.is_active {
            QueueStatus::Active
        } else {
            QueueStatus::Paused
        }
    }

    pub fn is_dispatchable(&self) -> bool {
        self.is_active && !self.completed
    }
}

/// Live task counts for one queue (always read from the task store)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
}

impl QueueCounts {
    pub fn total(&self) -> i64 {
        self.pending + self.processing + self.completed + self.failed + self.cancelled
    }
}

/// Queue as reported to clients: entity + derived status + live counts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSummary {
    #[serde(flatten)]
    pub queue: Queue,
    pub status: QueueStatus,
    pub counts: QueueCounts,
}

impl QueueSummary {
    pub fn new(queue: Queue, counts: QueueCounts) -> Self {
        let status = queue.status();
        Self {
            queue,
            status,
            counts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_is_derived() {
        let mut queue = Queue::new("q-1", 1000, QueueConfig::new("emails", 2), false);
        assert_eq!(queue.status(), QueueStatus::Paused);

        queue.is_active = true;
        assert_eq!(queue.status(), QueueStatus::Active);

        queue.completed = true;
        assert_eq!(queue.status(), QueueStatus::Completed);
        assert!(!queue.is_dispatchable());
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let err = QueueConfig::new("emails", 0).validate().unwrap_err();
        assert!(err.to_string().contains("concurrency"));
    }

    #[test]
    fn test_validate_rejects_empty_name() {
        assert!(QueueConfig::new("   ", 1).validate().is_err());
    }

    #[test]
    fn test_validate_rejects_negative_delay() {
        let config = QueueConfig::new("emails", 1).with_retry(3, -5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_cron_accepts_five_and_six_fields() {
        assert!(parse_cron("*/5 * * * *").is_ok());
        assert!(parse_cron("0 */5 * * * *").is_ok());
    }

    #[test]
    fn test_parse_cron_rejects_garbage() {
        assert!(matches!(
            parse_cron("every tuesday"),
            Err(DomainError::InvalidCron { .. })
        ));
        assert!(matches!(
            parse_cron("61 * * * *"),
            Err(DomainError::InvalidCron { .. })
        ));
    }

    #[test]
    fn test_summary_serializes_flat() {
        let queue = Queue::new("q-1", 1000, QueueConfig::new("emails", 2), true);
        let summary = QueueSummary::new(queue, QueueCounts::default());
        let value = serde_json::to_value(&summary).unwrap();

        assert_eq!(value["name"], "emails");
        assert_eq!(value["concurrency"], 2);
        assert_eq!(value["status"], "active");
        assert_eq!(value["counts"]["pending"], 0);
    }
}

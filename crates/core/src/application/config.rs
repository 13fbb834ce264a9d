// Engine configuration

use super::constants::{DEFAULT_EVENT_CAPACITY, DEFAULT_TICK_INTERVAL_MS};
use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for the scheduler, dispatcher and event bus
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Scheduler cycle period
    pub tick_interval_ms: u64,
    /// Per-attempt execution limit; a timeout counts as a failed attempt
    pub execution_timeout_ms: Option<u64>,
    /// Cap on `processing` tasks across all queues (None = queues are independent)
    pub global_concurrency: Option<u32>,
    /// Broadcast buffer per event subscriber
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            execution_timeout_ms: None,
            global_concurrency: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_ms == 0 {
            return Err(AppError::Config(
                "tick_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(AppError::Config(
                "event_capacity must be greater than 0".to_string(),
            ));
        }
        if self.global_concurrency == Some(0) {
            return Err(AppError::Config(
                "global_concurrency must be greater than 0 when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn execution_timeout(&self) -> Option<Duration> {
        self.execution_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tick_interval(), Duration::from_secs(1));
        assert_eq!(config.execution_timeout(), None);
    }

    #[test]
    fn test_partial_toml_like_input_fills_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"global_concurrency": 4}"#).unwrap();
        assert_eq!(config.global_concurrency, Some(4));
        assert_eq!(config.event_capacity, DEFAULT_EVENT_CAPACITY);
    }

    #[test]
    fn test_zero_values_rejected() {
        let config = EngineConfig {
            tick_interval_ms: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(AppError::Config(_))));

        let config = EngineConfig {
            global_concurrency: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}

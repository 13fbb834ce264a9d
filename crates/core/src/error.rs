// Central Error Type for the Application

use crate::domain::DomainError;
use thiserror::Error;

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid queue configuration (bad cron expression, non-positive concurrency, ...)
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Optimistic write lost against a concurrent writer
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

impl From<DomainError> for AppError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::InvalidStateTransition { .. } => AppError::InvalidState(err.to_string()),
            DomainError::InvalidConfig(_) | DomainError::InvalidCron { .. } => {
                AppError::Config(err.to_string())
            }
        }
    }
}

// Note: sqlx::Error conversion is handled in infra-sqlite crate
// by converting to AppError::Database(String)

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_errors_map_to_taxonomy() {
        let transition = DomainError::InvalidStateTransition {
            from: "completed".to_string(),
            to: "pending".to_string(),
        };
        assert!(matches!(AppError::from(transition), AppError::InvalidState(_)));

        let config = DomainError::InvalidConfig("concurrency must be positive".to_string());
        assert!(matches!(AppError::from(config), AppError::Config(_)));
    }
}

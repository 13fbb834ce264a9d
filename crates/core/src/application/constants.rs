// Engine constants (no magic values)
use std::time::Duration;

/// Default scheduler tick (1s)
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1000;

/// Default broadcast buffer per event subscriber
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Re-read/retry budget for a compare-and-swap write that keeps losing
pub const MAX_CAS_ATTEMPTS: usize = 8;

/// First backoff after a failed write of a task outcome; doubles per attempt
pub const FINALIZE_RETRY_BASE: Duration = Duration::from_millis(20);

/// Ceiling for the outcome write backoff
pub const FINALIZE_RETRY_MAX: Duration = Duration::from_millis(500);

/// Graceful process shutdown timeout (SIGTERM -> SIGKILL)
pub const GRACEFUL_SHUTDOWN_TIMEOUT_MS: i64 = 5000;

/// How long the daemon waits for in-flight tasks on shutdown
pub const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Title suffix for cron-created tasks without a template
pub const SCHEDULED_TITLE_SUFFIX: &str = "(scheduled)";

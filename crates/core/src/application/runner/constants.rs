// Runner constants (no magic values)
use std::time::Duration;

/// Poll interval of `process_until_idle` when no job reports back
pub const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long shutdown waits for cancelled jobs to flush their checkpoints
pub const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(10);

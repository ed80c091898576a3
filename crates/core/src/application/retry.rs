// Retry/backoff policy and I/O error classification
use crate::domain::{MultiJobConfiguration, RetrySettings, SyncJob};
use crate::port::{TransferError, TransferErrorKind};
use std::io;
use std::time::Duration;

/// Upper bound for delays derived from `retry_delay_minutes`
pub const MAX_DERIVED_RETRY_DELAY: Duration = Duration::from_secs(60 * 60);

/// Retry decision result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the given backoff
    Retry(Duration),
    /// Fatal error or budget exhausted
    GiveUp,
}

/// Retry eligibility and delay for one job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub use_exponential: bool,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(
        base_delay: Duration,
        use_exponential: bool,
        max_delay: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            base_delay,
            use_exponential,
            max_delay,
            max_attempts,
        }
    }

    pub fn from_settings(settings: &RetrySettings, max_attempts: u32) -> Self {
        Self::new(
            Duration::from_millis(settings.base_delay_ms),
            settings.use_exponential,
            Duration::from_millis(settings.max_delay_ms),
            max_attempts,
        )
    }

    /// Policy for a job run by the multi-job runner.
    ///
    /// The job's own retry block wins over the runner-wide delay; with auto
    /// retry disabled the budget is zero.
    pub fn for_job(job: &SyncJob, config: &MultiJobConfiguration) -> Self {
        let max_attempts = if config.enable_auto_retry {
            job.max_retries
        } else {
            0
        };
        match &job.policy.retry {
            Some(settings) => Self::from_settings(settings, max_attempts),
            None => Self::new(
                config.retry_base_delay(),
                true,
                MAX_DERIVED_RETRY_DELAY,
                max_attempts,
            ),
        }
    }

    /// Backoff before retry number `retry_number` (1-based)
    ///
    /// delay = base * 2^(n-1), capped at `max_delay`
    pub fn delay_for(&self, retry_number: u32) -> Duration {
        if !self.use_exponential {
            return self.base_delay;
        }
        let exponent = retry_number.max(1) - 1;
        2u32.checked_pow(exponent)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map(|delay| delay.min(self.max_delay))
            .unwrap_or(self.max_delay)
    }

    /// Decide whether retry number `retry_number` (1-based) may run
    pub fn decide(&self, retry_number: u32, error: &TransferError) -> RetryDecision {
        if retry_number > self.max_attempts || !error.is_transient() {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry(self.delay_for(retry_number))
    }
}

#[cfg(unix)]
mod os_codes {
    pub const DISK_FULL: &[i32] = &[28]; // ENOSPC
    pub const SHARING_VIOLATION: &[i32] = &[];
    #[cfg(target_os = "linux")]
    pub const NAME_TOO_LONG: &[i32] = &[36]; // ENAMETOOLONG
    #[cfg(not(target_os = "linux"))]
    pub const NAME_TOO_LONG: &[i32] = &[63]; // ENAMETOOLONG (bsd, macos)
}

#[cfg(windows)]
mod os_codes {
    pub const DISK_FULL: &[i32] = &[39, 112]; // ERROR_HANDLE_DISK_FULL, ERROR_DISK_FULL
    pub const SHARING_VIOLATION: &[i32] = &[32, 33]; // ERROR_SHARING_VIOLATION, ERROR_LOCK_VIOLATION
    pub const NAME_TOO_LONG: &[i32] = &[206]; // ERROR_FILENAME_EXCED_RANGE
}

#[cfg(not(any(unix, windows)))]
mod os_codes {
    pub const DISK_FULL: &[i32] = &[];
    pub const SHARING_VIOLATION: &[i32] = &[];
    pub const NAME_TOO_LONG: &[i32] = &[];
}

/// Map an OS error onto the transfer error taxonomy
pub fn classify_io_error(err: &io::Error) -> TransferErrorKind {
    if let Some(code) = err.raw_os_error() {
        if os_codes::DISK_FULL.contains(&code) {
            return TransferErrorKind::DiskFull;
        }
        if os_codes::SHARING_VIOLATION.contains(&code) {
            return TransferErrorKind::FileLocked;
        }
        if os_codes::NAME_TOO_LONG.contains(&code) {
            return TransferErrorKind::InvalidPath;
        }
    }
    match err.kind() {
        io::ErrorKind::NotFound => TransferErrorKind::NotFound,
        io::ErrorKind::PermissionDenied => TransferErrorKind::PermissionDenied,
        io::ErrorKind::AlreadyExists => TransferErrorKind::AlreadyExists,
        io::ErrorKind::TimedOut => TransferErrorKind::Timeout,
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::NotConnected
        | io::ErrorKind::BrokenPipe => TransferErrorKind::Connection,
        io::ErrorKind::WouldBlock => TransferErrorKind::FileLocked,
        io::ErrorKind::InvalidInput => TransferErrorKind::InvalidPath,
        _ => TransferErrorKind::TransientIo,
    }
}

impl From<io::Error> for TransferError {
    fn from(err: io::Error) -> Self {
        TransferError::new(classify_io_error(&err), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transient() -> TransferError {
        TransferError::new(TransferErrorKind::Timeout, "read timed out")
    }

    #[test]
    fn test_exponential_schedule_with_cap() {
        let policy = RetryPolicy::new(
            Duration::from_millis(1000),
            true,
            Duration::from_millis(5000),
            3,
        );
        assert_eq!(
            policy.decide(1, &transient()),
            RetryDecision::Retry(Duration::from_millis(1000))
        );
        assert_eq!(
            policy.decide(2, &transient()),
            RetryDecision::Retry(Duration::from_millis(2000))
        );
        assert_eq!(
            policy.decide(3, &transient()),
            RetryDecision::Retry(Duration::from_millis(4000))
        );
        assert_eq!(policy.decide(4, &transient()), RetryDecision::GiveUp);
        assert_eq!(policy.delay_for(10), Duration::from_millis(5000));
        assert_eq!(policy.delay_for(64), Duration::from_millis(5000));
    }

    #[test]
    fn test_linear_delay() {
        let policy = RetryPolicy::new(Duration::from_secs(2), false, Duration::from_secs(60), 5);
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(5), Duration::from_secs(2));
    }

    #[test]
    fn test_fatal_errors_never_retried() {
        let policy = RetryPolicy::new(Duration::from_millis(10), true, Duration::from_secs(1), 5);
        for kind in [
            TransferErrorKind::Authentication,
            TransferErrorKind::PermissionDenied,
            TransferErrorKind::DiskFull,
            TransferErrorKind::InvalidPath,
            TransferErrorKind::NotFound,
            TransferErrorKind::Cancelled,
        ] {
            let err = TransferError::new(kind, "x");
            assert_eq!(policy.decide(1, &err), RetryDecision::GiveUp, "{:?}", kind);
        }
    }

    #[test]
    fn test_policy_for_job_prefers_job_settings() {
        let mut job = SyncJob::new_test("a", "/s", "/d");
        job.max_retries = 2;
        let config = MultiJobConfiguration::default();

        let derived = RetryPolicy::for_job(&job, &config);
        assert_eq!(derived.base_delay, Duration::from_secs(60));
        assert_eq!(derived.max_delay, MAX_DERIVED_RETRY_DELAY);
        assert_eq!(derived.max_attempts, 2);

        job.policy.retry = Some(RetrySettings {
            base_delay_ms: 10,
            use_exponential: false,
            max_delay_ms: 100,
        });
        let custom = RetryPolicy::for_job(&job, &config);
        assert_eq!(custom.base_delay, Duration::from_millis(10));
        assert!(!custom.use_exponential);

        let no_retry = MultiJobConfiguration {
            enable_auto_retry: false,
            ..Default::default()
        };
        assert_eq!(RetryPolicy::for_job(&job, &no_retry).max_attempts, 0);
    }

    #[test]
    fn test_classify_io_error() {
        let not_found = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert_eq!(classify_io_error(&not_found), TransferErrorKind::NotFound);

        let reset = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        assert_eq!(classify_io_error(&reset), TransferErrorKind::Connection);

        #[cfg(unix)]
        {
            let full = io::Error::from_raw_os_error(28);
            assert_eq!(classify_io_error(&full), TransferErrorKind::DiskFull);
        }

        let converted: TransferError = io::Error::new(io::ErrorKind::TimedOut, "slow").into();
        assert!(converted.is_transient());
    }
}

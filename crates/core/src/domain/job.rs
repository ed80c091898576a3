// Sync Job Domain Model

use crate::domain::connection::ConnectionSettings;
use crate::domain::error::{DomainError, Result};
use crate::domain::policy::TransferPolicy;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Job ID (UUID v4 in production, any unique string in tests)
pub type JobId = String;

/// Priority (higher number = admitted sooner)
pub type Priority = i32;

/// Default entry priority when the caller does not specify one
pub const DEFAULT_PRIORITY: Priority = 0;

/// Retry budget of a job that does not set its own
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Execution status of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
    Retrying,
}

impl JobStatus {
    /// Completed, Failed and Cancelled end an execution
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Running or waiting out a retry backoff (holds a concurrency slot)
    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Running | JobStatus::Retrying)
    }

    pub fn can_transition_to(self, to: JobStatus) -> bool {
        use JobStatus::*;
        match (self, to) {
            (Pending, Queued) => true,
            (Queued, Running) | (Queued, Cancelled) | (Queued, Pending) => true,
            (Running, Completed) | (Running, Failed) | (Running, Cancelled) => true,
            (Running, Retrying) => true,
            (Retrying, Running) | (Retrying, Failed) | (Retrying, Cancelled) => true,
            (Completed, Pending) | (Failed, Pending) | (Cancelled, Pending) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Queued => "QUEUED",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
            JobStatus::Retrying => "RETRYING",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "QUEUED" => Ok(JobStatus::Queued),
            "RUNNING" => Ok(JobStatus::Running),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            "CANCELLED" => Ok(JobStatus::Cancelled),
            "RETRYING" => Ok(JobStatus::Retrying),
            other => Err(DomainError::ValidationError(format!(
                "unknown job status: {}",
                other
            ))),
        }
    }
}

/// How the destination relates to the source after a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    /// Copy source files, leave extra destination files alone
    #[default]
    Copy,
    /// Copy source files, then delete destination files missing from the source
    Mirror,
}

/// Which side of the connection is the source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    /// Local filesystem -> endpoint
    #[default]
    Upload,
    /// Endpoint -> local filesystem
    Download,
}

impl std::fmt::Display for TransferMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferMode::Copy => write!(f, "copy"),
            TransferMode::Mirror => write!(f, "mirror"),
        }
    }
}

impl std::fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferDirection::Upload => write!(f, "upload"),
            TransferDirection::Download => write!(f, "download"),
        }
    }
}

/// Sync Job entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncJob {
    pub id: JobId,
    pub name: String,
    pub source_path: String,
    pub destination_path: String,
    pub direction: TransferDirection,
    pub mode: TransferMode,
    pub recursive: bool,
    pub overwrite: bool,
    pub enabled: bool,
    pub max_retries: u32,

    /// Shared read-only between concurrent jobs using the same profile
    pub connection: Arc<ConnectionSettings>,
    pub policy: TransferPolicy,

    pub status: JobStatus,
    pub created_at: i64, // epoch ms
    pub last_run_at: Option<i64>,
    pub finished_at: Option<i64>,
}

impl SyncJob {
    /// Create a new job in `Pending` status
    ///
    /// # Arguments
    ///
    /// * `id` - Unique job ID (injected, not generated)
    /// * `created_at` - Creation timestamp in epoch ms (injected, not system time)
    pub fn new(
        id: impl Into<String>,
        created_at: i64,
        name: impl Into<String>,
        source_path: impl Into<String>,
        destination_path: impl Into<String>,
        connection: Arc<ConnectionSettings>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            source_path: source_path.into(),
            destination_path: destination_path.into(),
            direction: TransferDirection::Upload,
            mode: TransferMode::Copy,
            recursive: true,
            overwrite: true,
            enabled: true,
            max_retries: DEFAULT_MAX_RETRIES,
            connection,
            policy: TransferPolicy::default(),
            status: JobStatus::Pending,
            created_at,
            last_run_at: None,
            finished_at: None,
        }
    }

    /// Local-disk job with a deterministic ID (for tests only)
    pub fn new_test(id: impl Into<String>, source_path: &str, destination_path: &str) -> Self {
        let id = id.into();
        Self::new(
            id.clone(),
            1_000,
            format!("job {}", id),
            source_path,
            destination_path,
            Arc::new(ConnectionSettings::local()),
        )
    }

    fn transition(&mut self, to: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        Ok(())
    }

    /// Enter a queue; terminal jobs re-enter through `Pending`
    pub fn enqueue(&mut self) -> Result<()> {
        if self.status.is_terminal() {
            self.transition(JobStatus::Pending)?;
        }
        self.transition(JobStatus::Queued)
    }

    /// Transition to Running with explicit timestamp
    pub fn start(&mut self, now_millis: i64) -> Result<()> {
        self.transition(JobStatus::Running)?;
        self.last_run_at = Some(now_millis);
        self.finished_at = None;
        Ok(())
    }

    pub fn begin_retry(&mut self) -> Result<()> {
        self.transition(JobStatus::Retrying)
    }

    pub fn complete(&mut self, now_millis: i64) -> Result<()> {
        self.transition(JobStatus::Completed)?;
        self.finished_at = Some(now_millis);
        Ok(())
    }

    pub fn fail(&mut self, now_millis: i64) -> Result<()> {
        self.transition(JobStatus::Failed)?;
        self.finished_at = Some(now_millis);
        Ok(())
    }

    pub fn cancel(&mut self, now_millis: i64) -> Result<()> {
        self.transition(JobStatus::Cancelled)?;
        self.finished_at = Some(now_millis);
        Ok(())
    }

    /// Drop an execution that a previous process never finished
    pub fn reset_after_crash(&mut self) {
        self.status = JobStatus::Pending;
        self.finished_at = None;
    }

    /// Apply a status recorded elsewhere (status board, repository)
    pub fn apply_status(&mut self, to: JobStatus, now_millis: i64) -> Result<()> {
        match to {
            JobStatus::Running => self.start(now_millis),
            JobStatus::Completed => self.complete(now_millis),
            JobStatus::Failed => self.fail(now_millis),
            JobStatus::Cancelled => self.cancel(now_millis),
            other => self.transition(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut job = SyncJob::new_test("a", "/src", "/dst");
        assert_eq!(job.status, JobStatus::Pending);

        job.enqueue().unwrap();
        job.start(10).unwrap();
        assert_eq!(job.last_run_at, Some(10));
        job.begin_retry().unwrap();
        job.start(20).unwrap();
        job.complete(30).unwrap();

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.finished_at, Some(30));
    }

    #[test]
    fn test_requeue_after_failure_goes_through_pending() {
        let mut job = SyncJob::new_test("a", "/src", "/dst");
        job.enqueue().unwrap();
        job.start(1).unwrap();
        job.fail(2).unwrap();

        job.enqueue().unwrap();
        assert_eq!(job.status, JobStatus::Queued);
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let mut job = SyncJob::new_test("a", "/src", "/dst");
        let err = job.complete(5).unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition { .. }));
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            JobStatus::Pending,
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
            JobStatus::Retrying,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("DONE".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_reset_after_crash_allows_requeue() {
        let mut job = SyncJob::new_test("a", "/src", "/dst");
        job.enqueue().unwrap();
        job.start(1).unwrap();

        job.reset_after_crash();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.last_run_at, Some(1));
        job.enqueue().unwrap();
    }
}

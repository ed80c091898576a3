// Transfer Statistics (immutable per-execution records)

use crate::domain::job::JobId;
use serde::{Deserialize, Serialize};

/// Counters for one job execution.
///
/// Produced at execution start and again, finalized, at the terminal status.
/// Records are never mutated after being published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferStatistics {
    pub job_id: JobId,
    pub total_bytes: u64,
    pub transferred_bytes: u64,
    pub files_processed: u64,
    pub files_succeeded: u64,
    pub files_skipped: u64,
    pub files_failed: u64,
    pub retry_attempts: u32,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub success: bool,
    pub error_message: Option<String>,
}

impl TransferStatistics {
    pub fn started(job_id: impl Into<String>, started_at: i64) -> Self {
        Self {
            job_id: job_id.into(),
            total_bytes: 0,
            transferred_bytes: 0,
            files_processed: 0,
            files_succeeded: 0,
            files_skipped: 0,
            files_failed: 0,
            retry_attempts: 0,
            started_at,
            finished_at: None,
            success: false,
            error_message: None,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.finished_at.is_some()
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.finished_at.map(|end| end - self.started_at)
    }
}

/// Mutable accumulator owned by one execution task
#[derive(Debug, Clone, Default)]
pub struct StatisticsTally {
    pub total_bytes: u64,
    pub transferred_bytes: u64,
    pub files_processed: u64,
    pub files_succeeded: u64,
    pub files_skipped: u64,
    pub files_failed: u64,
    pub retry_attempts: u32,
}

impl StatisticsTally {
    pub fn record_success(&mut self, bytes: u64) {
        self.files_processed += 1;
        self.files_succeeded += 1;
        self.transferred_bytes += bytes;
    }

    pub fn record_skip(&mut self) {
        self.files_processed += 1;
        self.files_skipped += 1;
    }

    pub fn record_failure(&mut self) {
        self.files_processed += 1;
        self.files_failed += 1;
    }

    /// Freeze into a finalized record
    pub fn finalize(
        &self,
        job_id: &str,
        started_at: i64,
        finished_at: i64,
        error_message: Option<String>,
    ) -> TransferStatistics {
        TransferStatistics {
            job_id: job_id.to_string(),
            total_bytes: self.total_bytes,
            transferred_bytes: self.transferred_bytes,
            files_processed: self.files_processed,
            files_succeeded: self.files_succeeded,
            files_skipped: self.files_skipped,
            files_failed: self.files_failed,
            retry_attempts: self.retry_attempts,
            started_at,
            finished_at: Some(finished_at),
            success: error_message.is_none(),
            error_message,
        }
    }
}

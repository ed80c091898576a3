// Progress and lifecycle events (immutable value records)

use crate::domain::job::{JobId, JobStatus};
use crate::domain::statistics::TransferStatistics;
use serde::{Deserialize, Serialize};

/// Byte-level progress of one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferProgress {
    pub file: String,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    /// 0..=100, never decreasing for a given file
    pub percent: u8,
}

impl TransferProgress {
    pub fn new(file: impl Into<String>, bytes_transferred: u64, total_bytes: u64) -> Self {
        Self {
            file: file.into(),
            bytes_transferred,
            total_bytes,
            percent: percent_of(bytes_transferred, total_bytes),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.percent == 100
    }
}

/// Integer percentage; an empty file counts as fully transferred
pub fn percent_of(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done.min(total) as u128 * 100) / total as u128) as u8
}

/// Published by the runner on its broadcast channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JobEvent {
    StatusChanged {
        job_id: JobId,
        status: JobStatus,
        at: i64,
    },
    Progress {
        job_id: JobId,
        progress: TransferProgress,
    },
    Finished {
        job_id: JobId,
        status: JobStatus,
        statistics: TransferStatistics,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> &str {
        match self {
            JobEvent::StatusChanged { job_id, .. }
            | JobEvent::Progress { job_id, .. }
            | JobEvent::Finished { job_id, .. } => job_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_of_bounds() {
        assert_eq!(percent_of(0, 0), 100);
        assert_eq!(percent_of(0, 10), 0);
        assert_eq!(percent_of(5, 10), 50);
        assert_eq!(percent_of(20, 10), 100);
        assert_eq!(percent_of(u64::MAX / 2, u64::MAX), 49);
    }
}

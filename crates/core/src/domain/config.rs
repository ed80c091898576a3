// Runner configuration

use crate::domain::error::{DomainError, Result};
use crate::domain::job::DEFAULT_MAX_RETRIES;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings consumed by the runner at startup and on explicit update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiJobConfiguration {
    pub global_max_concurrent_jobs: usize,
    pub default_queue_max_concurrent_jobs: usize,
    pub queue_processing_interval_seconds: u64,
    pub enable_auto_retry: bool,
    pub default_max_retries: u32,
    pub retry_delay_minutes: u64,
    pub enable_dependency_checking: bool,
    pub enable_job_prioritization: bool,
    pub job_timeout_minutes: u64,
    pub enable_detailed_logging: bool,
}

impl Default for MultiJobConfiguration {
    fn default() -> Self {
        Self {
            global_max_concurrent_jobs: 5,
            default_queue_max_concurrent_jobs: 2,
            queue_processing_interval_seconds: 5,
            enable_auto_retry: true,
            default_max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_minutes: 1,
            enable_dependency_checking: true,
            enable_job_prioritization: true,
            job_timeout_minutes: 60,
            enable_detailed_logging: false,
        }
    }
}

impl MultiJobConfiguration {
    /// Reject zero concurrency, interval or timeout values
    pub fn validate(&self) -> Result<()> {
        if self.global_max_concurrent_jobs == 0 {
            return Err(DomainError::InvalidConfig(
                "global_max_concurrent_jobs must be greater than 0".to_string(),
            ));
        }
        if self.default_queue_max_concurrent_jobs == 0 {
            return Err(DomainError::InvalidConfig(
                "default_queue_max_concurrent_jobs must be greater than 0".to_string(),
            ));
        }
        if self.queue_processing_interval_seconds == 0 {
            return Err(DomainError::InvalidConfig(
                "queue_processing_interval_seconds must be greater than 0".to_string(),
            ));
        }
        if self.job_timeout_minutes == 0 {
            return Err(DomainError::InvalidConfig(
                "job_timeout_minutes must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.queue_processing_interval_seconds)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_minutes.saturating_mul(60))
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_minutes.saturating_mul(60))
    }
}

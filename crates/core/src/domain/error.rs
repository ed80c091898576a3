// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Invalid job status transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Job {job_id} is already queued in {queue_id}")]
    Duplicate { job_id: String, queue_id: String },

    #[error("Dependency cycle detected: {0}")]
    CycleDetected(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;

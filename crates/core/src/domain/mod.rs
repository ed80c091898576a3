// Domain Layer - Pure business logic and entities

pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod graph;
pub mod job;
pub mod policy;
pub mod queue;
pub mod statistics;

// Re-exports
pub use config::MultiJobConfiguration;
pub use connection::{ConnectionSettings, Protocol};
pub use error::DomainError;
pub use events::{percent_of, JobEvent, TransferProgress};
pub use graph::DependencyGraph;
pub use job::{
    JobId, JobStatus, Priority, SyncJob, TransferDirection, TransferMode, DEFAULT_MAX_RETRIES,
    DEFAULT_PRIORITY,
};
pub use policy::{HashAlgorithm, OverwritePolicy, RetrySettings, TransferPolicy};
pub use queue::{JobQueue, QueueEntry, QueueId, QueueStatistics, DEFAULT_QUEUE_ID};
pub use statistics::{StatisticsTally, TransferStatistics};

// Application Layer - Use Cases and Orchestration

pub mod queue_service;
pub mod recovery;
pub mod retry;
pub mod runner;
pub mod status_board;

// Re-exports
pub use queue_service::{Admission, JobQueueService, DEFAULT_QUEUE_NAME};
pub use recovery::RecoveryService;
pub use retry::{RetryDecision, RetryPolicy};
pub use runner::{shutdown_channel, MultiJobRunner, ShutdownSender, ShutdownToken};
pub use status_board::StatusBoard;

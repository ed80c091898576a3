// Port Layer - Interfaces for external dependencies

pub mod file_filter;
pub mod id_provider; // For deterministic testing
pub mod job_repository;
pub mod log_sink;
pub mod queue_repository;
pub mod resume_store;
pub mod time_provider;
pub mod transfer_client;

// Re-exports
pub use file_filter::{AcceptAll, FileCandidate, FileFilter, FnFilter};
pub use id_provider::IdProvider;
pub use job_repository::JobRepository;
pub use log_sink::{LogSink, TracingLogSink};
pub use queue_repository::QueueRepository;
pub use resume_store::{ResumeCheckpoint, ResumeKey, ResumeStore};
pub use time_provider::{SystemTimeProvider, TimeProvider};
pub use transfer_client::{
    CancelToken, FileTransferReport, ProgressCallback, RemoteEntry, TransferClient,
    TransferClientFactory, TransferError, TransferErrorKind, TransferResult,
};

// TideSync Infrastructure - SQLite Adapter
// Implements: JobRepository, QueueRepository

mod connection;
mod error;
mod job_repository;
mod migration;
mod queue_repository;

pub use connection::{create_pool, database_url};
pub use job_repository::SqliteJobRepository;
pub use migration::run_migrations;
pub use queue_repository::SqliteQueueRepository;

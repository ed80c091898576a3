//! Shared harness: SQLite-backed services wired the way the daemon wires them

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tidesync_core::application::{JobQueueService, MultiJobRunner, RecoveryService, StatusBoard};
use tidesync_core::domain::{MultiJobConfiguration, RetrySettings, SyncJob};
use tidesync_core::port::id_provider::UuidProvider;
use tidesync_core::port::{
    JobRepository, SystemTimeProvider, TimeProvider, TransferClientFactory,
};
use tidesync_infra_sqlite::{
    create_pool, database_url, run_migrations, SqliteJobRepository, SqliteQueueRepository,
};
use tidesync_infra_transfer::{DefaultTransferClientFactory, FileResumeStore};

pub struct Stack {
    pub pool: SqlitePool,
    pub job_repo: Arc<dyn JobRepository>,
    pub queue_service: Arc<JobQueueService>,
    pub runner: MultiJobRunner,
    time_provider: Arc<dyn TimeProvider>,
}

impl Stack {
    /// Open (or reopen) the database at `db_path` and restore queue state
    pub async fn open(
        db_path: &Path,
        factory: Arc<dyn TransferClientFactory>,
        config: MultiJobConfiguration,
    ) -> Self {
        let pool = create_pool(&database_url(db_path)).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
        let job_repo: Arc<dyn JobRepository> = Arc::new(SqliteJobRepository::new(pool.clone()));
        let queue_service = Arc::new(
            JobQueueService::new(
                Arc::clone(&job_repo),
                Arc::new(SqliteQueueRepository::new(pool.clone())),
                Arc::new(StatusBoard::new()),
                Arc::clone(&time_provider),
                Arc::new(UuidProvider),
                &config,
            )
            .unwrap(),
        );
        queue_service.load().await.unwrap();

        let runner = MultiJobRunner::new(
            Arc::clone(&queue_service),
            Arc::clone(&job_repo),
            factory,
            Arc::clone(&time_provider),
            config,
        )
        .unwrap();

        Self {
            pool,
            job_repo,
            queue_service,
            runner,
            time_provider,
        }
    }

    pub async fn recover(&self) -> usize {
        RecoveryService::new(
            Arc::clone(&self.job_repo),
            Arc::clone(&self.queue_service),
            Arc::clone(&self.time_provider),
        )
        .recover_orphaned_jobs()
        .await
        .unwrap()
    }

    pub async fn add(&self, job: &SyncJob) {
        self.job_repo.save(job).await.unwrap();
    }

    pub async fn idle(&self) {
        tokio::time::timeout(Duration::from_secs(30), self.runner.process_until_idle())
            .await
            .expect("runner did not become idle")
            .unwrap();
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

/// Real local-disk factory with snapshots and checkpoints kept inside `root`
pub fn local_factory(root: &Path) -> Arc<dyn TransferClientFactory> {
    Arc::new(
        DefaultTransferClientFactory::new()
            .with_resume_store(Arc::new(FileResumeStore::new(root.join("resume"))))
            .with_snapshot_dir(root.join("snapshots")),
    )
}

/// Local job whose retries back off by milliseconds instead of minutes
pub fn local_job(id: &str, source: &Path, destination: &Path) -> SyncJob {
    let mut job = SyncJob::new_test(id, &path_str(source), &path_str(destination));
    job.policy.retry = Some(RetrySettings {
        base_delay_ms: 10,
        use_exponential: false,
        max_delay_ms: 10,
    });
    job
}

pub fn path_str(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

pub fn write_file(path: &Path, contents: &[u8]) -> PathBuf {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
    path.to_path_buf()
}

/// Deterministic non-repeating-looking payload
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + i / 251) % 256) as u8).collect()
}

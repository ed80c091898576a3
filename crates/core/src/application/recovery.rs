// Startup recovery: jobs a previous process left mid-flight
use crate::application::queue_service::JobQueueService;
use crate::application::status_board::StatusBoard;
use crate::domain::{JobStatus, DEFAULT_PRIORITY};
use crate::port::{JobRepository, TimeProvider};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Recovery service
///
/// Runs once on startup, after queues were restored and before the runner
/// starts ticking. Seeds the status board from the repository and puts
/// interrupted jobs back into the default queue.
pub struct RecoveryService {
    job_repo: Arc<dyn JobRepository>,
    queue_service: Arc<JobQueueService>,
    board: Arc<StatusBoard>,
    time_provider: Arc<dyn TimeProvider>,
}

impl RecoveryService {
    pub fn new(
        job_repo: Arc<dyn JobRepository>,
        queue_service: Arc<JobQueueService>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        let board = Arc::clone(queue_service.status_board());
        Self {
            job_repo,
            queue_service,
            board,
            time_provider,
        }
    }

    /// Requeue orphaned jobs
    ///
    /// A job is orphaned when it is stored as running or retrying, or as
    /// queued without any queue holding an entry for it. Orphans go back
    /// to `Pending` and, if enabled, into the default queue.
    ///
    /// # Returns
    /// Number of jobs requeued
    pub async fn recover_orphaned_jobs(&self) -> crate::error::Result<usize> {
        let jobs = self.job_repo.get_all().await?;
        let pending = self.queue_service.pending_job_ids().await;
        let now = self.time_provider.now_millis();

        let mut orphans = Vec::new();
        for job in jobs {
            let orphaned = job.status.is_active()
                || (job.status == JobStatus::Queued && !pending.contains(&job.id));
            if orphaned {
                orphans.push(job);
            } else {
                self.board.seed(&job.id, job.status);
            }
        }

        let mut requeued = 0;
        for mut job in orphans {
            warn!(job_id = %job.id, status = %job.status, "Recovering interrupted job");
            job.reset_after_crash();
            self.job_repo.update_status(&job).await?;
            self.board.set(&job.id, JobStatus::Pending, now);

            if !job.enabled {
                info!(job_id = %job.id, "Interrupted job is disabled, left pending");
                continue;
            }
            match self
                .queue_service
                .queue_job(&job.id, None, DEFAULT_PRIORITY)
                .await
            {
                Ok(_) => requeued += 1,
                Err(e) => error!(job_id = %job.id, error = %e, "Failed to requeue recovered job"),
            }
        }

        info!(requeued = requeued, "Orphaned job recovery complete");
        Ok(requeued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MultiJobConfiguration, SyncJob, DEFAULT_QUEUE_ID};
    use crate::port::id_provider::mocks::SequentialIdProvider;
    use crate::port::job_repository::mocks::InMemoryJobRepository;
    use crate::port::queue_repository::mocks::InMemoryQueueRepository;
    use crate::port::time_provider::mocks::ManualTimeProvider;

    fn job_with(id: &str, status: JobStatus) -> SyncJob {
        let mut job = SyncJob::new_test(id, "/src", "/dst");
        job.status = status;
        job
    }

    fn service_for(job_repo: Arc<InMemoryJobRepository>) -> Arc<JobQueueService> {
        Arc::new(
            JobQueueService::new(
                job_repo,
                Arc::new(InMemoryQueueRepository::new()),
                Arc::new(StatusBoard::new()),
                Arc::new(ManualTimeProvider::new(1_000)),
                Arc::new(SequentialIdProvider::new("queue")),
                &MultiJobConfiguration::default(),
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_interrupted_jobs_are_requeued() {
        let mut disabled = job_with("off", JobStatus::Running);
        disabled.enabled = false;
        let job_repo = Arc::new(InMemoryJobRepository::with_jobs([
            job_with("run", JobStatus::Running),
            job_with("retry", JobStatus::Retrying),
            job_with("lost", JobStatus::Queued),
            job_with("done", JobStatus::Completed),
            disabled,
        ]));
        let service = service_for(job_repo.clone());
        let recovery = RecoveryService::new(
            job_repo.clone(),
            service.clone(),
            Arc::new(ManualTimeProvider::new(2_000)),
        );

        assert_eq!(recovery.recover_orphaned_jobs().await.unwrap(), 3);

        let queue = service.get_queue(DEFAULT_QUEUE_ID).await.unwrap();
        for id in ["run", "retry", "lost"] {
            assert!(queue.contains(id), "{} not requeued", id);
            let stored = job_repo.get_by_id(id).await.unwrap().unwrap();
            assert_eq!(stored.status, JobStatus::Queued);
        }
        let board = service.status_board();
        assert_eq!(board.get("done"), Some(JobStatus::Completed));
        assert_eq!(board.get("off"), Some(JobStatus::Pending));
    }

    #[tokio::test]
    async fn test_queued_job_with_entry_is_untouched() {
        let job_repo = Arc::new(InMemoryJobRepository::with_jobs([job_with(
            "a",
            JobStatus::Pending,
        )]));
        let service = service_for(job_repo.clone());
        service.queue_job("a", None, 0).await.unwrap();

        let recovery = RecoveryService::new(
            job_repo.clone(),
            service.clone(),
            Arc::new(ManualTimeProvider::new(2_000)),
        );
        assert_eq!(recovery.recover_orphaned_jobs().await.unwrap(), 0);
        assert_eq!(service.pending_job_ids().await.len(), 1);
    }
}

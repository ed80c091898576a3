// Startup wiring for job definitions declared in the config file

use crate::config::JobConfig;
use anyhow::Result;
use std::sync::Arc;
use tidesync_core::application::JobQueueService;
use tidesync_core::domain::SyncJob;
use tidesync_core::port::{JobRepository, TimeProvider};
use tracing::{info, warn};

fn to_sync_job(
    config: &JobConfig,
    existing: Option<SyncJob>,
    default_max_retries: u32,
    now: i64,
) -> SyncJob {
    let created_at = existing.as_ref().map(|j| j.created_at).unwrap_or(now);
    let mut job = SyncJob::new(
        config.id.clone(),
        created_at,
        config.display_name(),
        config.source_path.clone(),
        config.destination_path.clone(),
        Arc::new(config.connection.clone()),
    );
    job.direction = config.direction;
    job.mode = config.mode;
    job.recursive = config.recursive;
    job.overwrite = config.overwrite;
    job.enabled = config.enabled;
    job.max_retries = config.max_retries.unwrap_or(default_max_retries);
    job.policy = config.policy.clone();

    if let Some(stored) = existing {
        job.status = stored.status;
        job.last_run_at = stored.last_run_at;
        job.finished_at = stored.finished_at;
    }
    job
}

/// Upsert configured job definitions, keeping stored run state.
///
/// Jobs without their own `max_retries` get the runner-wide default.
pub async fn register_jobs(
    job_repo: &Arc<dyn JobRepository>,
    jobs: &[JobConfig],
    default_max_retries: u32,
    time_provider: &Arc<dyn TimeProvider>,
) -> Result<usize> {
    let now = time_provider.now_millis();
    for config in jobs {
        let existing = job_repo.get_by_id(&config.id).await?;
        let job = to_sync_job(config, existing, default_max_retries, now);
        job_repo.save(&job).await?;
    }
    if !jobs.is_empty() {
        info!(jobs = jobs.len(), "Job definitions registered");
    }
    Ok(jobs.len())
}

/// Queue every `run_on_start` job; jobs already scheduled are left alone
pub async fn queue_startup_jobs(queue_service: &JobQueueService, jobs: &[JobConfig]) -> usize {
    let mut queued = 0;
    for config in jobs.iter().filter(|j| j.run_on_start && j.enabled) {
        if queue_service.queue_of(&config.id).await.is_some() {
            continue;
        }
        match queue_service
            .queue_job_with_dependencies(
                &config.id,
                &config.depends_on,
                config.queue.as_deref(),
                config.priority,
            )
            .await
        {
            Ok(_) => queued += 1,
            Err(e) => warn!(job_id = %config.id, error = %e, "Startup job not queued"),
        }
    }
    queued
}

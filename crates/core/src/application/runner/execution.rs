// Job execution: one task per admitted job, retries included
use crate::application::retry::{RetryDecision, RetryPolicy};
use crate::application::runner::plan::{build_plan, list_local_files_async, PlanItem, TransferPlan};
use crate::application::status_board::StatusBoard;
use crate::domain::{
    JobEvent, JobStatus, MultiJobConfiguration, OverwritePolicy, StatisticsTally, SyncJob,
    TransferDirection, TransferMode, TransferProgress, TransferStatistics,
};
use crate::port::{
    CancelToken, FileFilter, FileTransferReport, JobRepository, LogSink, ProgressCallback,
    TimeProvider, TransferClient, TransferClientFactory, TransferError, TransferErrorKind,
    TransferResult,
};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Everything a job task needs, cloned out of the runner at dispatch
pub(crate) struct ExecutionContext {
    pub board: Arc<StatusBoard>,
    pub job_repo: Arc<dyn JobRepository>,
    pub client_factory: Arc<dyn TransferClientFactory>,
    pub file_filter: Arc<dyn FileFilter>,
    pub log_sink: Arc<dyn LogSink>,
    pub time_provider: Arc<dyn TimeProvider>,
    pub config: MultiJobConfiguration,
    pub cancel: CancelToken,
    pub shutting_down: Arc<AtomicBool>,
}

/// Carried across attempts so finished files are not sent twice
#[derive(Default)]
struct AttemptProgress {
    tally: StatisticsTally,
    planned: bool,
    done: HashSet<String>,
    failed: Vec<(String, TransferError)>,
}

impl AttemptProgress {
    fn is_settled(&self, source: &str) -> bool {
        self.done.contains(source) || self.failed.iter().any(|(s, _)| s == source)
    }
}

/// Persist and publish a status change; failures here are logged, not fatal
pub(crate) async fn set_status(ctx: &ExecutionContext, job: &mut SyncJob, to: JobStatus) {
    let now = ctx.time_provider.now_millis();
    if let Err(e) = job.apply_status(to, now) {
        warn!(job_id = %job.id, error = %e, "Forcing status after invalid transition");
        job.status = to;
    }
    if let Err(e) = ctx.job_repo.update_status(job).await {
        error!(job_id = %job.id, status = %to, error = %e, "Failed to persist job status");
    }
    ctx.board.set(&job.id, to, now);
}

fn progress_callback(board: Arc<StatusBoard>, job_id: String) -> ProgressCallback {
    Arc::new(move |progress: TransferProgress| {
        board.publish(JobEvent::Progress {
            job_id: job_id.clone(),
            progress,
        });
    })
}

/// Run a job that is already `Running` to its terminal status
pub(crate) async fn run_job(ctx: &ExecutionContext, mut job: SyncJob) -> JobStatus {
    let started_at = job
        .last_run_at
        .unwrap_or_else(|| ctx.time_provider.now_millis());
    ctx.board
        .set_statistics(TransferStatistics::started(&job.id, started_at));
    ctx.log_sink.info(
        &format!(
            "Starting {} {} -> {}",
            job.direction, job.source_path, job.destination_path
        ),
        Some(&job.name),
    );

    let policy = RetryPolicy::for_job(&job, &ctx.config);
    let mut progress = AttemptProgress::default();
    let mut retry_number = 0u32;

    let outcome: TransferResult<()> = loop {
        let err = match run_attempt_with_timeout(ctx, &job, &mut progress).await {
            Ok(()) => break Ok(()),
            Err(e) => e,
        };
        if err.is_cancelled() || ctx.cancel.is_cancelled() {
            break Err(TransferError::cancelled());
        }

        retry_number += 1;
        match policy.decide(retry_number, &err) {
            RetryDecision::GiveUp => break Err(err),
            RetryDecision::Retry(delay) => {
                progress.tally.retry_attempts += 1;
                warn!(
                    job_id = %job.id,
                    attempt = retry_number,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transfer attempt failed, retrying"
                );
                ctx.log_sink.warning(
                    &format!("Attempt {} failed ({}), retrying", retry_number, err),
                    Some(&job.name),
                );
                set_status(ctx, &mut job, JobStatus::Retrying).await;

                let cancelled = tokio::select! {
                    _ = tokio::time::sleep(delay) => false,
                    _ = ctx.cancel.cancelled() => true,
                };
                if cancelled {
                    break Err(TransferError::cancelled());
                }
                set_status(ctx, &mut job, JobStatus::Running).await;
            }
        }
    };

    let finished_at = ctx.time_provider.now_millis();
    let interrupted = ctx.shutting_down.load(Ordering::SeqCst)
        && matches!(&outcome, Err(e) if e.is_cancelled());
    let (status, error_message) = match &outcome {
        Ok(()) => (JobStatus::Completed, None),
        Err(e) if e.is_cancelled() => (JobStatus::Cancelled, Some(e.to_string())),
        Err(e) => (JobStatus::Failed, Some(e.to_string())),
    };

    let statistics = progress
        .tally
        .finalize(&job.id, started_at, finished_at, error_message.clone());
    ctx.board.set_statistics(statistics.clone());

    if interrupted {
        // Left as running so startup recovery re-queues it
        info!(job_id = %job.id, "Job interrupted by shutdown");
        return status;
    }

    set_status(ctx, &mut job, status).await;
    ctx.board.publish(JobEvent::Finished {
        job_id: job.id.clone(),
        status,
        statistics: statistics.clone(),
    });

    match status {
        JobStatus::Completed => {
            info!(
                job_id = %job.id,
                files = statistics.files_succeeded,
                skipped = statistics.files_skipped,
                bytes = statistics.transferred_bytes,
                retries = statistics.retry_attempts,
                "Job completed"
            );
            ctx.log_sink.info(
                &format!(
                    "Completed: {} files, {} bytes",
                    statistics.files_succeeded, statistics.transferred_bytes
                ),
                Some(&job.name),
            );
        }
        JobStatus::Cancelled => {
            info!(job_id = %job.id, "Job cancelled");
            ctx.log_sink.warning("Cancelled", Some(&job.name));
        }
        _ => {
            let message = error_message.unwrap_or_default();
            error!(job_id = %job.id, error = %message, "Job failed");
            ctx.log_sink
                .error(&format!("Failed: {}", message), Some(&job.name));
        }
    }
    status
}

/// One attempt bounded by the job timeout.
///
/// A timed-out attempt is cancelled and then awaited, so its blocking copy
/// has stopped writing before the caller backs off and retries.
async fn run_attempt_with_timeout(
    ctx: &ExecutionContext,
    job: &SyncJob,
    progress: &mut AttemptProgress,
) -> TransferResult<()> {
    let cancel = ctx.cancel.child();
    let attempt = run_attempt(ctx, job, &cancel, progress);
    tokio::pin!(attempt);

    tokio::select! {
        result = &mut attempt => result,
        _ = tokio::time::sleep(ctx.config.job_timeout()) => {
            cancel.cancel();
            match attempt.await {
                // finished just as the timer fired
                Ok(()) => Ok(()),
                Err(e) => {
                    debug!(job_id = %job.id, error = %e, "Timed out attempt stopped");
                    Err(TransferError::new(
                        TransferErrorKind::Timeout,
                        format!(
                            "attempt exceeded the {} minute job timeout",
                            ctx.config.job_timeout_minutes
                        ),
                    ))
                }
            }
        }
    }
}

async fn run_attempt(
    ctx: &ExecutionContext,
    job: &SyncJob,
    cancel: &CancelToken,
    progress: &mut AttemptProgress,
) -> TransferResult<()> {
    let mut client = ctx.client_factory.create(&job.connection, &job.policy)?;
    client.set_cancel_token(cancel.clone());
    client.set_progress_callback(Some(progress_callback(
        Arc::clone(&ctx.board),
        job.id.clone(),
    )));

    let plan = build_plan(job, client.as_ref(), ctx.file_filter.as_ref()).await?;
    if !progress.planned {
        progress.planned = true;
        progress.tally.total_bytes = plan.total_bytes();
        for relative in &plan.filtered {
            debug!(job_id = %job.id, file = %relative, "Skipped by file filter");
            progress.tally.record_skip();
        }
    }

    for item in &plan.items {
        if progress.is_settled(&item.source) {
            continue;
        }
        cancel.check()?;

        match transfer_item(ctx, job, client.as_ref(), item).await {
            Ok(Some(report)) => {
                progress.tally.record_success(report.bytes_transferred);
                progress.done.insert(item.source.clone());
            }
            Ok(None) => {
                progress.tally.record_skip();
                progress.done.insert(item.source.clone());
            }
            Err(e) if e.kind == TransferErrorKind::AlreadyExists => {
                debug!(job_id = %job.id, file = %item.destination, "Destination exists, skipped");
                progress.tally.record_skip();
                progress.done.insert(item.source.clone());
            }
            Err(e) if e.is_transient() || e.is_cancelled() => return Err(e),
            Err(e) => {
                warn!(job_id = %job.id, file = %item.source, error = %e, "File transfer failed");
                progress.tally.record_failure();
                progress.failed.push((item.source.clone(), e));
            }
        }
    }

    if let Some((_, err)) = progress.failed.first() {
        return Err(err.clone());
    }

    if job.mode == TransferMode::Mirror && plan.source_is_dir {
        let removed = remove_extras(job, client.as_ref(), &plan).await?;
        if removed > 0 {
            info!(job_id = %job.id, removed = removed, "Mirror removed extra destination files");
        }
    }
    Ok(())
}

async fn destination_modified(
    job: &SyncJob,
    client: &dyn TransferClient,
    destination: &str,
) -> Option<DateTime<Utc>> {
    match job.direction {
        TransferDirection::Upload => client
            .get_file_modified_time(destination)
            .await
            .ok()
            .flatten(),
        TransferDirection::Download => tokio::fs::metadata(destination)
            .await
            .ok()
            .and_then(|m| m.modified().ok())
            .map(DateTime::<Utc>::from),
    }
}

/// Transfer one file; `Ok(None)` when the overwrite policy skips it
async fn transfer_item(
    ctx: &ExecutionContext,
    job: &SyncJob,
    client: &dyn TransferClient,
    item: &PlanItem,
) -> TransferResult<Option<FileTransferReport>> {
    if job.overwrite && job.policy.overwrite_policy == OverwritePolicy::IfNewer {
        if let (Some(source_time), Some(dest_time)) = (
            item.modified,
            destination_modified(job, client, &item.destination).await,
        ) {
            if dest_time >= source_time {
                debug!(job_id = %job.id, file = %item.destination, "Destination not older, skipped");
                return Ok(None);
            }
        }
    }

    let report = match job.direction {
        TransferDirection::Upload => {
            client
                .upload_file(Path::new(&item.source), &item.destination, job.overwrite)
                .await?
        }
        TransferDirection::Download => {
            client
                .download_file(&item.source, Path::new(&item.destination), job.overwrite)
                .await?
        }
    };

    if ctx.config.enable_detailed_logging {
        info!(
            job_id = %job.id,
            file = %item.relative_path,
            bytes = report.bytes_transferred,
            resumed_from = report.resumed_from,
            snapshot = report.used_snapshot,
            "File transferred"
        );
    } else {
        debug!(
            job_id = %job.id,
            file = %item.relative_path,
            bytes = report.bytes_transferred,
            "File transferred"
        );
    }
    Ok(Some(report))
}

/// Delete destination files that have no counterpart in the source
async fn remove_extras(
    job: &SyncJob,
    client: &dyn TransferClient,
    plan: &TransferPlan,
) -> TransferResult<usize> {
    let keep: HashSet<&str> = plan
        .items
        .iter()
        .map(|i| i.relative_path.as_str())
        .chain(plan.filtered.iter().map(String::as_str))
        .collect();

    let existing = match job.direction {
        TransferDirection::Upload => client.list_files(&job.destination_path, job.recursive).await,
        TransferDirection::Download => {
            list_local_files_async(PathBuf::from(&job.destination_path), job.recursive)
                .await
                .map(|(_, entries)| entries)
        }
    };
    let existing = match existing {
        Ok(entries) => entries,
        Err(e) if e.kind == TransferErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut removed = 0;
    for entry in existing
        .iter()
        .filter(|e| !keep.contains(e.relative_path.as_str()))
    {
        match job.direction {
            TransferDirection::Upload => client.delete_file(&entry.path).await?,
            TransferDirection::Download => tokio::fs::remove_file(&entry.path).await?,
        }
        debug!(job_id = %job.id, file = %entry.path, "Removed extra file");
        removed += 1;
    }
    Ok(removed)
}

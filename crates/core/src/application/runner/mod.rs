// Multi-Job Runner - two-level admission and concurrent job execution

pub mod constants;
mod execution;
pub mod plan;
mod shutdown;

use constants::*;
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::application::queue_service::{Admission, JobQueueService};
use crate::application::status_board::StatusBoard;
use crate::domain::{
    DomainError, JobEvent, JobId, JobStatus, MultiJobConfiguration, QueueId, TransferStatistics,
    DEFAULT_PRIORITY,
};
use crate::error::{AppError, Result};
use crate::port::{
    AcceptAll, CancelToken, FileFilter, JobRepository, LogSink, TimeProvider,
    TransferClientFactory, TracingLogSink,
};
use execution::ExecutionContext;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Reported by a job task when it reaches a terminal status
#[derive(Debug)]
struct JobOutcome {
    job_id: JobId,
    queue_id: QueueId,
    status: JobStatus,
}

struct ActiveJob {
    queue_id: QueueId,
    cancel: CancelToken,
    handle: JoinHandle<()>,
}

/// Pulls ready jobs from the queue service and runs them concurrently.
///
/// Only `tick` touches queue running sets and counters; job tasks report
/// back over an mpsc channel, which the next tick drains. A finished task
/// kicks the loop so its slot is reused without waiting for the interval.
pub struct MultiJobRunner {
    queue_service: Arc<JobQueueService>,
    job_repo: Arc<dyn JobRepository>,
    client_factory: Arc<dyn TransferClientFactory>,
    time_provider: Arc<dyn TimeProvider>,
    board: Arc<StatusBoard>,
    file_filter: Arc<dyn FileFilter>,
    log_sink: Arc<dyn LogSink>,
    config: RwLock<MultiJobConfiguration>,
    active: Mutex<HashMap<JobId, ActiveJob>>,
    outcome_tx: mpsc::UnboundedSender<JobOutcome>,
    outcome_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<JobOutcome>>,
    kick: Arc<Notify>,
    shutting_down: Arc<AtomicBool>,
}

impl MultiJobRunner {
    pub fn new(
        queue_service: Arc<JobQueueService>,
        job_repo: Arc<dyn JobRepository>,
        client_factory: Arc<dyn TransferClientFactory>,
        time_provider: Arc<dyn TimeProvider>,
        config: MultiJobConfiguration,
    ) -> Result<Self> {
        config.validate()?;
        queue_service.apply_configuration(&config);
        let board = Arc::clone(queue_service.status_board());
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        Ok(Self {
            queue_service,
            job_repo,
            client_factory,
            time_provider,
            board,
            file_filter: Arc::new(AcceptAll),
            log_sink: Arc::new(TracingLogSink),
            config: RwLock::new(config),
            active: Mutex::new(HashMap::new()),
            outcome_tx,
            outcome_rx: tokio::sync::Mutex::new(outcome_rx),
            kick: Arc::new(Notify::new()),
            shutting_down: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn with_file_filter(mut self, filter: Arc<dyn FileFilter>) -> Self {
        self.file_filter = filter;
        self
    }

    pub fn with_log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.log_sink = sink;
        self
    }

    pub fn queue_service(&self) -> &Arc<JobQueueService> {
        &self.queue_service
    }

    pub fn configuration(&self) -> MultiJobConfiguration {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Validate and apply new settings; the global cap takes effect on the
    /// next tick, which is triggered immediately
    pub fn update_configuration(&self, config: MultiJobConfiguration) -> Result<()> {
        config.validate()?;
        self.queue_service.apply_configuration(&config);
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
        self.kick.notify_one();
        info!("Runner configuration updated");
        Ok(())
    }

    pub fn set_max_concurrent_jobs(&self, max: usize) -> Result<()> {
        if max == 0 {
            return Err(DomainError::InvalidConfig(
                "global max concurrent jobs must be greater than 0".to_string(),
            )
            .into());
        }
        self.config
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .global_max_concurrent_jobs = max;
        self.kick.notify_one();
        info!(max_concurrent_jobs = max, "Global concurrency cap changed");
        Ok(())
    }

    pub fn get_max_concurrent_jobs(&self) -> usize {
        self.configuration().global_max_concurrent_jobs
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.board.subscribe()
    }

    pub fn get_job_status(&self, job_id: &str) -> Option<JobStatus> {
        self.board.get(job_id)
    }

    pub fn get_all_job_statuses(&self) -> HashMap<JobId, JobStatus> {
        self.board.snapshot()
    }

    /// Latest statistics record of a job (finalized once it finished)
    pub fn get_statistics(&self, job_id: &str) -> Option<TransferStatistics> {
        self.board.statistics(job_id)
    }

    /// Jobs currently holding a slot (running or waiting out a backoff)
    pub fn running_jobs(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    fn active_count(&self) -> usize {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn is_active(&self, job_id: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(job_id)
    }

    /// Queue a job into the default queue and trigger a tick.
    ///
    /// A job that is already queued or running is left alone.
    ///
    /// # Errors
    /// - `JobNotFound` if the job does not exist
    /// - `Validation` if the job is disabled
    pub async fn start_job(&self, job_id: &str) -> Result<()> {
        let job = self
            .job_repo
            .get_by_id(job_id)
            .await?
            .ok_or_else(|| DomainError::JobNotFound(job_id.to_string()))?;
        if !job.enabled {
            return Err(AppError::Validation(format!("job {} is disabled", job_id)));
        }

        let status = self.board.get(job_id).unwrap_or(job.status);
        if matches!(
            status,
            JobStatus::Queued | JobStatus::Running | JobStatus::Retrying
        ) || self.is_active(job_id)
        {
            debug!(job_id = %job_id, status = %status, "Start ignored, job already scheduled");
            return Ok(());
        }

        self.queue_service
            .queue_job(job_id, None, DEFAULT_PRIORITY)
            .await?;
        self.kick.notify_one();
        Ok(())
    }

    /// Start several jobs; each result is independent
    pub async fn start_multiple_jobs(&self, job_ids: &[JobId]) -> Vec<(JobId, Result<()>)> {
        let mut results = Vec::with_capacity(job_ids.len());
        for job_id in job_ids {
            let result = self.start_job(job_id).await;
            if let Err(e) = &result {
                warn!(job_id = %job_id, error = %e, "Job could not be started");
            }
            results.push((job_id.clone(), result));
        }
        results
    }

    /// Activate a queue and trigger a tick; returns how many of its
    /// entries are ready right now
    pub async fn start_jobs_in_queue(&self, queue_id: &str) -> Result<usize> {
        self.queue_service.set_queue_active(queue_id, true).await?;
        let ready = self.queue_service.get_ready_jobs(queue_id).await?.len();
        self.kick.notify_one();
        Ok(ready)
    }

    /// Cancel a job.
    ///
    /// A queued job is removed from its queue before any transfer starts; a
    /// running or retrying job stops after its current chunk. Returns false
    /// when the job exists but is neither queued nor running.
    pub async fn stop_job(&self, job_id: &str) -> Result<bool> {
        let cancel = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_id)
            .map(|a| a.cancel.clone());
        if let Some(cancel) = cancel {
            cancel.cancel();
            info!(job_id = %job_id, "Cancellation requested");
            return Ok(true);
        }

        if self.queue_service.cancel_queued(job_id).await? {
            return Ok(true);
        }
        if self.job_repo.get_by_id(job_id).await?.is_none() {
            return Err(DomainError::JobNotFound(job_id.to_string()).into());
        }
        Ok(false)
    }

    /// One scheduling pass: collect finished jobs, then admit and dispatch.
    ///
    /// Returns the number of admissions handled. An admission whose dispatch
    /// fails is marked failed and its slot released.
    pub async fn tick(&self) -> Result<usize> {
        let mut outcomes = self.outcome_rx.lock().await;
        while let Ok(outcome) = outcomes.try_recv() {
            self.collect(outcome).await?;
        }
        if self.shutting_down.load(Ordering::SeqCst) {
            return Ok(0);
        }

        let global_max = self.get_max_concurrent_jobs();
        let running = self.active_count();
        let slots = global_max.saturating_sub(running);
        if slots == 0 {
            debug!(running = running, global_max = global_max, "Global cap reached");
            return Ok(0);
        }

        let admissions = self.queue_service.admit_ready(slots).await?;
        let dispatched = admissions.len();
        for admission in admissions {
            let job_id = admission.job_id.clone();
            let queue_id = admission.queue_id.clone();
            if let Err(e) = self.dispatch(admission).await {
                error!(job_id = %job_id, queue_id = %queue_id, error = %e, "Dispatch failed");
                self.release_admission(&job_id, &queue_id).await;
            }
        }
        if dispatched > 0 {
            debug!(dispatched = dispatched, running = running + dispatched, "Tick dispatched jobs");
        }
        Ok(dispatched)
    }

    async fn collect(&self, outcome: JobOutcome) -> Result<()> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&outcome.job_id);
        self.queue_service
            .finish(&outcome.job_id, &outcome.queue_id, outcome.status)
            .await?;
        debug!(job_id = %outcome.job_id, status = %outcome.status, "Job slot released");
        Ok(())
    }

    /// Give back the slot of an admission that never started
    async fn release_admission(&self, job_id: &str, queue_id: &str) {
        self.board
            .set(job_id, JobStatus::Failed, self.time_provider.now_millis());
        if let Err(e) = self
            .queue_service
            .finish(job_id, queue_id, JobStatus::Failed)
            .await
        {
            error!(job_id = %job_id, queue_id = %queue_id, error = %e, "Failed to release slot");
        }
    }

    async fn dispatch(&self, admission: Admission) -> Result<()> {
        let Admission {
            job_id, queue_id, ..
        } = admission;
        let now = self.time_provider.now_millis();

        let mut job = match self.job_repo.get_by_id(&job_id).await? {
            Some(job) => job,
            None => {
                warn!(job_id = %job_id, "Admitted job no longer exists");
                self.board.remove(&job_id);
                return self
                    .queue_service
                    .finish(&job_id, &queue_id, JobStatus::Failed)
                    .await;
            }
        };
        job.status = self.board.get(&job_id).unwrap_or(job.status);

        let target = if job.enabled {
            JobStatus::Running
        } else {
            JobStatus::Cancelled
        };
        if let Err(e) = job.apply_status(target, now) {
            error!(job_id = %job_id, error = %e, "Admitted job in unexpected status");
            return self
                .queue_service
                .finish(&job_id, &queue_id, JobStatus::Failed)
                .await;
        }
        self.job_repo.update_status(&job).await?;
        self.board.set(&job_id, target, now);
        if target == JobStatus::Cancelled {
            warn!(job_id = %job_id, "Job disabled after queueing, cancelled");
            return self
                .queue_service
                .finish(&job_id, &queue_id, JobStatus::Cancelled)
                .await;
        }

        info!(job_id = %job_id, queue_id = %queue_id, name = %job.name, "Job started");

        let cancel = CancelToken::new();
        let ctx = ExecutionContext {
            board: Arc::clone(&self.board),
            job_repo: Arc::clone(&self.job_repo),
            client_factory: Arc::clone(&self.client_factory),
            file_filter: Arc::clone(&self.file_filter),
            log_sink: Arc::clone(&self.log_sink),
            time_provider: Arc::clone(&self.time_provider),
            config: self.configuration(),
            cancel: cancel.clone(),
            shutting_down: Arc::clone(&self.shutting_down),
        };

        let outcome_tx = self.outcome_tx.clone();
        let kick = Arc::clone(&self.kick);
        let board = Arc::clone(&self.board);
        let job_repo = Arc::clone(&self.job_repo);
        let time_provider = Arc::clone(&self.time_provider);
        let task_job_id = job_id.clone();
        let task_queue_id = queue_id.clone();

        // Outer task survives a panicking job and always reports an outcome
        let handle = tokio::spawn(async move {
            let execution = tokio::spawn(async move { execution::run_job(&ctx, job).await });
            let status = match execution.await {
                Ok(status) => status,
                Err(join_err) => {
                    error!(
                        job_id = %task_job_id,
                        panicked = join_err.is_panic(),
                        "Job task aborted"
                    );
                    let now = time_provider.now_millis();
                    if let Ok(Some(mut job)) = job_repo.get_by_id(&task_job_id).await {
                        job.status = JobStatus::Failed;
                        job.finished_at = Some(now);
                        if let Err(e) = job_repo.update_status(&job).await {
                            error!(job_id = %task_job_id, error = %e, "Failed to persist job status");
                        }
                    }
                    board.set(&task_job_id, JobStatus::Failed, now);
                    JobStatus::Failed
                }
            };
            let _ = outcome_tx.send(JobOutcome {
                job_id: task_job_id,
                queue_id: task_queue_id,
                status,
            });
            kick.notify_one();
        });

        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                job_id,
                ActiveJob {
                    queue_id,
                    cancel,
                    handle,
                },
            );
        Ok(())
    }

    /// Tick until nothing is running and nothing more can be admitted
    pub async fn process_until_idle(&self) -> Result<()> {
        loop {
            let dispatched = self.tick().await?;
            if dispatched == 0 && self.active_count() == 0 {
                return Ok(());
            }
            tokio::select! {
                _ = self.kick.notified() => {},
                _ = sleep(IDLE_POLL_INTERVAL) => {},
            }
        }
    }

    /// Scheduling loop with graceful shutdown support
    pub async fn run(&self, mut shutdown: ShutdownToken) -> Result<()> {
        info!(
            global_max = self.get_max_concurrent_jobs(),
            interval_secs = self.configuration().queue_processing_interval_seconds,
            "Runner started"
        );
        loop {
            if shutdown.is_shutdown() {
                break;
            }
            if let Err(e) = self.tick().await {
                error!(error = %e, "Scheduling tick failed");
            }
            let interval = self.configuration().tick_interval();
            tokio::select! {
                _ = sleep(interval) => {},
                _ = self.kick.notified() => {},
                _ = shutdown.wait() => {
                    info!("Runner interrupted");
                    break;
                }
            }
        }
        self.shutdown().await?;
        info!("Runner stopped");
        Ok(())
    }

    /// Stop admitting, cancel running jobs and wait for them to settle.
    ///
    /// Interrupted jobs keep their running status in the repository so the
    /// next startup re-queues them.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutting_down.store(true, Ordering::SeqCst);
        let active: Vec<(JobId, ActiveJob)> = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        if !active.is_empty() {
            info!(jobs = active.len(), "Cancelling running jobs for shutdown");
        }

        let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE_PERIOD;
        for (_, job) in &active {
            job.cancel.cancel();
        }
        for (job_id, job) in active {
            if tokio::time::timeout_at(deadline, job.handle).await.is_err() {
                warn!(job_id = %job_id, queue_id = %job.queue_id, "Job did not stop within grace period");
            }
        }

        let mut outcomes = self.outcome_rx.lock().await;
        while let Ok(outcome) = outcomes.try_recv() {
            self.queue_service
                .finish(&outcome.job_id, &outcome.queue_id, outcome.status)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RetrySettings, SyncJob};
    use crate::port::id_provider::mocks::SequentialIdProvider;
    use crate::port::job_repository::mocks::InMemoryJobRepository;
    use crate::port::queue_repository::mocks::InMemoryQueueRepository;
    use crate::port::time_provider::SystemTimeProvider;
    use crate::port::transfer_client::mocks::MockTransferClientFactory;
    use crate::port::{TransferError, TransferErrorKind};
    use std::time::Duration;
    use tempfile::TempDir;

    struct Harness {
        runner: MultiJobRunner,
        factory: Arc<MockTransferClientFactory>,
        job_repo: Arc<InMemoryJobRepository>,
        dir: TempDir,
    }

    impl Harness {
        fn source_of(&self, id: &str) -> String {
            self.dir
                .path()
                .join(format!("{}.txt", id))
                .to_string_lossy()
                .to_string()
        }

        async fn add_job(&self, id: &str) -> SyncJob {
            let source = self.source_of(id);
            std::fs::write(&source, id.as_bytes()).unwrap();
            let mut job = SyncJob::new_test(id, &source, &format!("/remote/{}.txt", id));
            job.policy.retry = Some(RetrySettings {
                base_delay_ms: 1,
                use_exponential: false,
                max_delay_ms: 1,
            });
            self.job_repo.save(&job).await.unwrap();
            job
        }

        fn service(&self) -> &Arc<JobQueueService> {
            self.runner.queue_service()
        }
    }

    fn harness(config: MultiJobConfiguration, delay: Duration) -> Harness {
        let job_repo = Arc::new(InMemoryJobRepository::new());
        let board = Arc::new(StatusBoard::new());
        let time: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
        let service = Arc::new(
            JobQueueService::new(
                job_repo.clone(),
                Arc::new(InMemoryQueueRepository::new()),
                board,
                time.clone(),
                Arc::new(SequentialIdProvider::new("queue")),
                &config,
            )
            .unwrap(),
        );
        let factory = Arc::new(MockTransferClientFactory::with_delay(delay));
        let runner =
            MultiJobRunner::new(service, job_repo.clone(), factory.clone(), time, config).unwrap();
        Harness {
            runner,
            factory,
            job_repo,
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn single_slot() -> MultiJobConfiguration {
        MultiJobConfiguration {
            global_max_concurrent_jobs: 1,
            default_queue_max_concurrent_jobs: 1,
            ..Default::default()
        }
    }

    async fn idle(h: &Harness) {
        tokio::time::timeout(Duration::from_secs(10), h.runner.process_until_idle())
            .await
            .expect("runner did not become idle")
            .unwrap();
    }

    #[tokio::test]
    async fn test_start_job_completes_with_statistics() {
        let h = harness(MultiJobConfiguration::default(), Duration::ZERO);
        h.add_job("a").await;
        let mut events = h.runner.subscribe();

        h.runner.start_job("a").await.unwrap();
        idle(&h).await;

        assert_eq!(h.runner.get_job_status("a"), Some(JobStatus::Completed));
        let stats = h.runner.get_statistics("a").unwrap();
        assert!(stats.success);
        assert!(stats.is_finalized());
        assert_eq!(stats.files_succeeded, 1);

        let mut finished = false;
        while let Ok(event) = events.try_recv() {
            if let JobEvent::Finished { status, .. } = event {
                assert_eq!(status, JobStatus::Completed);
                finished = true;
            }
        }
        assert!(finished);
        let stored = h.job_repo.get_by_id("a").await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_start_job_is_idempotent_and_refuses_disabled() {
        let h = harness(MultiJobConfiguration::default(), Duration::ZERO);
        h.add_job("a").await;
        h.runner.start_job("a").await.unwrap();
        h.runner.start_job("a").await.unwrap();
        assert_eq!(h.service().pending_job_ids().await.len(), 1);

        let mut disabled = h.add_job("off").await;
        disabled.enabled = false;
        h.job_repo.save(&disabled).await.unwrap();
        let err = h.runner.start_job("off").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        assert!(h.runner.start_job("ghost").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let h = harness(MultiJobConfiguration::default(), Duration::ZERO);
        h.add_job("a").await;
        h.factory.fail_transiently(&h.source_of("a"), 2);

        h.runner.start_job("a").await.unwrap();
        idle(&h).await;

        assert_eq!(h.runner.get_job_status("a"), Some(JobStatus::Completed));
        assert_eq!(h.factory.attempts(&h.source_of("a")), 3);
        assert_eq!(h.runner.get_statistics("a").unwrap().retry_attempts, 2);
    }

    #[tokio::test]
    async fn test_fatal_failure_is_not_retried() {
        let h = harness(MultiJobConfiguration::default(), Duration::ZERO);
        h.add_job("a").await;
        h.factory.fail_always(
            &h.source_of("a"),
            TransferError::new(TransferErrorKind::Authentication, "bad password"),
        );

        h.runner.start_job("a").await.unwrap();
        idle(&h).await;

        assert_eq!(h.runner.get_job_status("a"), Some(JobStatus::Failed));
        assert_eq!(h.factory.attempts(&h.source_of("a")), 1);
        let stats = h.runner.get_statistics("a").unwrap();
        assert!(!stats.success);
        assert!(stats.error_message.unwrap().contains("bad password"));
    }

    #[tokio::test]
    async fn test_auto_retry_disabled() {
        let config = MultiJobConfiguration {
            enable_auto_retry: false,
            ..Default::default()
        };
        let h = harness(config, Duration::ZERO);
        h.add_job("a").await;
        h.factory.fail_transiently(&h.source_of("a"), 1);

        h.runner.start_job("a").await.unwrap();
        idle(&h).await;
        assert_eq!(h.runner.get_job_status("a"), Some(JobStatus::Failed));
    }

    #[tokio::test]
    async fn test_failed_dependency_blocks_dependent_until_requeued() {
        let h = harness(MultiJobConfiguration::default(), Duration::ZERO);
        h.add_job("x").await;
        h.add_job("y").await;
        h.factory.fail_transiently(&h.source_of("x"), 4);

        h.service().queue_job("x", None, 0).await.unwrap();
        h.service()
            .queue_job_with_dependencies("y", &["x".to_string()], None, 0)
            .await
            .unwrap();
        idle(&h).await;

        assert_eq!(h.runner.get_job_status("x"), Some(JobStatus::Failed));
        assert_eq!(h.runner.get_job_status("y"), Some(JobStatus::Queued));
        assert_eq!(h.factory.attempts(&h.source_of("y")), 0);

        h.factory.clear_failures(&h.source_of("x"));
        h.runner.start_job("x").await.unwrap();
        idle(&h).await;

        assert_eq!(h.runner.get_job_status("x"), Some(JobStatus::Completed));
        assert_eq!(h.runner.get_job_status("y"), Some(JobStatus::Completed));
        let order: Vec<String> = h.factory.transfers().into_iter().map(|(s, _)| s).collect();
        assert_eq!(order, vec![h.source_of("x"), h.source_of("y")]);
    }

    #[tokio::test]
    async fn test_global_cap_is_never_exceeded() {
        let config = MultiJobConfiguration {
            global_max_concurrent_jobs: 2,
            default_queue_max_concurrent_jobs: 10,
            ..Default::default()
        };
        let h = harness(config, Duration::from_millis(30));
        let ids: Vec<JobId> = (0..6).map(|i| format!("job{}", i)).collect();
        for id in &ids {
            h.add_job(id).await;
        }

        let results = h.runner.start_multiple_jobs(&ids).await;
        assert!(results.iter().all(|(_, r)| r.is_ok()));
        assert_eq!(h.runner.tick().await.unwrap(), 2);
        assert_eq!(h.runner.running_jobs().len(), 2);

        idle(&h).await;
        assert_eq!(h.factory.transfers().len(), 6);
        assert!(h.factory.max_in_flight() <= 2);
    }

    #[tokio::test]
    async fn test_priority_order_in_single_slot_queue() {
        let h = harness(MultiJobConfiguration::default(), Duration::ZERO);
        let queue = h.service().create_queue("serial", 1, 3).await.unwrap();
        for (id, priority) in [("p1", 1), ("p10", 10), ("p5", 5)] {
            h.add_job(id).await;
            h.service()
                .queue_job(id, Some(&queue.id), priority)
                .await
                .unwrap();
        }

        idle(&h).await;
        let order: Vec<String> = h.factory.transfers().into_iter().map(|(s, _)| s).collect();
        assert_eq!(
            order,
            vec![h.source_of("p10"), h.source_of("p5"), h.source_of("p1")]
        );
    }

    #[tokio::test]
    async fn test_stop_running_job() {
        let h = harness(MultiJobConfiguration::default(), Duration::from_secs(30));
        h.add_job("slow").await;
        h.runner.start_job("slow").await.unwrap();
        assert_eq!(h.runner.tick().await.unwrap(), 1);

        assert!(h.runner.stop_job("slow").await.unwrap());
        idle(&h).await;
        assert_eq!(h.runner.get_job_status("slow"), Some(JobStatus::Cancelled));
        assert!(h.factory.transfers().is_empty());
    }

    #[tokio::test]
    async fn test_stop_queued_job_never_transfers() {
        let h = harness(MultiJobConfiguration::default(), Duration::ZERO);
        h.add_job("a").await;
        h.runner.start_job("a").await.unwrap();

        assert!(h.runner.stop_job("a").await.unwrap());
        idle(&h).await;
        assert_eq!(h.runner.get_job_status("a"), Some(JobStatus::Cancelled));
        assert_eq!(h.factory.attempts(&h.source_of("a")), 0);
        assert!(!h.runner.stop_job("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_dispatch_releases_its_slot() {
        let h = harness(single_slot(), Duration::ZERO);
        h.add_job("broken").await;
        h.add_job("healthy").await;
        h.service().queue_job("broken", None, 10).await.unwrap();
        h.service().queue_job("healthy", None, 0).await.unwrap();
        h.job_repo.fail_status_updates("broken");

        assert_eq!(h.runner.tick().await.unwrap(), 1);
        assert_eq!(h.runner.get_job_status("broken"), Some(JobStatus::Failed));
        assert!(h.service().running_counts().await.values().all(|&n| n == 0));

        idle(&h).await;
        assert_eq!(h.runner.get_job_status("healthy"), Some(JobStatus::Completed));
        assert_eq!(h.factory.attempts(&h.source_of("broken")), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_attempt_stops_before_retry() {
        let config = MultiJobConfiguration {
            job_timeout_minutes: 1,
            ..Default::default()
        };
        let h = harness(config, Duration::from_secs(600));
        let mut job = h.add_job("stuck").await;
        job.max_retries = 1;
        h.job_repo.save(&job).await.unwrap();

        h.runner.start_job("stuck").await.unwrap();
        tokio::time::timeout(Duration::from_secs(3600), h.runner.process_until_idle())
            .await
            .expect("runner did not become idle")
            .unwrap();

        assert_eq!(h.runner.get_job_status("stuck"), Some(JobStatus::Failed));
        assert_eq!(h.factory.attempts(&h.source_of("stuck")), 2);
        // the first copy had stopped before the retry started its own
        assert_eq!(h.factory.max_in_flight(), 1);
        assert!(h.factory.transfers().is_empty());
        let stats = h.runner.get_statistics("stuck").unwrap();
        assert_eq!(stats.retry_attempts, 1);
        assert!(stats.error_message.unwrap().contains("job timeout"));
    }

    #[tokio::test]
    async fn test_configuration_validation() {
        let h = harness(MultiJobConfiguration::default(), Duration::ZERO);
        assert!(h.runner.set_max_concurrent_jobs(0).is_err());
        h.runner.set_max_concurrent_jobs(7).unwrap();
        assert_eq!(h.runner.get_max_concurrent_jobs(), 7);

        let bad = MultiJobConfiguration {
            queue_processing_interval_seconds: 0,
            ..Default::default()
        };
        assert!(h.runner.update_configuration(bad).is_err());
        assert_eq!(h.runner.get_max_concurrent_jobs(), 7);
    }

    #[tokio::test]
    async fn test_run_loop_stops_on_shutdown() {
        let h = harness(MultiJobConfiguration::default(), Duration::ZERO);
        h.add_job("a").await;
        h.runner.start_job("a").await.unwrap();

        let runner = Arc::new(h.runner);
        let (tx, token) = shutdown_channel();
        let loop_runner = Arc::clone(&runner);
        let handle = tokio::spawn(async move { loop_runner.run(token).await });

        let mut waited = 0;
        while runner.get_job_status("a") != Some(JobStatus::Completed) && waited < 500 {
            sleep(Duration::from_millis(10)).await;
            waited += 1;
        }
        tx.shutdown();
        handle.await.unwrap().unwrap();
        assert_eq!(runner.get_job_status("a"), Some(JobStatus::Completed));
    }
}

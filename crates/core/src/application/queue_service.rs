// Job Queue Service - named queues, dependency graph and admission
use crate::application::status_board::StatusBoard;
use crate::domain::{
    DependencyGraph, DomainError, JobId, JobQueue, JobStatus, MultiJobConfiguration, Priority,
    QueueEntry, QueueId, QueueStatistics, DEFAULT_QUEUE_ID,
};
use crate::error::{AppError, Result};
use crate::port::{IdProvider, JobRepository, QueueRepository, TimeProvider};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Display name of the always-present queue
pub const DEFAULT_QUEUE_NAME: &str = "Default";

/// A job moved from a queue into its running set by one admission pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub job_id: JobId,
    pub queue_id: QueueId,
    pub priority: Priority,
}

#[derive(Default)]
struct QueueState {
    queues: HashMap<QueueId, JobQueue>,
    graph: DependencyGraph,
}

impl QueueState {
    fn holder_of(&self, job_id: &str) -> Option<&JobQueue> {
        self.queues.values().find(|q| q.contains(job_id))
    }

    fn is_admitted(&self, job_id: &str) -> bool {
        self.queues.values().any(|q| q.running().contains(job_id))
    }

    /// Queue ids by descending queue priority, then age
    fn ordered_ids(&self) -> Vec<QueueId> {
        let mut queues: Vec<&JobQueue> = self.queues.values().collect();
        queues.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        queues.into_iter().map(|q| q.id.clone()).collect()
    }
}

/// Owns every queue and the cross-queue dependency graph.
///
/// All mutations happen under one async mutex and are written through to the
/// `QueueRepository` before the lock is released.
pub struct JobQueueService {
    state: Mutex<QueueState>,
    board: Arc<StatusBoard>,
    job_repo: Arc<dyn JobRepository>,
    queue_repo: Arc<dyn QueueRepository>,
    time_provider: Arc<dyn TimeProvider>,
    id_provider: Arc<dyn IdProvider>,
    dependency_checking: AtomicBool,
    prioritization: AtomicBool,
}

impl JobQueueService {
    /// Create the service with an in-memory default queue
    pub fn new(
        job_repo: Arc<dyn JobRepository>,
        queue_repo: Arc<dyn QueueRepository>,
        board: Arc<StatusBoard>,
        time_provider: Arc<dyn TimeProvider>,
        id_provider: Arc<dyn IdProvider>,
        config: &MultiJobConfiguration,
    ) -> Result<Self> {
        config.validate()?;
        let default_queue = JobQueue::new(
            DEFAULT_QUEUE_ID,
            DEFAULT_QUEUE_NAME,
            config.default_queue_max_concurrent_jobs,
            0,
            time_provider.now_millis(),
        )?;
        let mut state = QueueState::default();
        state
            .queues
            .insert(default_queue.id.clone(), default_queue);

        Ok(Self {
            state: Mutex::new(state),
            board,
            job_repo,
            queue_repo,
            time_provider,
            id_provider,
            dependency_checking: AtomicBool::new(config.enable_dependency_checking),
            prioritization: AtomicBool::new(config.enable_job_prioritization),
        })
    }

    pub fn apply_configuration(&self, config: &MultiJobConfiguration) {
        self.dependency_checking
            .store(config.enable_dependency_checking, Ordering::SeqCst);
        self.prioritization
            .store(config.enable_job_prioritization, Ordering::SeqCst);
    }

    pub fn status_board(&self) -> &Arc<StatusBoard> {
        &self.board
    }

    /// Restore persisted queues and rebuild the dependency graph
    ///
    /// Returns the number of pending entries restored.
    pub async fn load(&self) -> Result<usize> {
        let stored = self.queue_repo.get_all_queues().await?;
        let has_default = stored.iter().any(|q| q.id == DEFAULT_QUEUE_ID);

        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        for queue in stored {
            state.queues.insert(queue.id.clone(), queue);
        }

        state.graph = DependencyGraph::new();
        let mut restored = 0;
        for queue in state.queues.values() {
            for entry in queue.entries() {
                restored += 1;
                if let Err(e) = state.graph.add(&entry.job_id, &entry.dependencies) {
                    warn!(
                        job_id = %entry.job_id,
                        queue_id = %queue.id,
                        error = %e,
                        "Dropping dependency edges of restored entry"
                    );
                }
            }
        }

        if !has_default {
            if let Some(default_queue) = state.queues.get(DEFAULT_QUEUE_ID) {
                self.queue_repo.save_queue(default_queue).await?;
            }
        }

        info!(
            queues = state.queues.len(),
            entries = restored,
            edges = state.graph.edge_count(),
            "Queues restored"
        );
        Ok(restored)
    }

    /// Create a queue with a generated id
    ///
    /// # Errors
    /// - `InvalidConfig` if `max_concurrent_jobs` is 0
    pub async fn create_queue(
        &self,
        name: &str,
        max_concurrent_jobs: usize,
        capacity_hint: usize,
    ) -> Result<JobQueue> {
        let id = self.id_provider.generate_id();
        let queue = JobQueue::new(
            id,
            name,
            max_concurrent_jobs,
            capacity_hint,
            self.time_provider.now_millis(),
        )?;

        let mut state = self.state.lock().await;
        self.queue_repo.save_queue(&queue).await?;
        state.queues.insert(queue.id.clone(), queue.clone());

        info!(
            queue_id = %queue.id,
            name = %queue.name,
            max_concurrent_jobs = max_concurrent_jobs,
            "Queue created"
        );
        Ok(queue)
    }

    /// Create or reconfigure a queue with a caller-chosen id
    pub async fn ensure_queue(
        &self,
        id: &str,
        name: &str,
        max_concurrent_jobs: usize,
        priority: i32,
    ) -> Result<JobQueue> {
        let mut state = self.state.lock().await;
        let queue = match state.queues.get_mut(id) {
            Some(existing) => {
                if max_concurrent_jobs == 0 {
                    return Err(DomainError::InvalidConfig(
                        "max concurrent jobs must be greater than 0".to_string(),
                    )
                    .into());
                }
                existing.name = name.to_string();
                existing.max_concurrent_jobs = max_concurrent_jobs;
                existing.priority = priority;
                existing.clone()
            }
            None => {
                let mut queue = JobQueue::new(
                    id,
                    name,
                    max_concurrent_jobs,
                    0,
                    self.time_provider.now_millis(),
                )?;
                queue.priority = priority;
                state.queues.insert(queue.id.clone(), queue.clone());
                queue
            }
        };
        self.queue_repo.save_queue(&queue).await?;
        debug!(queue_id = %id, priority = priority, "Queue ensured");
        Ok(queue)
    }

    /// Queue a job without dependencies
    pub async fn queue_job(
        &self,
        job_id: &str,
        queue_id: Option<&str>,
        priority: Priority,
    ) -> Result<QueueEntry> {
        self.queue_job_with_dependencies(job_id, &[], queue_id, priority)
            .await
    }

    /// Queue a job that may only start after every dependency completed
    ///
    /// # Errors
    /// - `JobNotFound` if the job or a dependency is unknown
    /// - `QueueNotFound` if the queue is unknown
    /// - `Duplicate` if the job is already pending in any queue
    /// - `InvalidState` if the job is currently running or retrying
    /// - `CycleDetected` if the edges would close a cycle (graph unchanged)
    pub async fn queue_job_with_dependencies(
        &self,
        job_id: &str,
        dependencies: &[JobId],
        queue_id: Option<&str>,
        priority: Priority,
    ) -> Result<QueueEntry> {
        let mut job = self
            .job_repo
            .get_by_id(job_id)
            .await?
            .ok_or_else(|| DomainError::JobNotFound(job_id.to_string()))?;
        if !job.enabled {
            return Err(AppError::Validation(format!("job {} is disabled", job_id)));
        }

        let dependencies: BTreeSet<JobId> = dependencies.iter().cloned().collect();
        for dep in dependencies.iter().filter(|d| d.as_str() != job_id) {
            match self.job_repo.get_by_id(dep).await? {
                Some(dep_job) => self.board.seed(&dep_job.id, dep_job.status),
                None => return Err(DomainError::JobNotFound(dep.clone()).into()),
            }
        }

        let queue_id = queue_id.unwrap_or(DEFAULT_QUEUE_ID).to_string();
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        if !state.queues.contains_key(&queue_id) {
            return Err(DomainError::QueueNotFound(queue_id).into());
        }
        if let Some(holder) = state.holder_of(job_id) {
            return Err(DomainError::Duplicate {
                job_id: job_id.to_string(),
                queue_id: holder.id.clone(),
            }
            .into());
        }
        let current = self.board.get(job_id).unwrap_or(job.status);
        if current.is_active() || state.is_admitted(job_id) {
            return Err(AppError::InvalidState(format!(
                "job {} is {} and cannot be queued",
                job_id, current
            )));
        }
        state.graph.check_acyclic(job_id, &dependencies)?;

        job.status = current;
        if job.status != JobStatus::Queued {
            job.enqueue()?;
        }

        let now = self.time_provider.now_millis();
        let dependency_count = dependencies.len();
        state.graph.add(job_id, &dependencies)?;
        let queue = state
            .queues
            .get_mut(&queue_id)
            .ok_or_else(|| DomainError::QueueNotFound(queue_id.clone()))?;
        let entry = queue
            .push(job_id.to_string(), priority, dependencies, now)?
            .clone();
        self.queue_repo.save_queue(queue).await?;
        drop(guard);

        self.job_repo.update_status(&job).await?;
        self.board.set(job_id, JobStatus::Queued, now);

        info!(
            job_id = %job_id,
            queue_id = %queue_id,
            priority = priority,
            dependencies = dependency_count,
            "Job queued"
        );
        Ok(entry)
    }

    fn ready_entries<'a>(&self, queue: &'a JobQueue) -> Vec<&'a QueueEntry> {
        let prioritize = self.prioritization.load(Ordering::SeqCst);
        let check_dependencies = self.dependency_checking.load(Ordering::SeqCst);
        queue
            .ordered_entries(prioritize)
            .into_iter()
            .filter(|entry| !check_dependencies || entry.is_ready(|dep| self.board.get(dep)))
            .collect()
    }

    /// Pending jobs of a queue whose dependencies have all completed,
    /// in admission order
    pub async fn get_ready_jobs(&self, queue_id: &str) -> Result<Vec<JobId>> {
        let state = self.state.lock().await;
        let queue = state
            .queues
            .get(queue_id)
            .ok_or_else(|| DomainError::QueueNotFound(queue_id.to_string()))?;
        Ok(self
            .ready_entries(queue)
            .into_iter()
            .map(|e| e.job_id.clone())
            .collect())
    }

    pub async fn get_all_queue_statistics(&self) -> Vec<QueueStatistics> {
        let state = self.state.lock().await;
        state
            .ordered_ids()
            .iter()
            .filter_map(|id| state.queues.get(id))
            .map(JobQueue::statistics)
            .collect()
    }

    pub async fn get_queue(&self, queue_id: &str) -> Result<JobQueue> {
        self.state
            .lock()
            .await
            .queues
            .get(queue_id)
            .cloned()
            .ok_or_else(|| DomainError::QueueNotFound(queue_id.to_string()).into())
    }

    pub async fn list_queues(&self) -> Vec<JobQueue> {
        let state = self.state.lock().await;
        state
            .ordered_ids()
            .iter()
            .filter_map(|id| state.queues.get(id))
            .cloned()
            .collect()
    }

    /// Queue currently holding a pending entry for the job
    pub async fn queue_of(&self, job_id: &str) -> Option<QueueId> {
        self.state
            .lock()
            .await
            .holder_of(job_id)
            .map(|q| q.id.clone())
    }

    /// Every job with a pending entry in some queue
    pub async fn pending_job_ids(&self) -> HashSet<JobId> {
        self.state
            .lock()
            .await
            .queues
            .values()
            .flat_map(|q| q.entries().iter().map(|e| e.job_id.clone()))
            .collect()
    }

    /// Take a pending job out of its queue; it returns to `Pending`
    pub async fn remove_job(&self, job_id: &str) -> Result<bool> {
        self.withdraw(job_id, JobStatus::Pending).await
    }

    /// Take a pending job out of its queue and mark it `Cancelled`
    pub async fn cancel_queued(&self, job_id: &str) -> Result<bool> {
        self.withdraw(job_id, JobStatus::Cancelled).await
    }

    async fn withdraw(&self, job_id: &str, to: JobStatus) -> Result<bool> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let Some(queue) = state.queues.values_mut().find(|q| q.contains(job_id)) else {
            return Ok(false);
        };
        queue.remove(job_id);
        state.graph.remove(job_id);
        self.queue_repo.save_queue(queue).await?;
        drop(guard);

        let now = self.time_provider.now_millis();
        if let Some(mut job) = self.job_repo.get_by_id(job_id).await? {
            job.status = self.board.get(job_id).unwrap_or(job.status);
            match job.apply_status(to, now) {
                Ok(()) => self.job_repo.update_status(&job).await?,
                Err(e) => warn!(job_id = %job_id, error = %e, "Status not persisted on withdraw"),
            }
        }
        self.board.set(job_id, to, now);

        info!(job_id = %job_id, status = %to, "Job withdrawn from queue");
        Ok(true)
    }

    pub async fn set_queue_active(&self, queue_id: &str, active: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        let queue = state
            .queues
            .get_mut(queue_id)
            .ok_or_else(|| DomainError::QueueNotFound(queue_id.to_string()))?;
        queue.active = active;
        self.queue_repo.save_queue(queue).await?;
        info!(queue_id = %queue_id, active = active, "Queue activity changed");
        Ok(())
    }

    /// Delete an empty, idle queue (never the default queue)
    pub async fn delete_queue(&self, queue_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if queue_id == DEFAULT_QUEUE_ID {
            return Err(AppError::InvalidState(
                "the default queue cannot be deleted".to_string(),
            ));
        }
        let queue = state
            .queues
            .get(queue_id)
            .ok_or_else(|| DomainError::QueueNotFound(queue_id.to_string()))?;
        if !queue.entries().is_empty() || queue.running_count() > 0 {
            return Err(AppError::InvalidState(format!(
                "queue {} still has {} pending and {} running jobs",
                queue_id,
                queue.entries().len(),
                queue.running_count()
            )));
        }
        self.queue_repo.delete_queue(queue_id).await?;
        state.queues.remove(queue_id);
        info!(queue_id = %queue_id, "Queue deleted");
        Ok(())
    }

    /// Pending entries that directly or transitively wait on `job_id`
    pub async fn dependents_of(&self, job_id: &str) -> Vec<JobId> {
        let state = self.state.lock().await;
        state
            .graph
            .transitive_dependents(job_id)
            .into_iter()
            .filter(|id| state.holder_of(id).is_some())
            .collect()
    }

    /// One admission pass over all active queues.
    ///
    /// Queues are visited in priority order, one admission per queue per
    /// round, until `global_slots` is used up or no queue can admit more.
    /// Admitted entries move into their queue's running set.
    pub async fn admit_ready(&self, global_slots: usize) -> Result<Vec<Admission>> {
        if global_slots == 0 {
            return Ok(Vec::new());
        }

        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let mut candidates: Vec<(QueueId, VecDeque<JobId>)> = state
            .ordered_ids()
            .into_iter()
            .filter_map(|id| state.queues.get(&id))
            .filter(|q| q.active && q.has_capacity())
            .map(|q| {
                let ready = self
                    .ready_entries(q)
                    .into_iter()
                    .map(|e| e.job_id.clone())
                    .collect();
                (q.id.clone(), ready)
            })
            .collect();

        let mut admitted = Vec::new();
        let mut remaining = global_slots;
        loop {
            let mut progressed = false;
            for (queue_id, ready) in candidates.iter_mut() {
                if remaining == 0 {
                    break;
                }
                let Some(queue) = state.queues.get_mut(queue_id.as_str()) else {
                    continue;
                };
                if !queue.has_capacity() {
                    continue;
                }
                let Some(job_id) = ready.pop_front() else {
                    continue;
                };
                if let Some(entry) = queue.admit(&job_id) {
                    state.graph.remove(&job_id);
                    debug!(job_id = %job_id, queue_id = %queue_id, "Job admitted");
                    admitted.push(Admission {
                        job_id,
                        queue_id: queue_id.clone(),
                        priority: entry.priority,
                    });
                    remaining -= 1;
                    progressed = true;
                }
            }
            if !progressed || remaining == 0 {
                break;
            }
        }

        let touched: BTreeSet<&str> = admitted.iter().map(|a| a.queue_id.as_str()).collect();
        for queue_id in touched {
            if let Some(queue) = state.queues.get(queue_id) {
                self.queue_repo.save_queue(queue).await?;
            }
        }
        Ok(admitted)
    }

    /// Release an admitted job's slot and count its terminal status
    pub async fn finish(&self, job_id: &str, queue_id: &str, status: JobStatus) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(queue) = state.queues.get_mut(queue_id) {
            if queue.finish(job_id, status) {
                self.queue_repo.save_queue(queue).await?;
            }
        }
        Ok(())
    }

    /// Running jobs per queue, as tracked by admissions
    pub async fn running_counts(&self) -> HashMap<QueueId, usize> {
        self.state
            .lock()
            .await
            .queues
            .values()
            .map(|q| (q.id.clone(), q.running_count()))
            .collect()
    }
}

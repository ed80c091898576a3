// Job Repository Port (Interface)

use crate::domain::{JobStatus, SyncJob};
use crate::error::Result;
use async_trait::async_trait;

/// Repository interface for SyncJob persistence
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert or replace a job definition
    async fn save(&self, job: &SyncJob) -> Result<()>;

    /// Find job by ID
    async fn get_by_id(&self, id: &str) -> Result<Option<SyncJob>>;

    /// All jobs, oldest first
    async fn get_all(&self) -> Result<Vec<SyncJob>>;

    /// Persist only the status and run timestamps of an existing job
    ///
    /// # Errors
    /// - `AppError::NotFound` if the job does not exist
    async fn update_status(&self, job: &SyncJob) -> Result<()>;

    /// Delete a job definition, returning whether it existed
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Find all jobs in a status (for recovery)
    async fn find_by_status(&self, status: JobStatus) -> Result<Vec<SyncJob>>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    /// HashMap-backed repository
    #[derive(Default)]
    pub struct InMemoryJobRepository {
        jobs: Mutex<HashMap<String, SyncJob>>,
        broken_status_updates: Mutex<HashSet<String>>,
    }

    impl InMemoryJobRepository {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_jobs(jobs: impl IntoIterator<Item = SyncJob>) -> Self {
            let repo = Self::default();
            {
                let mut map = repo.jobs.lock().unwrap();
                for job in jobs {
                    map.insert(job.id.clone(), job);
                }
            }
            repo
        }

        /// Make every later `update_status` of `id` fail like a dropped connection
        pub fn fail_status_updates(&self, id: &str) {
            self.broken_status_updates
                .lock()
                .unwrap()
                .insert(id.to_string());
        }
    }

    #[async_trait]
    impl JobRepository for InMemoryJobRepository {
        async fn save(&self, job: &SyncJob) -> Result<()> {
            self.jobs
                .lock()
                .unwrap()
                .insert(job.id.clone(), job.clone());
            Ok(())
        }

        async fn get_by_id(&self, id: &str) -> Result<Option<SyncJob>> {
            Ok(self.jobs.lock().unwrap().get(id).cloned())
        }

        async fn get_all(&self) -> Result<Vec<SyncJob>> {
            let mut jobs: Vec<SyncJob> = self.jobs.lock().unwrap().values().cloned().collect();
            jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
            Ok(jobs)
        }

        async fn update_status(&self, job: &SyncJob) -> Result<()> {
            if self.broken_status_updates.lock().unwrap().contains(&job.id) {
                return Err(AppError::Database("database is locked".to_string()));
            }
            let mut jobs = self.jobs.lock().unwrap();
            let stored = jobs
                .get_mut(&job.id)
                .ok_or_else(|| AppError::NotFound(format!("job {}", job.id)))?;
            stored.status = job.status;
            stored.last_run_at = job.last_run_at;
            stored.finished_at = job.finished_at;
            Ok(())
        }

        async fn delete(&self, id: &str) -> Result<bool> {
            Ok(self.jobs.lock().unwrap().remove(id).is_some())
        }

        async fn find_by_status(&self, status: JobStatus) -> Result<Vec<SyncJob>> {
            let mut jobs: Vec<SyncJob> = self
                .jobs
                .lock()
                .unwrap()
                .values()
                .filter(|j| j.status == status)
                .cloned()
                .collect();
            jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
            Ok(jobs)
        }
    }
}

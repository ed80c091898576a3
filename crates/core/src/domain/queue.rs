// Queue Domain Model

use crate::domain::error::{DomainError, Result};
use crate::domain::job::{JobId, JobStatus, Priority};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// Queue identifier
pub type QueueId = String;

/// Identifier of the queue that always exists
pub const DEFAULT_QUEUE_ID: &str = "default";

/// One waiting job inside a queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub job_id: JobId,
    pub priority: Priority,
    pub dependencies: BTreeSet<JobId>,
    /// Insertion sequence within the queue (FIFO tie-break)
    pub seq: u64,
    pub queued_at: i64,
}

impl QueueEntry {
    /// Ready iff every dependency's last recorded status is Completed
    pub fn is_ready<F>(&self, status_of: F) -> bool
    where
        F: Fn(&JobId) -> Option<JobStatus>,
    {
        self.dependencies
            .iter()
            .all(|dep| status_of(dep) == Some(JobStatus::Completed))
    }
}

/// Named, capacity-bounded admission lane
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobQueue {
    pub id: QueueId,
    pub name: String,
    pub max_concurrent_jobs: usize,
    /// Queues with higher priority are visited first in each admission pass
    pub priority: i32,
    pub active: bool,
    pub created_at: i64,
    pub completed_count: u64,
    pub failed_count: u64,
    next_seq: u64,
    entries: Vec<QueueEntry>,
    /// Jobs admitted from this queue and not yet reported back
    #[serde(skip)]
    running: HashSet<JobId>,
}

impl JobQueue {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        max_concurrent_jobs: usize,
        capacity_hint: usize,
        created_at: i64,
    ) -> Result<Self> {
        if max_concurrent_jobs == 0 {
            return Err(DomainError::InvalidConfig(
                "max concurrent jobs must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            id: id.into(),
            name: name.into(),
            max_concurrent_jobs,
            priority: 0,
            active: true,
            created_at,
            completed_count: 0,
            failed_count: 0,
            next_seq: 0,
            entries: Vec::with_capacity(capacity_hint),
            running: HashSet::new(),
        })
    }

    /// Rebuild a queue from persisted parts
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: QueueId,
        name: String,
        max_concurrent_jobs: usize,
        priority: i32,
        active: bool,
        created_at: i64,
        completed_count: u64,
        failed_count: u64,
        mut entries: Vec<QueueEntry>,
    ) -> Self {
        entries.sort_by_key(|e| e.seq);
        let next_seq = entries.last().map(|e| e.seq + 1).unwrap_or(0);
        Self {
            id,
            name,
            max_concurrent_jobs: max_concurrent_jobs.max(1),
            priority,
            active,
            created_at,
            completed_count,
            failed_count,
            next_seq,
            entries,
            running: HashSet::new(),
        }
    }

    pub fn entries(&self) -> &[QueueEntry] {
        &self.entries
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.entries.iter().any(|e| e.job_id == job_id)
    }

    pub fn entry(&self, job_id: &str) -> Option<&QueueEntry> {
        self.entries.iter().find(|e| e.job_id == job_id)
    }

    pub fn running(&self) -> &HashSet<JobId> {
        &self.running
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    pub fn has_capacity(&self) -> bool {
        self.running.len() < self.max_concurrent_jobs
    }

    /// Append an entry; a job appears at most once per queue
    pub fn push(
        &mut self,
        job_id: JobId,
        priority: Priority,
        dependencies: BTreeSet<JobId>,
        queued_at: i64,
    ) -> Result<&QueueEntry> {
        if self.contains(&job_id) {
            return Err(DomainError::Duplicate {
                job_id,
                queue_id: self.id.clone(),
            });
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(QueueEntry {
            job_id,
            priority,
            dependencies,
            seq,
            queued_at,
        });
        Ok(&self.entries[self.entries.len() - 1])
    }

    pub fn remove(&mut self, job_id: &str) -> Option<QueueEntry> {
        let pos = self.entries.iter().position(|e| e.job_id == job_id)?;
        Some(self.entries.remove(pos))
    }

    /// Move an entry into the running set
    pub fn admit(&mut self, job_id: &str) -> Option<QueueEntry> {
        let entry = self.remove(job_id)?;
        self.running.insert(entry.job_id.clone());
        Some(entry)
    }

    /// Record that an admitted job reached a terminal status
    pub fn finish(&mut self, job_id: &str, status: JobStatus) -> bool {
        if !self.running.remove(job_id) {
            return false;
        }
        match status {
            JobStatus::Completed => self.completed_count += 1,
            JobStatus::Failed => self.failed_count += 1,
            _ => {}
        }
        true
    }

    /// Entries ordered for admission: priority desc, then FIFO
    pub fn ordered_entries(&self, prioritize: bool) -> Vec<&QueueEntry> {
        let mut ordered: Vec<&QueueEntry> = self.entries.iter().collect();
        if prioritize {
            ordered.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
        } else {
            ordered.sort_by_key(|e| e.seq);
        }
        ordered
    }

    pub fn statistics(&self) -> QueueStatistics {
        let pending = self.entries.len() as u64;
        let running = self.running.len() as u64;
        let finished = self.completed_count + self.failed_count;
        let success_rate = if finished == 0 {
            0.0
        } else {
            self.completed_count as f64 / finished as f64 * 100.0
        };
        QueueStatistics {
            queue_id: self.id.clone(),
            queue_name: self.name.clone(),
            total_jobs: pending + running + finished,
            pending_jobs: pending,
            running_jobs: running,
            completed_jobs: self.completed_count,
            failed_jobs: self.failed_count,
            success_rate,
            is_active: self.active,
            max_concurrent_jobs: self.max_concurrent_jobs,
        }
    }
}

/// Derived, read-only snapshot of one queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStatistics {
    pub queue_id: QueueId,
    pub queue_name: String,
    pub total_jobs: u64,
    pub pending_jobs: u64,
    pub running_jobs: u64,
    pub completed_jobs: u64,
    pub failed_jobs: u64,
    /// Percent of finished jobs that completed
    pub success_rate: f64,
    pub is_active: bool,
    pub max_concurrent_jobs: usize,
}

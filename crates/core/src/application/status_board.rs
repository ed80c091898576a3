// Status board: shared job statuses, last statistics and the event stream
use crate::domain::{JobEvent, JobId, JobStatus, TransferStatistics};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tokio::sync::broadcast;

/// Capacity of the event channel; slow subscribers observe `Lagged`
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Thread-safe map of the latest status (and statistics) per job.
///
/// Many readers (queue readiness checks, status queries), writers are the
/// runner tick and job tasks. Every status change is also published as a
/// `JobEvent::StatusChanged`.
pub struct StatusBoard {
    statuses: RwLock<HashMap<JobId, JobStatus>>,
    statistics: RwLock<HashMap<JobId, TransferStatistics>>,
    events: broadcast::Sender<JobEvent>,
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBoard {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            statuses: RwLock::new(HashMap::new()),
            statistics: RwLock::new(HashMap::new()),
            events,
        }
    }

    pub fn get(&self, job_id: &str) -> Option<JobStatus> {
        self.statuses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_id)
            .copied()
    }

    /// Record a status change and publish it
    pub fn set(&self, job_id: &str, status: JobStatus, at: i64) {
        self.statuses
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_id.to_string(), status);
        self.publish(JobEvent::StatusChanged {
            job_id: job_id.to_string(),
            status,
            at,
        });
    }

    /// Record a status without publishing, unless one is already known
    pub fn seed(&self, job_id: &str, status: JobStatus) {
        self.statuses
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(job_id.to_string())
            .or_insert(status);
    }

    pub fn remove(&self, job_id: &str) {
        self.statuses
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(job_id);
        self.statistics
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(job_id);
    }

    pub fn snapshot(&self) -> HashMap<JobId, JobStatus> {
        self.statuses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count_where(&self, predicate: impl Fn(JobStatus) -> bool) -> usize {
        self.statuses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|s| predicate(**s))
            .count()
    }

    pub fn statistics(&self, job_id: &str) -> Option<TransferStatistics> {
        self.statistics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_id)
            .cloned()
    }

    pub fn set_statistics(&self, statistics: TransferStatistics) {
        self.statistics
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(statistics.job_id.clone(), statistics);
    }

    pub fn publish(&self, event: JobEvent) {
        // No subscribers is not an error
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }
}

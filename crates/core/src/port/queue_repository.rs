// Queue Repository Port (Interface)

use crate::domain::JobQueue;
use crate::error::Result;
use async_trait::async_trait;

/// Durable store for queues and their pending entries
#[async_trait]
pub trait QueueRepository: Send + Sync {
    /// Insert or replace a queue together with all of its pending entries
    async fn save_queue(&self, queue: &JobQueue) -> Result<()>;

    /// Every stored queue with its entries
    async fn get_all_queues(&self) -> Result<Vec<JobQueue>>;

    /// Delete a queue and its entries, returning whether it existed
    async fn delete_queue(&self, id: &str) -> Result<bool>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct InMemoryQueueRepository {
        queues: Mutex<HashMap<String, JobQueue>>,
        save_count: Mutex<usize>,
    }

    impl InMemoryQueueRepository {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn save_count(&self) -> usize {
            *self.save_count.lock().unwrap()
        }
    }

    #[async_trait]
    impl QueueRepository for InMemoryQueueRepository {
        async fn save_queue(&self, queue: &JobQueue) -> Result<()> {
            *self.save_count.lock().unwrap() += 1;
            self.queues
                .lock()
                .unwrap()
                .insert(queue.id.clone(), queue.clone());
            Ok(())
        }

        async fn get_all_queues(&self) -> Result<Vec<JobQueue>> {
            Ok(self.queues.lock().unwrap().values().cloned().collect())
        }

        async fn delete_queue(&self, id: &str) -> Result<bool> {
            Ok(self.queues.lock().unwrap().remove(id).is_some())
        }
    }
}

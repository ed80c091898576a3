// Resume Store Port
// Durable per-file transfer checkpoints

use crate::port::transfer_client::TransferResult;
use serde::{Deserialize, Serialize};

/// Identifies one source file going to one destination
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResumeKey {
    pub source: String,
    pub destination: String,
}

impl ResumeKey {
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }
}

/// Last durable offset of a partially transferred file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeCheckpoint {
    pub source: String,
    /// Source fingerprint at the time the transfer started
    pub source_size: u64,
    pub source_mtime: Option<i64>,
    pub destination: String,
    pub bytes_committed: u64,
    /// Destination modification time observed right after the last commit
    pub destination_mtime: Option<i64>,
    pub updated_at: i64,
}

impl ResumeCheckpoint {
    pub fn key(&self) -> ResumeKey {
        ResumeKey::new(self.source.clone(), self.destination.clone())
    }

    /// Offset to continue from, or `None` when the transfer must restart.
    ///
    /// Any change to the source fingerprint invalidates the checkpoint. The
    /// destination must still hold exactly the committed prefix; its mtime is
    /// compared only when both sides know it.
    pub fn resume_offset(
        &self,
        source_size: u64,
        source_mtime: Option<i64>,
        destination_size: Option<u64>,
        destination_mtime: Option<i64>,
    ) -> Option<u64> {
        if self.source_size != source_size || self.source_mtime != source_mtime {
            return None;
        }
        if destination_size != Some(self.bytes_committed) {
            return None;
        }
        if let (Some(recorded), Some(current)) = (self.destination_mtime, destination_mtime) {
            if recorded != current {
                return None;
            }
        }
        if self.bytes_committed == 0 || self.bytes_committed > source_size {
            return None;
        }
        Some(self.bytes_committed)
    }
}

/// Checkpoint persistence (called from blocking transfer code)
pub trait ResumeStore: Send + Sync {
    fn load(&self, key: &ResumeKey) -> TransferResult<Option<ResumeCheckpoint>>;

    fn save(&self, checkpoint: &ResumeCheckpoint) -> TransferResult<()>;

    fn remove(&self, key: &ResumeKey) -> TransferResult<()>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct InMemoryResumeStore {
        checkpoints: Mutex<HashMap<ResumeKey, ResumeCheckpoint>>,
    }

    impl InMemoryResumeStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn len(&self) -> usize {
            self.checkpoints.lock().unwrap().len()
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }
    }

    impl ResumeStore for InMemoryResumeStore {
        fn load(&self, key: &ResumeKey) -> TransferResult<Option<ResumeCheckpoint>> {
            Ok(self.checkpoints.lock().unwrap().get(key).cloned())
        }

        fn save(&self, checkpoint: &ResumeCheckpoint) -> TransferResult<()> {
            self.checkpoints
                .lock()
                .unwrap()
                .insert(checkpoint.key(), checkpoint.clone());
            Ok(())
        }

        fn remove(&self, key: &ResumeKey) -> TransferResult<()> {
            self.checkpoints.lock().unwrap().remove(key);
            Ok(())
        }
    }
}

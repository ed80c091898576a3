// File-backed resume checkpoints (one JSON document per source/destination pair)
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tidesync_core::port::{ResumeCheckpoint, ResumeKey, ResumeStore, TransferError, TransferResult};
use tracing::{debug, warn};

/// Directory name under the system temp dir used when no resume dir is set
pub const RESUME_DIR_NAME: &str = "tidesync-resume";

pub fn default_resume_dir() -> PathBuf {
    std::env::temp_dir().join(RESUME_DIR_NAME)
}

pub struct FileResumeStore {
    dir: PathBuf,
}

impl FileResumeStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_for(&self, key: &ResumeKey) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(key.source.as_bytes());
        hasher.update([0u8]);
        hasher.update(key.destination.as_bytes());
        self.dir
            .join(format!("{}.json", hex::encode(hasher.finalize())))
    }
}

impl ResumeStore for FileResumeStore {
    fn load(&self, key: &ResumeKey) -> TransferResult<Option<ResumeCheckpoint>> {
        let path = self.file_for(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(TransferError::from(e).context("resume checkpoint")),
        };
        match serde_json::from_slice::<ResumeCheckpoint>(&bytes) {
            Ok(checkpoint) if checkpoint.key() == *key => Ok(Some(checkpoint)),
            Ok(_) => Ok(None),
            Err(e) => {
                warn!(checkpoint = %path.display(), error = %e, "Discarding unreadable checkpoint");
                let _ = fs::remove_file(&path);
                Ok(None)
            }
        }
    }

    fn save(&self, checkpoint: &ResumeCheckpoint) -> TransferResult<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.file_for(&checkpoint.key());
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec(checkpoint).map_err(io::Error::from)?;
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &path)?;
        debug!(
            destination = %checkpoint.destination,
            bytes_committed = checkpoint.bytes_committed,
            "Checkpoint saved"
        );
        Ok(())
    }

    fn remove(&self, key: &ResumeKey) -> TransferResult<()> {
        match fs::remove_file(self.file_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

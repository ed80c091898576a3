// Transfer Policy (per job or per connection profile)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default chunk size for stream copies (64 KiB)
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Content hash used for integrity verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Sha512,
    Blake3,
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HashAlgorithm::Sha256 => write!(f, "sha256"),
            HashAlgorithm::Sha512 => write!(f, "sha512"),
            HashAlgorithm::Blake3 => write!(f, "blake3"),
        }
    }
}

/// What to do when the destination already exists and the job allows overwrite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverwritePolicy {
    #[default]
    Always,
    /// Skip when the destination is at least as new as the source
    IfNewer,
}

/// Retry/backoff parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    pub base_delay_ms: u64,
    pub use_exponential: bool,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            use_exponential: true,
            max_delay_ms: 60_000,
        }
    }
}

/// Read-only settings for one transfer attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferPolicy {
    /// Bytes per second, 0 = unlimited
    pub bandwidth_limit_bytes_per_sec: u64,
    pub enable_resume: bool,
    pub resume_state_dir: Option<PathBuf>,
    pub verify_integrity: bool,
    pub hash_algorithm: HashAlgorithm,
    /// Overrides the runner-wide retry delays when set
    pub retry: Option<RetrySettings>,
    pub connection_timeout_secs: u64,
    pub operation_timeout_secs: u64,
    pub buffer_size: usize,
    pub overwrite_policy: OverwritePolicy,
    pub preserve_timestamps: bool,
    /// Where locked-file snapshots are written; system temp dir when unset
    pub snapshot_dir: Option<PathBuf>,
}

impl Default for TransferPolicy {
    fn default() -> Self {
        Self {
            bandwidth_limit_bytes_per_sec: 0,
            enable_resume: false,
            resume_state_dir: None,
            verify_integrity: false,
            hash_algorithm: HashAlgorithm::Sha256,
            retry: None,
            connection_timeout_secs: 30,
            operation_timeout_secs: 300,
            buffer_size: DEFAULT_BUFFER_SIZE,
            overwrite_policy: OverwritePolicy::Always,
            preserve_timestamps: true,
            snapshot_dir: None,
        }
    }
}

impl TransferPolicy {
    /// Chunk size actually used (never zero)
    pub fn chunk_size(&self) -> usize {
        if self.buffer_size == 0 {
            DEFAULT_BUFFER_SIZE
        } else {
            self.buffer_size
        }
    }

    pub fn is_throttled(&self) -> bool {
        self.bandwidth_limit_bytes_per_sec > 0
    }
}

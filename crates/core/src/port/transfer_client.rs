// Transfer Client Port
// Protocol-polymorphic file transfer (local disk, FTP, SFTP)

use crate::domain::{ConnectionSettings, Protocol, TransferPolicy, TransferProgress};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use thiserror::Error;
use tokio::sync::watch;

/// Classified failure of a transfer operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferErrorKind {
    NotFound,
    AlreadyExists,
    LockedFileCopyFailed,
    IntegrityMismatch,
    Timeout,
    Connection,
    FileLocked,
    TransientIo,
    PermissionDenied,
    InvalidPath,
    DiskFull,
    Authentication,
    Cancelled,
    Unsupported,
    InvalidConfig,
    Protocol,
}

impl TransferErrorKind {
    /// Worth another attempt after a backoff
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            TransferErrorKind::Timeout
                | TransferErrorKind::Connection
                | TransferErrorKind::FileLocked
                | TransferErrorKind::TransientIo
                | TransferErrorKind::IntegrityMismatch
                | TransferErrorKind::LockedFileCopyFailed
        )
    }

    /// The session should be dropped and re-established
    pub fn is_connection_loss(self) -> bool {
        matches!(self, TransferErrorKind::Connection | TransferErrorKind::Timeout)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransferErrorKind::NotFound => "not found",
            TransferErrorKind::AlreadyExists => "already exists",
            TransferErrorKind::LockedFileCopyFailed => "locked file copy failed",
            TransferErrorKind::IntegrityMismatch => "integrity mismatch",
            TransferErrorKind::Timeout => "timeout",
            TransferErrorKind::Connection => "connection error",
            TransferErrorKind::FileLocked => "file locked",
            TransferErrorKind::TransientIo => "transient I/O error",
            TransferErrorKind::PermissionDenied => "permission denied",
            TransferErrorKind::InvalidPath => "invalid path",
            TransferErrorKind::DiskFull => "disk full",
            TransferErrorKind::Authentication => "authentication failed",
            TransferErrorKind::Cancelled => "cancelled",
            TransferErrorKind::Unsupported => "unsupported",
            TransferErrorKind::InvalidConfig => "invalid configuration",
            TransferErrorKind::Protocol => "protocol error",
        }
    }
}

impl std::fmt::Display for TransferErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transfer error: classified kind plus a human-readable message
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct TransferError {
    pub kind: TransferErrorKind,
    pub message: String,
}

impl TransferError {
    pub fn new(kind: TransferErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(path: impl std::fmt::Display) -> Self {
        Self::new(TransferErrorKind::NotFound, format!("{} does not exist", path))
    }

    pub fn already_exists(path: impl std::fmt::Display) -> Self {
        Self::new(
            TransferErrorKind::AlreadyExists,
            format!("{} already exists and overwrite is disabled", path),
        )
    }

    pub fn cancelled() -> Self {
        Self::new(TransferErrorKind::Cancelled, "transfer cancelled")
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == TransferErrorKind::Cancelled
    }

    /// Prefix the message with the operation and path that failed
    pub fn context(mut self, what: impl std::fmt::Display) -> Self {
        self.message = format!("{}: {}", what, self.message);
        self
    }
}

pub type TransferResult<T> = std::result::Result<T, TransferError>;

/// Invoked with per-file progress; must be cheap and non-blocking
pub type ProgressCallback = Arc<dyn Fn(TransferProgress) + Send + Sync>;

/// Cooperative cancellation flag checked after every chunk
///
/// Clones share one flag. A token made with [`CancelToken::child`] fires
/// with its parent but can also be cancelled on its own.
#[derive(Debug, Clone)]
pub struct CancelToken {
    state: Arc<CancelState>,
}

#[derive(Debug)]
struct CancelState {
    tx: watch::Sender<bool>,
    children: Mutex<Vec<Weak<CancelState>>>,
}

impl CancelState {
    fn cancel(&self) {
        self.tx.send_replace(true);
        let children = std::mem::take(
            &mut *self.children.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel();
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            state: Arc::new(CancelState {
                tx,
                children: Mutex::new(Vec::new()),
            }),
        }
    }

    /// New token cancelled whenever this one is
    pub fn child(&self) -> Self {
        let child = Self::new();
        {
            let mut children = self
                .state
                .children
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            children.retain(|c| c.strong_count() > 0);
            children.push(Arc::downgrade(&child.state));
        }
        if self.is_cancelled() {
            child.cancel();
        }
        child
    }

    pub fn cancel(&self) {
        self.state.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.state.tx.borrow()
    }

    /// Resolves once `cancel` has been called
    pub async fn cancelled(&self) {
        let mut rx = self.state.tx.subscribe();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// `Err(Cancelled)` if the token fired
    pub fn check(&self) -> TransferResult<()> {
        if self.is_cancelled() {
            Err(TransferError::cancelled())
        } else {
            Ok(())
        }
    }
}

/// One file found by `list_files`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    /// Full path usable with the other client operations
    pub path: String,
    /// Path relative to the listed root, `/`-separated
    pub relative_path: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// Outcome of one successful file transfer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileTransferReport {
    /// Bytes written during this call (excludes the resumed prefix)
    pub bytes_transferred: u64,
    pub resumed_from: u64,
    pub used_snapshot: bool,
    pub verified: bool,
    pub timestamps_preserved: bool,
}

/// Transfer client capability set.
///
/// Local paths are `&Path`; endpoint paths are `/`-separated strings. For the
/// local adapter the endpoint is simply another directory on this machine.
#[async_trait]
pub trait TransferClient: Send + Sync {
    fn protocol(&self) -> Protocol;

    /// Open (or reuse) the session and perform a cheap round trip
    async fn test_connection(&self) -> TransferResult<()>;

    /// Create the directory and all missing parents
    async fn ensure_directory(&self, path: &str) -> TransferResult<()>;

    /// Send a local file to the endpoint
    ///
    /// # Errors
    /// - `NotFound` if the local file is missing
    /// - `AlreadyExists` if the target exists and `overwrite` is false
    /// - `LockedFileCopyFailed` if a locked source could not be snapshotted
    /// - `IntegrityMismatch` if verification is enabled and hashes differ
    /// - `Cancelled` if the cancel token fired mid-copy
    async fn upload_file(
        &self,
        local_path: &Path,
        remote_path: &str,
        overwrite: bool,
    ) -> TransferResult<FileTransferReport>;

    /// Fetch an endpoint file to the local disk (same contract as upload)
    async fn download_file(
        &self,
        remote_path: &str,
        local_path: &Path,
        overwrite: bool,
    ) -> TransferResult<FileTransferReport>;

    async fn file_exists(&self, path: &str) -> TransferResult<bool>;

    async fn delete_file(&self, path: &str) -> TransferResult<()>;

    /// Files only; a file path yields exactly one entry for that file
    async fn list_files(&self, path: &str, recursive: bool) -> TransferResult<Vec<RemoteEntry>>;

    async fn get_file_modified_time(&self, path: &str) -> TransferResult<Option<DateTime<Utc>>>;

    async fn get_file_size(&self, path: &str) -> TransferResult<u64>;

    fn set_progress_callback(&mut self, callback: Option<ProgressCallback>);

    fn set_cancel_token(&mut self, token: CancelToken);
}

/// Builds the adapter matching a connection's protocol tag
pub trait TransferClientFactory: Send + Sync {
    fn create(
        &self,
        connection: &ConnectionSettings,
        policy: &TransferPolicy,
    ) -> TransferResult<Box<dyn TransferClient>>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::{HashMap, HashSet, VecDeque};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Shared, inspectable state behind every client a mock factory creates
    #[derive(Default)]
    pub struct MockTransferState {
        /// Errors returned (front first) by transfers of a given source path
        pub scripted_failures: HashMap<String, VecDeque<TransferError>>,
        /// Error returned by every transfer of a given source path
        pub permanent_failures: HashMap<String, TransferError>,
        /// Entries returned by `list_files`, keyed by listed path
        pub listings: HashMap<String, Vec<RemoteEntry>>,
        /// Destination paths reported as existing
        pub existing: HashSet<String>,
        /// Completed transfers in order: (source, destination)
        pub transfers: Vec<(String, String)>,
        pub deleted: Vec<String>,
        pub attempts: HashMap<String, usize>,
        pub in_flight: usize,
        pub max_in_flight: usize,
        pub delay: Duration,
        pub create_error: Option<TransferError>,
    }

    /// Mock client that records calls and replays scripted failures
    pub struct MockTransferClient {
        state: Arc<Mutex<MockTransferState>>,
        progress: Option<ProgressCallback>,
        cancel: CancelToken,
    }

    impl MockTransferClient {
        pub fn new(state: Arc<Mutex<MockTransferState>>) -> Self {
            Self {
                state,
                progress: None,
                cancel: CancelToken::new(),
            }
        }

        async fn transfer(&self, source: &str, destination: &str, overwrite: bool) -> TransferResult<FileTransferReport> {
            let delay = {
                let mut state = self.state.lock().unwrap();
                *state.attempts.entry(source.to_string()).or_insert(0) += 1;
                if !overwrite && state.existing.contains(destination) {
                    return Err(TransferError::already_exists(destination));
                }
                if let Some(err) = state.permanent_failures.get(source) {
                    return Err(err.clone());
                }
                if let Some(err) = state
                    .scripted_failures
                    .get_mut(source)
                    .and_then(VecDeque::pop_front)
                {
                    return Err(err);
                }
                state.in_flight += 1;
                state.max_in_flight = state.max_in_flight.max(state.in_flight);
                state.delay
            };

            let outcome = tokio::select! {
                _ = tokio::time::sleep(delay) => Ok(()),
                _ = self.cancel.cancelled() => Err(TransferError::cancelled()),
            };

            let mut state = self.state.lock().unwrap();
            state.in_flight -= 1;
            outcome?;
            state
                .transfers
                .push((source.to_string(), destination.to_string()));
            state.existing.insert(destination.to_string());
            drop(state);

            if let Some(cb) = &self.progress {
                cb(TransferProgress::new(source, 1, 1));
            }
            Ok(FileTransferReport {
                bytes_transferred: 1,
                ..Default::default()
            })
        }
    }

    #[async_trait]
    impl TransferClient for MockTransferClient {
        fn protocol(&self) -> Protocol {
            Protocol::Local
        }

        async fn test_connection(&self) -> TransferResult<()> {
            Ok(())
        }

        async fn ensure_directory(&self, _path: &str) -> TransferResult<()> {
            Ok(())
        }

        async fn upload_file(
            &self,
            local_path: &Path,
            remote_path: &str,
            overwrite: bool,
        ) -> TransferResult<FileTransferReport> {
            let source = local_path.to_string_lossy().to_string();
            self.transfer(&source, remote_path, overwrite).await
        }

        async fn download_file(
            &self,
            remote_path: &str,
            local_path: &Path,
            overwrite: bool,
        ) -> TransferResult<FileTransferReport> {
            let destination = local_path.to_string_lossy().to_string();
            self.transfer(remote_path, &destination, overwrite).await
        }

        async fn file_exists(&self, path: &str) -> TransferResult<bool> {
            Ok(self.state.lock().unwrap().existing.contains(path))
        }

        async fn delete_file(&self, path: &str) -> TransferResult<()> {
            let mut state = self.state.lock().unwrap();
            state.existing.remove(path);
            state.deleted.push(path.to_string());
            Ok(())
        }

        async fn list_files(&self, path: &str, _recursive: bool) -> TransferResult<Vec<RemoteEntry>> {
            self.state
                .lock()
                .unwrap()
                .listings
                .get(path)
                .cloned()
                .ok_or_else(|| TransferError::not_found(path))
        }

        async fn get_file_modified_time(&self, _path: &str) -> TransferResult<Option<DateTime<Utc>>> {
            Ok(None)
        }

        async fn get_file_size(&self, _path: &str) -> TransferResult<u64> {
            Ok(1)
        }

        fn set_progress_callback(&mut self, callback: Option<ProgressCallback>) {
            self.progress = callback;
        }

        fn set_cancel_token(&mut self, token: CancelToken) {
            self.cancel = token;
        }
    }

    /// Factory handing out mock clients over one shared state
    #[derive(Default)]
    pub struct MockTransferClientFactory {
        pub state: Arc<Mutex<MockTransferState>>,
    }

    impl MockTransferClientFactory {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_delay(delay: Duration) -> Self {
            let factory = Self::default();
            factory.state.lock().unwrap().delay = delay;
            factory
        }

        /// Fail the next `times` transfers of `source` with a transient error
        pub fn fail_transiently(&self, source: &str, times: usize) {
            let mut state = self.state.lock().unwrap();
            let queue = state.scripted_failures.entry(source.to_string()).or_default();
            for _ in 0..times {
                queue.push_back(TransferError::new(
                    TransferErrorKind::Connection,
                    "connection reset by peer",
                ));
            }
        }

        pub fn fail_always(&self, source: &str, error: TransferError) {
            self.state
                .lock()
                .unwrap()
                .permanent_failures
                .insert(source.to_string(), error);
        }

        pub fn clear_failures(&self, source: &str) {
            let mut state = self.state.lock().unwrap();
            state.permanent_failures.remove(source);
            state.scripted_failures.remove(source);
        }

        pub fn transfers(&self) -> Vec<(String, String)> {
            self.state.lock().unwrap().transfers.clone()
        }

        pub fn attempts(&self, source: &str) -> usize {
            self.state
                .lock()
                .unwrap()
                .attempts
                .get(source)
                .copied()
                .unwrap_or(0)
        }

        pub fn max_in_flight(&self) -> usize {
            self.state.lock().unwrap().max_in_flight
        }
    }

    impl TransferClientFactory for MockTransferClientFactory {
        fn create(
            &self,
            _connection: &ConnectionSettings,
            _policy: &TransferPolicy,
        ) -> TransferResult<Box<dyn TransferClient>> {
            if let Some(err) = self.state.lock().unwrap().create_error.clone() {
                return Err(err);
            }
            Ok(Box::new(MockTransferClient::new(Arc::clone(&self.state))))
        }
    }
}

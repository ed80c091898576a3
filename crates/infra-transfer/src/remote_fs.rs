// Blocking filesystem view of one protocol session
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::SystemTime;
use tidesync_core::domain::{ConnectionSettings, Protocol, TransferPolicy};
use tidesync_core::port::{RemoteEntry, TransferResult};

/// Metadata of an endpoint path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteStat {
    pub size: u64,
    pub is_dir: bool,
    pub modified: Option<SystemTime>,
    pub accessed: Option<SystemTime>,
}

/// One connected session. Every call blocks and runs on the blocking pool.
pub trait RemoteFs: Send + 'static {
    const PROTOCOL: Protocol;

    fn connect(connection: &ConnectionSettings, policy: &TransferPolicy) -> TransferResult<Self>
    where
        Self: Sized;

    /// Cheap round trip proving the session is alive
    fn ping(&mut self) -> TransferResult<()>;

    fn create_dir_all(&mut self, path: &str) -> TransferResult<()>;

    /// `None` when the path does not exist
    fn stat(&mut self, path: &str) -> TransferResult<Option<RemoteStat>>;

    /// Files under a directory (or the file itself)
    fn list(&mut self, path: &str, recursive: bool) -> TransferResult<Vec<RemoteEntry>>;

    fn remove_file(&mut self, path: &str) -> TransferResult<()>;

    /// Move `from` onto `to`, replacing `to` if it exists
    fn rename(&mut self, from: &str, to: &str) -> TransferResult<()>;

    /// Hand `body` a reader positioned at `offset`
    fn read_with<T>(
        &mut self,
        path: &str,
        offset: u64,
        body: impl FnOnce(&mut dyn Read) -> TransferResult<T>,
    ) -> TransferResult<T>;

    /// Hand `body` a writer; `offset == 0` truncates, otherwise appends at `offset`
    fn write_with<T>(
        &mut self,
        path: &str,
        offset: u64,
        body: impl FnOnce(&mut dyn Write) -> TransferResult<T>,
    ) -> TransferResult<T>;

    /// Returns false when the protocol cannot set timestamps
    fn set_times(
        &mut self,
        path: &str,
        modified: SystemTime,
        accessed: SystemTime,
    ) -> TransferResult<bool>;

    /// The path on this machine, for endpoints that are local disk
    fn local_path(&self, _path: &str) -> Option<PathBuf> {
        None
    }

    /// True once the session can no longer be trusted for another command
    fn needs_reconnect(&self) -> bool {
        false
    }
}

/// Parent of a `/`-separated endpoint path, if any
pub fn remote_parent(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    let idx = trimmed.rfind('/')?;
    if idx == 0 {
        return None;
    }
    Some(&trimmed[..idx])
}

/// Every ancestor prefix of a `/`-separated path, shortest first
pub fn path_prefixes(path: &str) -> Vec<String> {
    let absolute = path.starts_with('/');
    let mut current = String::new();
    let mut prefixes = Vec::new();
    for part in path.split('/').filter(|p| !p.is_empty()) {
        if absolute || !current.is_empty() {
            current.push('/');
        }
        current.push_str(part);
        prefixes.push(current.clone());
    }
    prefixes
}

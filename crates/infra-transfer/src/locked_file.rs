// Locked-file handling: exclusive-lock probe and verified snapshots
use crate::hashing::hash_file;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tidesync_core::domain::HashAlgorithm;
use tidesync_core::port::{TransferError, TransferErrorKind, TransferResult};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Directory name under the system temp dir used when no snapshot dir is set
pub const SNAPSHOT_DIR_NAME: &str = "tidesync-snapshots";

pub fn default_snapshot_dir() -> PathBuf {
    std::env::temp_dir().join(SNAPSHOT_DIR_NAME)
}

/// True when another process holds an exclusive lock on the file
#[cfg(unix)]
pub fn is_locked(path: &Path) -> io::Result<bool> {
    use nix::errno::Errno;
    use nix::fcntl::{Flock, FlockArg};

    let file = File::open(path)?;
    match Flock::lock(file, FlockArg::LockSharedNonblock) {
        // shared lock is released when the guard drops
        Ok(_shared) => Ok(false),
        Err((_, errno)) if errno == Errno::EWOULDBLOCK => Ok(true),
        Err((_, errno)) => Err(io::Error::from(errno)),
    }
}

#[cfg(windows)]
pub fn is_locked(path: &Path) -> io::Result<bool> {
    use std::os::windows::fs::OpenOptionsExt;

    const ERROR_SHARING_VIOLATION: i32 = 32;
    const ERROR_LOCK_VIOLATION: i32 = 33;

    match fs::OpenOptions::new().read(true).share_mode(0).open(path) {
        Ok(_) => Ok(false),
        Err(e)
            if matches!(
                e.raw_os_error(),
                Some(ERROR_SHARING_VIOLATION) | Some(ERROR_LOCK_VIOLATION)
            ) =>
        {
            Ok(true)
        }
        Err(e) => Err(e),
    }
}

#[cfg(not(any(unix, windows)))]
pub fn is_locked(_path: &Path) -> io::Result<bool> {
    Ok(false)
}

/// Open a source for reading while tolerating other readers and writers
#[cfg(windows)]
fn open_shared(path: &Path) -> io::Result<File> {
    use std::os::windows::fs::OpenOptionsExt;

    const FILE_SHARE_ALL: u32 = 0x1 | 0x2 | 0x4;
    fs::OpenOptions::new()
        .read(true)
        .share_mode(FILE_SHARE_ALL)
        .open(path)
}

#[cfg(not(windows))]
fn open_shared(path: &Path) -> io::Result<File> {
    File::open(path)
}

/// Temporary copy of a locked file, deleted when dropped
#[derive(Debug)]
pub struct Snapshot {
    path: PathBuf,
}

impl Snapshot {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(snapshot = %self.path.display(), "Snapshot released"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(snapshot = %self.path.display(), error = %e, "Failed to delete snapshot"),
        }
    }
}

fn copy_failed(source: &Path, reason: impl std::fmt::Display) -> TransferError {
    TransferError::new(
        TransferErrorKind::LockedFileCopyFailed,
        format!("{}: {}", source.display(), reason),
    )
}

/// Copy `source` into `dir` as `<uuid>-<name>` and verify size and SHA-256
pub fn create_snapshot(source: &Path, dir: &Path) -> TransferResult<Snapshot> {
    fs::create_dir_all(dir).map_err(|e| copy_failed(source, e))?;
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    let snapshot = Snapshot {
        path: dir.join(format!("{}-{}", Uuid::new_v4(), name)),
    };

    let mut reader = open_shared(source).map_err(|e| copy_failed(source, e))?;
    let mut writer = File::create(&snapshot.path).map_err(|e| copy_failed(source, e))?;
    io::copy(&mut reader, &mut writer).map_err(|e| copy_failed(source, e))?;
    writer.sync_all().map_err(|e| copy_failed(source, e))?;
    drop(writer);

    let source_len = fs::metadata(source).map_err(|e| copy_failed(source, e))?.len();
    let snapshot_len = fs::metadata(&snapshot.path)
        .map_err(|e| copy_failed(source, e))?
        .len();
    if source_len != snapshot_len {
        return Err(copy_failed(
            source,
            format!("size mismatch ({} != {})", source_len, snapshot_len),
        ));
    }

    let source_hash =
        hash_file(source, HashAlgorithm::Sha256).map_err(|e| copy_failed(source, e))?;
    let snapshot_hash =
        hash_file(&snapshot.path, HashAlgorithm::Sha256).map_err(|e| copy_failed(source, e))?;
    if source_hash != snapshot_hash {
        return Err(copy_failed(source, "content changed while copying"));
    }

    info!(
        source = %source.display(),
        snapshot = %snapshot.path.display(),
        bytes = snapshot_len,
        "Locked file snapshotted"
    );
    Ok(snapshot)
}

/// What a transfer actually reads from
#[derive(Debug)]
pub enum SourceFile {
    Direct(PathBuf),
    Snapshot(Snapshot),
}

impl SourceFile {
    pub fn path(&self) -> &Path {
        match self {
            SourceFile::Direct(path) => path,
            SourceFile::Snapshot(snapshot) => snapshot.path(),
        }
    }

    pub fn is_snapshot(&self) -> bool {
        matches!(self, SourceFile::Snapshot(_))
    }
}

/// Probe the source and snapshot it if another process holds it exclusively
pub fn prepare_source(path: &Path, snapshot_dir: &Path) -> TransferResult<SourceFile> {
    match is_locked(path) {
        Ok(false) => Ok(SourceFile::Direct(path.to_path_buf())),
        Ok(true) => {
            info!(source = %path.display(), "Source is locked, taking snapshot");
            create_snapshot(path, snapshot_dir).map(SourceFile::Snapshot)
        }
        Err(e) => Err(TransferError::from(e).context(path.display())),
    }
}

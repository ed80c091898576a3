// Upload/download pipeline shared by every protocol adapter
use crate::copy::{copy_chunks, CopyControl, ProgressReporter};
use crate::hashing::{hash_file, hash_reader};
use crate::locked_file::{prepare_source, SourceFile};
use crate::remote_fs::{remote_parent, RemoteFs, RemoteStat};
use crate::throttle::BandwidthThrottle;
use filetime::FileTime;
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tidesync_core::domain::{ConnectionSettings, TransferPolicy};
use tidesync_core::port::{
    CancelToken, FileTransferReport, ProgressCallback, ResumeCheckpoint, ResumeKey, ResumeStore,
    TransferError, TransferErrorKind, TransferResult,
};
use tracing::{debug, info, warn};

/// Suffix of the file a copy is written to until it is complete and verified
pub const PARTIAL_SUFFIX: &str = ".part";

/// In-flight name of an endpoint destination
pub fn partial_path(destination: &str) -> String {
    format!("{}{}", destination, PARTIAL_SUFFIX)
}

/// In-flight name of a local destination
pub fn partial_local_path(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_owned();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

/// Everything one operation needs besides the session itself
#[derive(Clone)]
pub struct TransferContext {
    pub connection: Arc<ConnectionSettings>,
    pub policy: Arc<TransferPolicy>,
    pub resume_store: Option<Arc<dyn ResumeStore>>,
    pub snapshot_dir: PathBuf,
    pub progress: Option<ProgressCallback>,
    pub cancel: Option<CancelToken>,
}

impl TransferContext {
    fn resume_store(&self) -> Option<&dyn ResumeStore> {
        if self.policy.enable_resume {
            self.resume_store.as_deref()
        } else {
            None
        }
    }

    fn control<'a>(&'a self, file: &str, total: u64) -> CopyControl<'a> {
        CopyControl {
            buffer_size: self.policy.chunk_size(),
            throttle: BandwidthThrottle::new(self.policy.bandwidth_limit_bytes_per_sec),
            progress: ProgressReporter::new(self.progress.clone(), file, total),
            cancel: self.cancel.as_ref(),
            on_commit: None,
        }
    }
}

fn epoch_millis(time: Option<SystemTime>) -> Option<i64> {
    time?
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| d.as_millis() as i64)
}

fn now_millis() -> i64 {
    epoch_millis(Some(SystemTime::now())).unwrap_or_default()
}

fn local_stat(path: &Path) -> TransferResult<Option<RemoteStat>> {
    match fs::metadata(path) {
        Ok(meta) => Ok(Some(RemoteStat {
            size: meta.len(),
            is_dir: meta.is_dir(),
            modified: meta.modified().ok(),
            accessed: meta.accessed().ok(),
        })),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(TransferError::from(e).context(path.display())),
    }
}

/// Offset to continue from, discarding stale checkpoints
fn resume_offset(
    store: Option<&dyn ResumeStore>,
    key: &ResumeKey,
    source: &RemoteStat,
    destination: Option<&RemoteStat>,
) -> u64 {
    let Some(store) = store else {
        return 0;
    };
    let checkpoint = match store.load(key) {
        Ok(Some(checkpoint)) => checkpoint,
        Ok(None) => return 0,
        Err(e) => {
            warn!(destination = %key.destination, error = %e, "Checkpoint unreadable, restarting");
            return 0;
        }
    };
    let offset = checkpoint.resume_offset(
        source.size,
        epoch_millis(source.modified),
        destination.map(|d| d.size),
        destination.and_then(|d| epoch_millis(d.modified)),
    );
    match offset {
        Some(offset) => {
            info!(destination = %key.destination, offset = offset, "Resuming transfer");
            offset
        }
        None => {
            debug!(destination = %key.destination, "Checkpoint stale, restarting from zero");
            let _ = store.remove(key);
            0
        }
    }
}

/// Builds checkpoint records for one file as the copy commits
struct Checkpointer<'a> {
    store: &'a dyn ResumeStore,
    key: ResumeKey,
    source: RemoteStat,
    local_destination: Option<PathBuf>,
}

impl Checkpointer<'_> {
    fn commit(&self, bytes_committed: u64) {
        let destination_mtime = self
            .local_destination
            .as_deref()
            .and_then(|p| fs::metadata(p).ok())
            .and_then(|m| epoch_millis(m.modified().ok()));
        let checkpoint = ResumeCheckpoint {
            source: self.key.source.clone(),
            source_size: self.source.size,
            source_mtime: epoch_millis(self.source.modified),
            destination: self.key.destination.clone(),
            bytes_committed,
            destination_mtime,
            updated_at: now_millis(),
        };
        if let Err(e) = self.store.save(&checkpoint) {
            warn!(destination = %self.key.destination, error = %e, "Failed to save checkpoint");
        }
    }

    fn clear(&self) {
        if let Err(e) = self.store.remove(&self.key) {
            warn!(destination = %self.key.destination, error = %e, "Failed to remove checkpoint");
        }
    }
}

fn integrity_mismatch(path: &str, expected: &str, actual: &str) -> TransferError {
    TransferError::new(
        TransferErrorKind::IntegrityMismatch,
        format!("{}: expected {}, found {}", path, expected, actual),
    )
}

fn times_of(stat: &RemoteStat) -> Option<(SystemTime, SystemTime)> {
    let modified = stat.modified?;
    Some((modified, stat.accessed.unwrap_or(modified)))
}

/// Local file → endpoint
pub fn upload<F: RemoteFs>(
    fs_session: &mut F,
    ctx: &TransferContext,
    local: &Path,
    remote: &str,
    overwrite: bool,
) -> TransferResult<FileTransferReport> {
    let source_stat =
        local_stat(local)?.ok_or_else(|| TransferError::not_found(local.display()))?;
    if source_stat.is_dir {
        return Err(TransferError::new(
            TransferErrorKind::InvalidPath,
            format!("{} is a directory", local.display()),
        ));
    }

    let existing = fs_session.stat(remote)?;
    if existing.is_some() && !overwrite {
        return Err(TransferError::already_exists(remote));
    }
    if let Some(parent) = remote_parent(remote) {
        fs_session.create_dir_all(parent)?;
    }

    let source = prepare_source(local, &ctx.snapshot_dir)?;
    let staging = partial_path(remote);
    let partial = fs_session.stat(&staging)?;
    let key = ResumeKey::new(local.to_string_lossy(), remote);
    let store = ctx.resume_store();
    let offset = resume_offset(store, &key, &source_stat, partial.as_ref());

    let mut reader = File::open(source.path())
        .map_err(|e| TransferError::from(e).context(local.display()))?;
    reader.seek(SeekFrom::Start(offset))?;

    let checkpointer = store.map(|store| Checkpointer {
        store,
        key: key.clone(),
        source: source_stat,
        local_destination: fs_session.local_path(&staging),
    });
    let mut control = ctx.control(remote, source_stat.size);
    if let Some(cp) = &checkpointer {
        control.on_commit = Some(Box::new(move |pos| cp.commit(pos)));
    }
    let copied = fs_session.write_with(&staging, offset, |writer| {
        copy_chunks(&mut reader, writer, offset, &mut control)
    });
    drop(control);
    let copied = match copied {
        Ok(copied) => copied,
        Err(e) => {
            // without a checkpoint nothing can pick the partial file up again
            if checkpointer.is_none() {
                let _ = fs_session.remove_file(&staging);
            }
            return Err(e);
        }
    };

    let mut report = FileTransferReport {
        bytes_transferred: copied,
        resumed_from: offset,
        used_snapshot: source.is_snapshot(),
        ..Default::default()
    };

    if ctx.policy.verify_integrity {
        let algorithm = ctx.policy.hash_algorithm;
        let expected = hash_file(source.path(), algorithm)?;
        let actual = fs_session.read_with(&staging, 0, |r| Ok(hash_reader(r, algorithm)?))?;
        if expected != actual {
            if let Some(cp) = &checkpointer {
                cp.clear();
            }
            let _ = fs_session.remove_file(&staging);
            return Err(integrity_mismatch(remote, &expected, &actual));
        }
        report.verified = true;
    }

    fs_session.rename(&staging, remote)?;
    if let Some(cp) = &checkpointer {
        cp.clear();
    }

    if ctx.policy.preserve_timestamps {
        if let Some((modified, accessed)) = times_of(&source_stat) {
            report.timestamps_preserved = fs_session.set_times(remote, modified, accessed)?;
            if !report.timestamps_preserved {
                debug!(destination = %remote, "Protocol cannot set timestamps");
            }
        }
    }

    release(source);
    Ok(report)
}

/// Endpoint → local file
pub fn download<F: RemoteFs>(
    fs_session: &mut F,
    ctx: &TransferContext,
    remote: &str,
    local: &Path,
    overwrite: bool,
) -> TransferResult<FileTransferReport> {
    let source_stat = fs_session
        .stat(remote)?
        .ok_or_else(|| TransferError::not_found(remote))?;
    if source_stat.is_dir {
        return Err(TransferError::new(
            TransferErrorKind::InvalidPath,
            format!("{} is a directory", remote),
        ));
    }

    let existing = local_stat(local)?;
    if existing.is_some() && !overwrite {
        return Err(TransferError::already_exists(local.display()));
    }
    if let Some(parent) = local.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    // Local-disk endpoints get the same locked-file treatment as uploads
    let source = match fs_session.local_path(remote) {
        Some(path) => Some(prepare_source(&path, &ctx.snapshot_dir)?),
        None => None,
    };

    let staging = partial_local_path(local);
    let partial = local_stat(&staging)?;
    let key = ResumeKey::new(remote, local.to_string_lossy());
    let store = ctx.resume_store();
    let offset = resume_offset(store, &key, &source_stat, partial.as_ref());

    let mut writer = if offset > 0 {
        let mut file = OpenOptions::new().write(true).open(&staging)?;
        file.set_len(offset)?;
        file.seek(SeekFrom::Start(offset))?;
        file
    } else {
        File::create(&staging).map_err(|e| TransferError::from(e).context(staging.display()))?
    };

    let checkpointer = store.map(|store| Checkpointer {
        store,
        key: key.clone(),
        source: source_stat,
        local_destination: Some(staging.clone()),
    });
    let mut control = ctx.control(remote, source_stat.size);
    if let Some(cp) = &checkpointer {
        control.on_commit = Some(Box::new(move |pos| cp.commit(pos)));
    }
    let copied = match &source {
        Some(source) => File::open(source.path())
            .map_err(TransferError::from)
            .and_then(|mut reader| {
                reader.seek(SeekFrom::Start(offset))?;
                copy_chunks(&mut reader, &mut writer, offset, &mut control)
            }),
        None => fs_session.read_with(remote, offset, |reader| {
            copy_chunks(reader, &mut writer, offset, &mut control)
        }),
    };
    drop(control);
    let copied = copied.and_then(|copied| {
        writer.sync_all()?;
        Ok(copied)
    });
    drop(writer);
    let copied = match copied {
        Ok(copied) => copied,
        Err(e) => {
            if checkpointer.is_none() {
                let _ = fs::remove_file(&staging);
            }
            return Err(e);
        }
    };

    let mut report = FileTransferReport {
        bytes_transferred: copied,
        resumed_from: offset,
        used_snapshot: source.as_ref().is_some_and(SourceFile::is_snapshot),
        ..Default::default()
    };

    if ctx.policy.verify_integrity {
        let algorithm = ctx.policy.hash_algorithm;
        let expected = match &source {
            Some(source) => hash_file(source.path(), algorithm)?,
            None => fs_session.read_with(remote, 0, |r| Ok(hash_reader(r, algorithm)?))?,
        };
        let actual = hash_file(&staging, algorithm)?;
        if expected != actual {
            if let Some(cp) = &checkpointer {
                cp.clear();
            }
            let _ = fs::remove_file(&staging);
            return Err(integrity_mismatch(&local.display().to_string(), &expected, &actual));
        }
        report.verified = true;
    }

    fs::rename(&staging, local).map_err(|e| TransferError::from(e).context(local.display()))?;
    if let Some(cp) = &checkpointer {
        cp.clear();
    }

    if ctx.policy.preserve_timestamps {
        if let Some((modified, accessed)) = times_of(&source_stat) {
            filetime::set_file_times(
                local,
                FileTime::from_system_time(accessed),
                FileTime::from_system_time(modified),
            )?;
            report.timestamps_preserved = true;
        }
    }

    if let Some(source) = source {
        release(source);
    }
    Ok(report)
}

fn release(source: SourceFile) {
    if source.is_snapshot() {
        debug!(snapshot = %source.path().display(), "Releasing snapshot");
    }
    drop(source);
}

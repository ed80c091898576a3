// Local-disk endpoint: the "remote" side is another directory on this machine
use crate::remote_fs::{RemoteFs, RemoteStat};
use filetime::FileTime;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tidesync_core::application::runner::plan::list_local_files;
use tidesync_core::domain::{ConnectionSettings, Protocol, TransferPolicy};
use tidesync_core::port::{RemoteEntry, TransferError, TransferResult};

pub struct LocalFs;

fn with_path(e: std::io::Error, path: &str) -> TransferError {
    TransferError::from(e).context(path)
}

impl RemoteFs for LocalFs {
    const PROTOCOL: Protocol = Protocol::Local;

    fn connect(_connection: &ConnectionSettings, _policy: &TransferPolicy) -> TransferResult<Self> {
        Ok(LocalFs)
    }

    fn ping(&mut self) -> TransferResult<()> {
        Ok(())
    }

    fn create_dir_all(&mut self, path: &str) -> TransferResult<()> {
        fs::create_dir_all(path).map_err(|e| with_path(e, path))
    }

    fn stat(&mut self, path: &str) -> TransferResult<Option<RemoteStat>> {
        match fs::metadata(path) {
            Ok(meta) => Ok(Some(RemoteStat {
                size: meta.len(),
                is_dir: meta.is_dir(),
                modified: meta.modified().ok(),
                accessed: meta.accessed().ok(),
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(with_path(e, path)),
        }
    }

    fn list(&mut self, path: &str, recursive: bool) -> TransferResult<Vec<RemoteEntry>> {
        list_local_files(Path::new(path), recursive).map(|(_, entries)| entries)
    }

    fn remove_file(&mut self, path: &str) -> TransferResult<()> {
        fs::remove_file(path).map_err(|e| with_path(e, path))
    }

    fn rename(&mut self, from: &str, to: &str) -> TransferResult<()> {
        fs::rename(from, to).map_err(|e| with_path(e, to))
    }

    fn read_with<T>(
        &mut self,
        path: &str,
        offset: u64,
        body: impl FnOnce(&mut dyn Read) -> TransferResult<T>,
    ) -> TransferResult<T> {
        let mut file = File::open(path).map_err(|e| with_path(e, path))?;
        file.seek(SeekFrom::Start(offset))?;
        body(&mut file)
    }

    fn write_with<T>(
        &mut self,
        path: &str,
        offset: u64,
        body: impl FnOnce(&mut dyn Write) -> TransferResult<T>,
    ) -> TransferResult<T> {
        let mut file = if offset > 0 {
            let mut file = OpenOptions::new()
                .write(true)
                .open(path)
                .map_err(|e| with_path(e, path))?;
            file.set_len(offset)?;
            file.seek(SeekFrom::Start(offset))?;
            file
        } else {
            File::create(path).map_err(|e| with_path(e, path))?
        };
        let result = body(&mut file)?;
        file.sync_all()?;
        Ok(result)
    }

    fn set_times(
        &mut self,
        path: &str,
        modified: SystemTime,
        accessed: SystemTime,
    ) -> TransferResult<bool> {
        filetime::set_file_times(
            path,
            FileTime::from_system_time(accessed),
            FileTime::from_system_time(modified),
        )
        .map_err(|e| with_path(e, path))?;
        Ok(true)
    }

    fn local_path(&self, path: &str) -> Option<PathBuf> {
        Some(PathBuf::from(path))
    }
}

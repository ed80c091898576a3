// FTP endpoint (suppaftp, binary mode, REST for resume)
use crate::remote_fs::{path_prefixes, RemoteFs, RemoteStat};
use chrono::TimeZone;
use std::io::{Read, Write};
use std::net::ToSocketAddrs;
use std::time::{Duration, SystemTime};
use suppaftp::list::File as ListLine;
use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream, Mode};
use tidesync_core::domain::{ConnectionSettings, Protocol, TransferPolicy};
use tidesync_core::port::{RemoteEntry, TransferError, TransferErrorKind, TransferResult};
use tracing::{debug, warn};

pub struct FtpFs {
    stream: FtpStream,
    // a data stream was dropped before its closing reply was read
    desynced: bool,
}

/// Map FTP reply codes onto transfer error kinds
fn map_ftp_error(err: FtpError) -> TransferError {
    match err {
        FtpError::ConnectionError(io) => TransferError::from(io),
        FtpError::UnexpectedResponse(response) => {
            let code = response.status.code();
            let body = String::from_utf8_lossy(&response.body).trim().to_string();
            let kind = match code {
                530 | 532 => TransferErrorKind::Authentication,
                550 => TransferErrorKind::NotFound,
                553 => TransferErrorKind::InvalidPath,
                452 | 552 => TransferErrorKind::DiskFull,
                421 | 425 | 426 => TransferErrorKind::Connection,
                400..=499 => TransferErrorKind::TransientIo,
                _ => TransferErrorKind::Protocol,
            };
            TransferError::new(kind, format!("{} {}", code, body))
        }
        other => TransferError::new(TransferErrorKind::Protocol, other.to_string()),
    }
}

fn is_missing(err: &FtpError) -> bool {
    matches!(err, FtpError::UnexpectedResponse(r) if r.status.code() == 550)
}

impl FtpFs {
    fn list_into(
        &mut self,
        root: &str,
        dir: &str,
        recursive: bool,
        out: &mut Vec<RemoteEntry>,
    ) -> TransferResult<()> {
        let lines = self.stream.list(Some(dir)).map_err(map_ftp_error)?;
        let mut subdirs = Vec::new();
        for line in lines {
            let entry = match line.parse::<ListLine>() {
                Ok(entry) => entry,
                Err(_) => {
                    debug!(line = %line, "Skipping unparsable LIST line");
                    continue;
                }
            };
            let name = entry.name().to_string();
            if name == "." || name == ".." {
                continue;
            }
            let path = format!("{}/{}", dir.trim_end_matches('/'), name);
            if entry.is_directory() {
                subdirs.push(path);
                continue;
            }
            let relative = path
                .strip_prefix(root.trim_end_matches('/'))
                .unwrap_or(&path)
                .trim_start_matches('/')
                .to_string();
            out.push(RemoteEntry {
                path,
                relative_path: relative,
                size: entry.size() as u64,
                modified: Some(entry.modified().into()),
            });
        }
        if recursive {
            for subdir in subdirs {
                self.list_into(root, &subdir, recursive, out)?;
            }
        }
        Ok(())
    }
}

impl RemoteFs for FtpFs {
    const PROTOCOL: Protocol = Protocol::Ftp;

    fn connect(connection: &ConnectionSettings, policy: &TransferPolicy) -> TransferResult<Self> {
        if connection.host.is_empty() {
            return Err(TransferError::new(
                TransferErrorKind::InvalidConfig,
                "FTP host is not set",
            ));
        }
        let addr = connection
            .address()
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                TransferError::new(
                    TransferErrorKind::Connection,
                    format!("cannot resolve {}", connection.address()),
                )
            })?;
        let connect_timeout = Duration::from_secs(policy.connection_timeout_secs.max(1));
        let mut stream = FtpStream::connect_timeout(addr, connect_timeout).map_err(map_ftp_error)?;

        let io_timeout = Some(Duration::from_secs(policy.operation_timeout_secs.max(1)));
        stream.get_ref().set_read_timeout(io_timeout)?;
        stream.get_ref().set_write_timeout(io_timeout)?;

        let password = connection.password.as_deref().unwrap_or_default();
        stream
            .login(connection.username.as_str(), password)
            .map_err(map_ftp_error)?;
        stream
            .transfer_type(FileType::Binary)
            .map_err(map_ftp_error)?;
        stream.set_mode(if connection.passive_mode {
            Mode::Passive
        } else {
            Mode::Active
        });
        debug!(host = %connection.host, passive = connection.passive_mode, "FTP session ready");
        Ok(Self {
            stream,
            desynced: false,
        })
    }

    fn ping(&mut self) -> TransferResult<()> {
        self.stream.noop().map_err(map_ftp_error)
    }

    fn create_dir_all(&mut self, path: &str) -> TransferResult<()> {
        let home = self.stream.pwd().map_err(map_ftp_error)?;
        for prefix in path_prefixes(path) {
            if self.stream.cwd(&prefix).is_err() {
                self.stream.mkdir(&prefix).map_err(map_ftp_error)?;
            }
        }
        self.stream.cwd(&home).map_err(map_ftp_error)
    }

    fn stat(&mut self, path: &str) -> TransferResult<Option<RemoteStat>> {
        match self.stream.size(path) {
            Ok(size) => {
                let modified = self
                    .stream
                    .mdtm(path)
                    .ok()
                    .map(|naive| SystemTime::from(chrono::Utc.from_utc_datetime(&naive)));
                Ok(Some(RemoteStat {
                    size: size as u64,
                    is_dir: false,
                    modified,
                    accessed: None,
                }))
            }
            Err(e) if is_missing(&e) => {
                // SIZE fails on directories too
                let home = self.stream.pwd().map_err(map_ftp_error)?;
                if self.stream.cwd(path).is_ok() {
                    self.stream.cwd(&home).map_err(map_ftp_error)?;
                    return Ok(Some(RemoteStat {
                        size: 0,
                        is_dir: true,
                        modified: None,
                        accessed: None,
                    }));
                }
                Ok(None)
            }
            Err(e) => Err(map_ftp_error(e)),
        }
    }

    fn list(&mut self, path: &str, recursive: bool) -> TransferResult<Vec<RemoteEntry>> {
        match self.stat(path)? {
            None => Err(TransferError::not_found(path)),
            Some(stat) if !stat.is_dir => {
                let name = path.rsplit('/').next().unwrap_or(path).to_string();
                Ok(vec![RemoteEntry {
                    path: path.to_string(),
                    relative_path: name,
                    size: stat.size,
                    modified: stat.modified.map(Into::into),
                }])
            }
            Some(_) => {
                let mut entries = Vec::new();
                self.list_into(path, path, recursive, &mut entries)?;
                entries.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
                Ok(entries)
            }
        }
    }

    fn remove_file(&mut self, path: &str) -> TransferResult<()> {
        self.stream.rm(path).map_err(map_ftp_error)
    }

    fn rename(&mut self, from: &str, to: &str) -> TransferResult<()> {
        if self.stream.rename(from, to).is_ok() {
            return Ok(());
        }
        // some servers refuse RNTO onto an existing file
        match self.stream.rm(to) {
            Ok(()) => {}
            Err(e) if is_missing(&e) => {}
            Err(e) => return Err(map_ftp_error(e)),
        }
        self.stream.rename(from, to).map_err(map_ftp_error)
    }

    fn read_with<T>(
        &mut self,
        path: &str,
        offset: u64,
        body: impl FnOnce(&mut dyn Read) -> TransferResult<T>,
    ) -> TransferResult<T> {
        if offset > 0 {
            self.stream
                .resume_transfer(offset as usize)
                .map_err(map_ftp_error)?;
        }
        let mut data = self.stream.retr_as_stream(path).map_err(map_ftp_error)?;
        let result = match body(&mut data) {
            Ok(result) => result,
            Err(e) => {
                drop(data);
                self.desynced = true;
                return Err(e);
            }
        };
        self.stream.finalize_retr_stream(data).map_err(|e| {
            self.desynced = true;
            map_ftp_error(e)
        })?;
        Ok(result)
    }

    fn write_with<T>(
        &mut self,
        path: &str,
        offset: u64,
        body: impl FnOnce(&mut dyn Write) -> TransferResult<T>,
    ) -> TransferResult<T> {
        if offset > 0 {
            self.stream
                .resume_transfer(offset as usize)
                .map_err(map_ftp_error)?;
        }
        let mut data = self.stream.put_with_stream(path).map_err(map_ftp_error)?;
        let result = match body(&mut data) {
            Ok(result) => result,
            Err(e) => {
                drop(data);
                self.desynced = true;
                return Err(e);
            }
        };
        self.stream.finalize_put_stream(data).map_err(|e| {
            self.desynced = true;
            map_ftp_error(e)
        })?;
        Ok(result)
    }

    fn set_times(
        &mut self,
        _path: &str,
        _modified: SystemTime,
        _accessed: SystemTime,
    ) -> TransferResult<bool> {
        Ok(false)
    }

    fn needs_reconnect(&self) -> bool {
        self.desynced
    }
}

impl Drop for FtpFs {
    fn drop(&mut self) {
        if self.desynced {
            debug!("Dropping FTP session with a pending transfer reply");
            return;
        }
        if let Err(e) = self.stream.quit() {
            warn!(error = %e, "FTP quit failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_host_is_invalid_config() {
        let connection = ConnectionSettings::remote(Protocol::Ftp, "", "user");
        let err = FtpFs::connect(&connection, &TransferPolicy::default())
            .err()
            .unwrap();
        assert_eq!(err.kind, TransferErrorKind::InvalidConfig);
    }

    #[test]
    fn test_connection_errors_are_transient() {
        let err = map_ftp_error(FtpError::ConnectionError(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        )));
        assert!(err.is_transient());
    }
}

// SFTP endpoint (ssh2 session + sftp subsystem)
use crate::remote_fs::{path_prefixes, RemoteFs, RemoteStat};
use ssh2::{ErrorCode, FileStat, OpenFlags, OpenType, RenameFlags, Session, Sftp};
use std::io::{Read, Seek, SeekFrom, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tidesync_core::domain::{ConnectionSettings, Protocol, TransferPolicy};
use tidesync_core::port::{RemoteEntry, TransferError, TransferErrorKind, TransferResult};
use tracing::debug;

const LIBSSH2_FX_NO_SUCH_FILE: i32 = 2;
const LIBSSH2_FX_PERMISSION_DENIED: i32 = 3;
const LIBSSH2_FX_NO_CONNECTION: i32 = 6;
const LIBSSH2_FX_CONNECTION_LOST: i32 = 7;
const LIBSSH2_FX_NO_SPACE_ON_FILESYSTEM: i32 = 14;

pub struct SftpFs {
    // drop order: the channel closes before the session
    sftp: Sftp,
    session: Session,
}

fn map_ssh_error(err: ssh2::Error) -> TransferError {
    let kind = match err.code() {
        ErrorCode::SFTP(LIBSSH2_FX_NO_SUCH_FILE) => TransferErrorKind::NotFound,
        ErrorCode::SFTP(LIBSSH2_FX_PERMISSION_DENIED) => TransferErrorKind::PermissionDenied,
        ErrorCode::SFTP(LIBSSH2_FX_NO_CONNECTION | LIBSSH2_FX_CONNECTION_LOST) => {
            TransferErrorKind::Connection
        }
        ErrorCode::SFTP(LIBSSH2_FX_NO_SPACE_ON_FILESYSTEM) => TransferErrorKind::DiskFull,
        // LIBSSH2_ERROR_PUBLICKEY_UNVERIFIED, LIBSSH2_ERROR_AUTHENTICATION_FAILED
        ErrorCode::Session(-18 | -19) => TransferErrorKind::Authentication,
        // LIBSSH2_ERROR_TIMEOUT
        ErrorCode::Session(-9) => TransferErrorKind::Timeout,
        // SOCKET_SEND, SOCKET_DISCONNECT, SOCKET_RECV
        ErrorCode::Session(-7 | -13 | -43) => TransferErrorKind::Connection,
        _ => TransferErrorKind::Protocol,
    };
    TransferError::new(kind, err.message().to_string())
}

fn is_missing(err: &ssh2::Error) -> bool {
    matches!(err.code(), ErrorCode::SFTP(LIBSSH2_FX_NO_SUCH_FILE))
}

fn to_system_time(secs: Option<u64>) -> Option<SystemTime> {
    secs.map(|s| UNIX_EPOCH + Duration::from_secs(s))
}

fn to_stat(stat: &FileStat) -> RemoteStat {
    RemoteStat {
        size: stat.size.unwrap_or_default(),
        is_dir: stat.is_dir(),
        modified: to_system_time(stat.mtime),
        accessed: to_system_time(stat.atime),
    }
}

fn epoch_secs(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

impl SftpFs {
    fn authenticate(session: &Session, connection: &ConnectionSettings) -> TransferResult<()> {
        let user = connection.username.as_str();
        if let Some(key) = &connection.private_key_path {
            let key = expand_key_path(key);
            debug!(user = %user, key = %key.display(), "SFTP public key auth");
            session
                .userauth_pubkey_file(user, None, &key, connection.key_passphrase.as_deref())
                .map_err(map_ssh_error)?;
        } else if let Some(password) = &connection.password {
            session
                .userauth_password(user, password)
                .map_err(map_ssh_error)?;
        }
        if !session.authenticated() {
            return Err(TransferError::new(
                TransferErrorKind::Authentication,
                format!("SSH authentication failed for {}", user),
            ));
        }
        Ok(())
    }

    fn list_into(
        &mut self,
        root: &str,
        dir: &str,
        recursive: bool,
        out: &mut Vec<RemoteEntry>,
    ) -> TransferResult<()> {
        let entries = self.sftp.readdir(Path::new(dir)).map_err(map_ssh_error)?;
        for (entry_path, stat) in entries {
            let Some(name) = entry_path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name == "." || name == ".." {
                continue;
            }
            let path = format!("{}/{}", dir.trim_end_matches('/'), name);
            if stat.is_dir() {
                if recursive {
                    self.list_into(root, &path, recursive, out)?;
                }
                continue;
            }
            let relative = path
                .strip_prefix(root.trim_end_matches('/'))
                .unwrap_or(&path)
                .trim_start_matches('/')
                .to_string();
            let remote = to_stat(&stat);
            out.push(RemoteEntry {
                path,
                relative_path: relative,
                size: remote.size,
                modified: remote.modified.map(Into::into),
            });
        }
        Ok(())
    }
}

impl RemoteFs for SftpFs {
    const PROTOCOL: Protocol = Protocol::Sftp;

    fn connect(connection: &ConnectionSettings, policy: &TransferPolicy) -> TransferResult<Self> {
        if connection.host.is_empty() {
            return Err(TransferError::new(
                TransferErrorKind::InvalidConfig,
                "SFTP host is not set",
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
        let tcp = TcpStream::connect_timeout(&addr, connect_timeout)?;
        let io_timeout = Duration::from_secs(policy.operation_timeout_secs.max(1));
        tcp.set_read_timeout(Some(io_timeout))?;
        tcp.set_write_timeout(Some(io_timeout))?;

        let mut session = Session::new().map_err(map_ssh_error)?;
        session.set_tcp_stream(tcp);
        session.set_timeout(io_timeout.as_millis().min(u32::MAX as u128) as u32);
        session.handshake().map_err(map_ssh_error)?;
        Self::authenticate(&session, connection)?;

        let sftp = session.sftp().map_err(map_ssh_error)?;
        debug!(host = %connection.host, user = %connection.username, "SFTP session ready");
        Ok(Self { sftp, session })
    }

    fn ping(&mut self) -> TransferResult<()> {
        self.sftp
            .realpath(Path::new("."))
            .map(|_| ())
            .map_err(map_ssh_error)
    }

    fn create_dir_all(&mut self, path: &str) -> TransferResult<()> {
        for prefix in path_prefixes(path) {
            let prefix = Path::new(&prefix);
            if self.sftp.stat(prefix).is_ok() {
                continue;
            }
            if let Err(e) = self.sftp.mkdir(prefix, 0o755) {
                // another writer may have created it in between
                if self.sftp.stat(prefix).is_err() {
                    return Err(map_ssh_error(e));
                }
            }
        }
        Ok(())
    }

    fn stat(&mut self, path: &str) -> TransferResult<Option<RemoteStat>> {
        match self.sftp.stat(Path::new(path)) {
            Ok(stat) => Ok(Some(to_stat(&stat))),
            Err(e) if is_missing(&e) => Ok(None),
            Err(e) => Err(map_ssh_error(e)),
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
        self.sftp.unlink(Path::new(path)).map_err(map_ssh_error)
    }

    fn rename(&mut self, from: &str, to: &str) -> TransferResult<()> {
        let (from, to) = (Path::new(from), Path::new(to));
        let flags = Some(RenameFlags::OVERWRITE | RenameFlags::ATOMIC | RenameFlags::NATIVE);
        if self.sftp.rename(from, to, flags).is_ok() {
            return Ok(());
        }
        // SFTPv3 servers refuse to rename onto an existing file
        match self.sftp.unlink(to) {
            Ok(()) => {}
            Err(e) if matches!(e.code(), ErrorCode::SFTP(LIBSSH2_FX_NO_SUCH_FILE)) => {}
            Err(e) => return Err(map_ssh_error(e)),
        }
        self.sftp.rename(from, to, flags).map_err(map_ssh_error)
    }

    fn read_with<T>(
        &mut self,
        path: &str,
        offset: u64,
        body: impl FnOnce(&mut dyn Read) -> TransferResult<T>,
    ) -> TransferResult<T> {
        let mut file = self.sftp.open(Path::new(path)).map_err(map_ssh_error)?;
        if offset > 0 {
            file.seek(SeekFrom::Start(offset))?;
        }
        body(&mut file)
    }

    fn write_with<T>(
        &mut self,
        path: &str,
        offset: u64,
        body: impl FnOnce(&mut dyn Write) -> TransferResult<T>,
    ) -> TransferResult<T> {
        let mut flags = OpenFlags::WRITE | OpenFlags::CREATE;
        if offset == 0 {
            flags |= OpenFlags::TRUNCATE;
        }
        let mut file = self
            .sftp
            .open_mode(Path::new(path), flags, 0o644, OpenType::File)
            .map_err(map_ssh_error)?;
        if offset > 0 {
            file.seek(SeekFrom::Start(offset))?;
        }
        let result = body(&mut file)?;
        file.flush()?;
        Ok(result)
    }

    fn set_times(
        &mut self,
        path: &str,
        modified: SystemTime,
        accessed: SystemTime,
    ) -> TransferResult<bool> {
        let stat = FileStat {
            size: None,
            uid: None,
            gid: None,
            perm: None,
            atime: Some(epoch_secs(accessed)),
            mtime: Some(epoch_secs(modified)),
        };
        self.sftp
            .setstat(Path::new(path), stat)
            .map_err(map_ssh_error)?;
        Ok(true)
    }
}

impl Drop for SftpFs {
    fn drop(&mut self) {
        let _ = self
            .session
            .disconnect(None, "tidesync session closed", None);
    }
}

/// Resolve `~/` in a key path on this machine
pub fn expand_key_path(path: &Path) -> PathBuf {
    match path.to_str() {
        Some(raw) if raw.starts_with("~/") => match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(&raw[2..]),
            None => path.to_path_buf(),
        },
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_host_is_invalid_config() {
        let connection = ConnectionSettings::remote(Protocol::Sftp, "", "user");
        let err = SftpFs::connect(&connection, &TransferPolicy::default())
            .err()
            .unwrap();
        assert_eq!(err.kind, TransferErrorKind::InvalidConfig);
    }

    #[test]
    fn test_file_stat_conversion() {
        let stat = FileStat {
            size: Some(42),
            uid: None,
            gid: None,
            perm: Some(0o100644),
            atime: Some(10),
            mtime: Some(20),
        };
        let remote = to_stat(&stat);
        assert_eq!(remote.size, 42);
        assert!(!remote.is_dir);
        assert_eq!(remote.modified, Some(UNIX_EPOCH + Duration::from_secs(20)));
        assert_eq!(remote.accessed, Some(UNIX_EPOCH + Duration::from_secs(10)));
    }

    #[test]
    fn test_expand_key_path_leaves_absolute_paths() {
        let path = Path::new("/etc/keys/id_ed25519");
        assert_eq!(expand_key_path(path), path.to_path_buf());
    }
}

// Async TransferClient over a lazily connected blocking session
use crate::pipeline::{self, TransferContext};
use crate::remote_fs::RemoteFs;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tidesync_core::domain::{ConnectionSettings, Protocol, TransferPolicy};
use tidesync_core::port::{
    CancelToken, FileTransferReport, ProgressCallback, RemoteEntry, ResumeStore, TransferClient,
    TransferError, TransferErrorKind, TransferResult,
};
use tracing::{debug, info, warn};

/// One client per job attempt; the session is opened on first use and
/// reused for every file of the attempt.
pub struct FsTransferClient<F: RemoteFs> {
    session: Arc<Mutex<Option<F>>>,
    context: TransferContext,
}

impl<F: RemoteFs> FsTransferClient<F> {
    pub fn new(
        connection: Arc<ConnectionSettings>,
        policy: Arc<TransferPolicy>,
        resume_store: Option<Arc<dyn ResumeStore>>,
        snapshot_dir: PathBuf,
    ) -> Self {
        Self {
            session: Arc::new(Mutex::new(None)),
            context: TransferContext {
                connection,
                policy,
                resume_store,
                snapshot_dir,
                progress: None,
                cancel: None,
            },
        }
    }

    /// Run `op` against the session on the blocking pool.
    ///
    /// Connects first if needed. A connection-class failure, a cancelled
    /// transfer or a session that reports itself out of step is dropped so
    /// the next call reconnects.
    async fn with_session<T, Op>(&self, op: Op) -> TransferResult<T>
    where
        T: Send + 'static,
        Op: FnOnce(&mut F, &TransferContext) -> TransferResult<T> + Send + 'static,
    {
        let session = Arc::clone(&self.session);
        let context = self.context.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = session.lock().unwrap_or_else(PoisonError::into_inner);
            let fs_session = match guard.take() {
                Some(fs_session) => fs_session,
                None => {
                    let connected = F::connect(&context.connection, &context.policy)?;
                    debug!(protocol = %F::PROTOCOL, host = %context.connection.host, "Session opened");
                    connected
                }
            };
            let fs_session = guard.insert(fs_session);
            let result = op(fs_session, &context);
            if let Err(e) = &result {
                if e.kind.is_connection_loss()
                    || e.is_cancelled()
                    || fs_session.needs_reconnect()
                {
                    warn!(protocol = %F::PROTOCOL, error = %e, "Dropping session");
                    *guard = None;
                }
            }
            result
        })
        .await
        .map_err(|e| {
            TransferError::new(
                TransferErrorKind::TransientIo,
                format!("transfer task failed: {}", e),
            )
        })?
    }

    async fn stat(&self, path: &str) -> TransferResult<crate::remote_fs::RemoteStat> {
        let path = path.to_string();
        self.with_session(move |fs, _| {
            fs.stat(&path)?
                .ok_or_else(|| TransferError::not_found(&path))
        })
        .await
    }
}

#[async_trait]
impl<F: RemoteFs> TransferClient for FsTransferClient<F> {
    fn protocol(&self) -> Protocol {
        F::PROTOCOL
    }

    async fn test_connection(&self) -> TransferResult<()> {
        self.with_session(|fs, _| fs.ping()).await?;
        info!(protocol = %F::PROTOCOL, host = %self.context.connection.host, "Connection test succeeded");
        Ok(())
    }

    async fn ensure_directory(&self, path: &str) -> TransferResult<()> {
        let path = path.to_string();
        self.with_session(move |fs, _| fs.create_dir_all(&path)).await
    }

    async fn upload_file(
        &self,
        local_path: &Path,
        remote_path: &str,
        overwrite: bool,
    ) -> TransferResult<FileTransferReport> {
        let local = local_path.to_path_buf();
        let remote = remote_path.to_string();
        self.with_session(move |fs, ctx| pipeline::upload(fs, ctx, &local, &remote, overwrite))
            .await
    }

    async fn download_file(
        &self,
        remote_path: &str,
        local_path: &Path,
        overwrite: bool,
    ) -> TransferResult<FileTransferReport> {
        let local = local_path.to_path_buf();
        let remote = remote_path.to_string();
        self.with_session(move |fs, ctx| pipeline::download(fs, ctx, &remote, &local, overwrite))
            .await
    }

    async fn file_exists(&self, path: &str) -> TransferResult<bool> {
        let path = path.to_string();
        self.with_session(move |fs, _| Ok(fs.stat(&path)?.is_some()))
            .await
    }

    async fn delete_file(&self, path: &str) -> TransferResult<()> {
        let path = path.to_string();
        self.with_session(move |fs, _| fs.remove_file(&path)).await
    }

    async fn list_files(&self, path: &str, recursive: bool) -> TransferResult<Vec<RemoteEntry>> {
        let path = path.to_string();
        self.with_session(move |fs, _| fs.list(&path, recursive))
            .await
    }

    async fn get_file_modified_time(&self, path: &str) -> TransferResult<Option<DateTime<Utc>>> {
        Ok(self.stat(path).await?.modified.map(DateTime::<Utc>::from))
    }

    async fn get_file_size(&self, path: &str) -> TransferResult<u64> {
        Ok(self.stat(path).await?.size)
    }

    fn set_progress_callback(&mut self, callback: Option<ProgressCallback>) {
        self.context.progress = callback;
    }

    fn set_cancel_token(&mut self, token: CancelToken) {
        self.context.cancel = Some(token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote_fs::RemoteStat;
    use std::io::{Read, Write};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::SystemTime;

    static CONNECTS: AtomicUsize = AtomicUsize::new(0);

    /// Session whose writes fail midway and leave the control channel out of step
    struct HalfOpenFs {
        desynced: bool,
    }

    impl RemoteFs for HalfOpenFs {
        const PROTOCOL: Protocol = Protocol::Ftp;

        fn connect(_: &ConnectionSettings, _: &TransferPolicy) -> TransferResult<Self> {
            CONNECTS.fetch_add(1, Ordering::SeqCst);
            Ok(Self { desynced: false })
        }

        fn ping(&mut self) -> TransferResult<()> {
            if self.desynced {
                return Err(TransferError::new(
                    TransferErrorKind::Protocol,
                    "unexpected 226 reply to NOOP",
                ));
            }
            Ok(())
        }

        fn create_dir_all(&mut self, _: &str) -> TransferResult<()> {
            Ok(())
        }

        fn stat(&mut self, _: &str) -> TransferResult<Option<RemoteStat>> {
            Ok(None)
        }

        fn list(&mut self, _: &str, _: bool) -> TransferResult<Vec<RemoteEntry>> {
            Ok(Vec::new())
        }

        fn remove_file(&mut self, _: &str) -> TransferResult<()> {
            Ok(())
        }

        fn rename(&mut self, _: &str, _: &str) -> TransferResult<()> {
            Ok(())
        }

        fn read_with<T>(
            &mut self,
            path: &str,
            _: u64,
            _: impl FnOnce(&mut dyn Read) -> TransferResult<T>,
        ) -> TransferResult<T> {
            Err(TransferError::not_found(path))
        }

        fn write_with<T>(
            &mut self,
            _: &str,
            _: u64,
            _: impl FnOnce(&mut dyn Write) -> TransferResult<T>,
        ) -> TransferResult<T> {
            self.desynced = true;
            Err(TransferError::new(
                TransferErrorKind::TransientIo,
                "source read failed mid-stream",
            ))
        }

        fn set_times(&mut self, _: &str, _: SystemTime, _: SystemTime) -> TransferResult<bool> {
            Ok(false)
        }

        fn needs_reconnect(&self) -> bool {
            self.desynced
        }
    }

    #[tokio::test]
    async fn test_out_of_step_session_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("report.csv");
        std::fs::write(&source, b"a,b\n1,2\n").unwrap();
        let client = FsTransferClient::<HalfOpenFs>::new(
            Arc::new(ConnectionSettings::remote(Protocol::Ftp, "ftp.example.com", "user")),
            Arc::new(TransferPolicy::default()),
            None,
            dir.path().join("snapshots"),
        );

        let err = client
            .upload_file(&source, "/incoming/report.csv", true)
            .await
            .unwrap_err();
        assert_eq!(err.kind, TransferErrorKind::TransientIo);

        // the next command runs on a fresh session instead of reading a stale reply
        client.test_connection().await.unwrap();
        assert_eq!(CONNECTS.load(Ordering::SeqCst), 2);
    }
}

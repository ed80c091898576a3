// TransferClientFactory: protocol tag → adapter
use crate::client::FsTransferClient;
use crate::local::LocalFs;
use crate::locked_file::default_snapshot_dir;
use crate::resume::{default_resume_dir, FileResumeStore};
use std::path::PathBuf;
use std::sync::Arc;
use tidesync_core::domain::{ConnectionSettings, Protocol, TransferPolicy};
use tidesync_core::port::{
    ResumeStore, TransferClient, TransferClientFactory, TransferError, TransferErrorKind,
    TransferResult,
};
use tracing::debug;

/// Builds one fresh client per job attempt
#[derive(Default, Clone)]
pub struct DefaultTransferClientFactory {
    resume_store: Option<Arc<dyn ResumeStore>>,
    snapshot_dir: Option<PathBuf>,
}

impl DefaultTransferClientFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checkpoint store used when a policy does not name its own directory
    pub fn with_resume_store(mut self, store: Arc<dyn ResumeStore>) -> Self {
        self.resume_store = Some(store);
        self
    }

    pub fn with_snapshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.snapshot_dir = Some(dir.into());
        self
    }

    fn resume_store_for(&self, policy: &TransferPolicy) -> Option<Arc<dyn ResumeStore>> {
        if !policy.enable_resume {
            return None;
        }
        if let Some(dir) = &policy.resume_state_dir {
            return Some(Arc::new(FileResumeStore::new(dir.clone())));
        }
        match &self.resume_store {
            Some(store) => Some(Arc::clone(store)),
            None => Some(Arc::new(FileResumeStore::new(default_resume_dir()))),
        }
    }

    fn snapshot_dir_for(&self, policy: &TransferPolicy) -> PathBuf {
        policy
            .snapshot_dir
            .clone()
            .or_else(|| self.snapshot_dir.clone())
            .unwrap_or_else(default_snapshot_dir)
    }

    fn build<F: crate::remote_fs::RemoteFs>(
        &self,
        connection: &ConnectionSettings,
        policy: &TransferPolicy,
    ) -> Box<dyn TransferClient> {
        Box::new(FsTransferClient::<F>::new(
            Arc::new(connection.clone()),
            Arc::new(policy.clone()),
            self.resume_store_for(policy),
            self.snapshot_dir_for(policy),
        ))
    }
}

#[cfg(any(not(feature = "ftp"), not(feature = "sftp")))]
fn unsupported(protocol: Protocol) -> TransferError {
    TransferError::new(
        TransferErrorKind::Unsupported,
        format!("{} support is not compiled in", protocol),
    )
}

impl TransferClientFactory for DefaultTransferClientFactory {
    fn create(
        &self,
        connection: &ConnectionSettings,
        policy: &TransferPolicy,
    ) -> TransferResult<Box<dyn TransferClient>> {
        if connection.protocol != Protocol::Local && connection.host.trim().is_empty() {
            return Err(TransferError::new(
                TransferErrorKind::InvalidConfig,
                format!("{} connection requires a host", connection.protocol),
            ));
        }
        debug!(protocol = %connection.protocol, host = %connection.host, "Creating transfer client");
        match connection.protocol {
            Protocol::Local => Ok(self.build::<LocalFs>(connection, policy)),
            #[cfg(feature = "ftp")]
            Protocol::Ftp => Ok(self.build::<crate::ftp::FtpFs>(connection, policy)),
            #[cfg(not(feature = "ftp"))]
            Protocol::Ftp => Err(unsupported(Protocol::Ftp)),
            #[cfg(feature = "sftp")]
            Protocol::Sftp => Ok(self.build::<crate::sftp::SftpFs>(connection, policy)),
            #[cfg(not(feature = "sftp"))]
            Protocol::Sftp => Err(unsupported(Protocol::Sftp)),
        }
    }
}

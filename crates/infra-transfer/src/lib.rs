// TideSync Infrastructure - Transfer Adapters
// Implements: TransferClient, TransferClientFactory, ResumeStore

pub mod client;
pub mod copy;
pub mod factory;
#[cfg(feature = "ftp")]
pub mod ftp;
pub mod hashing;
pub mod local;
pub mod locked_file;
pub mod pipeline;
pub mod remote_fs;
pub mod resume;
#[cfg(feature = "sftp")]
pub mod sftp;
pub mod throttle;

pub use client::FsTransferClient;
pub use factory::DefaultTransferClientFactory;
#[cfg(feature = "ftp")]
pub use ftp::FtpFs;
pub use hashing::{hash_file, hash_reader};
pub use local::LocalFs;
pub use locked_file::{default_snapshot_dir, is_locked, prepare_source, SourceFile};
pub use remote_fs::{RemoteFs, RemoteStat};
pub use resume::{default_resume_dir, FileResumeStore};
#[cfg(feature = "sftp")]
pub use sftp::SftpFs;
pub use throttle::BandwidthThrottle;

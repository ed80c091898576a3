// Connection Settings

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Transport used to reach the endpoint side of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Local,
    Ftp,
    Sftp,
}

impl Protocol {
    pub fn default_port(self) -> u16 {
        match self {
            Protocol::Local => 0,
            Protocol::Ftp => 21,
            Protocol::Sftp => 22,
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Local => write!(f, "local"),
            Protocol::Ftp => write!(f, "ftp"),
            Protocol::Sftp => write!(f, "sftp"),
        }
    }
}

/// Endpoint and authentication fields for one connection profile.
///
/// Immutable once a transfer starts; jobs share it through `Arc`.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSettings {
    pub protocol: Protocol,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub private_key_path: Option<PathBuf>,
    #[serde(default)]
    pub key_passphrase: Option<String>,
    /// FTP only
    #[serde(default = "default_passive")]
    pub passive_mode: bool,
}

fn default_passive() -> bool {
    true
}

impl ConnectionSettings {
    pub fn local() -> Self {
        Self {
            protocol: Protocol::Local,
            passive_mode: true,
            ..Default::default()
        }
    }

    pub fn remote(protocol: Protocol, host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            protocol,
            host: host.into(),
            username: username.into(),
            passive_mode: true,
            ..Default::default()
        }
    }

    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.protocol.default_port())
    }

    /// `host:port`, for socket address resolution
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.effective_port())
    }
}

// Manual Debug so secrets never reach the logs
impl std::fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("protocol", &self.protocol)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("private_key_path", &self.private_key_path)
            .field("passive_mode", &self.passive_mode)
            .finish()
    }
}

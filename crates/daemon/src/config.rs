// Daemon configuration (TOML file + environment overrides)

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tidesync_core::domain::{
    ConnectionSettings, MultiJobConfiguration, Priority, TransferDirection, TransferMode,
    TransferPolicy, DEFAULT_PRIORITY,
};

pub const DEFAULT_CONFIG_PATH: &str = "~/.tidesync/config.toml";
pub const DEFAULT_DB_PATH: &str = "~/.tidesync/tidesync.db";

pub const ENV_CONFIG: &str = "TIDESYNC_CONFIG";
pub const ENV_DB_PATH: &str = "TIDESYNC_DB_PATH";
pub const ENV_MAX_CONCURRENT_JOBS: &str = "TIDESYNC_MAX_CONCURRENT_JOBS";

/// Expand `~` and environment variables in a configured path
pub fn expand_path(raw: &str) -> PathBuf {
    match shellexpand::full(raw) {
        Ok(expanded) => PathBuf::from(expanded.into_owned()),
        Err(_) => PathBuf::from(shellexpand::tilde(raw).into_owned()),
    }
}

/// Config file location: `TIDESYNC_CONFIG` or the default path
pub fn config_path() -> PathBuf {
    let raw = std::env::var(ENV_CONFIG).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    expand_path(&raw)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub database_path: String,
    /// Shared checkpoint directory for jobs whose policy names none
    pub resume_dir: Option<String>,
    pub snapshot_dir: Option<String>,
    pub runner: MultiJobConfiguration,
    pub queues: Vec<QueueConfig>,
    pub jobs: Vec<JobConfig>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            database_path: DEFAULT_DB_PATH.to_string(),
            resume_dir: None,
            snapshot_dir: None,
            runner: MultiJobConfiguration::default(),
            queues: Vec::new(),
            jobs: Vec::new(),
        }
    }
}

/// Pre-declared queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    pub id: String,
    pub name: Option<String>,
    pub max_concurrent_jobs: usize,
    #[serde(default)]
    pub priority: i32,
}

impl QueueConfig {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

fn default_true() -> bool {
    true
}

/// Job definition upserted into the repository at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    pub id: String,
    pub name: Option<String>,
    pub source_path: String,
    pub destination_path: String,
    #[serde(default)]
    pub direction: TransferDirection,
    #[serde(default)]
    pub mode: TransferMode,
    #[serde(default = "default_true")]
    pub recursive: bool,
    #[serde(default = "default_true")]
    pub overwrite: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub max_retries: Option<u32>,
    #[serde(default = "ConnectionSettings::local")]
    pub connection: ConnectionSettings,
    #[serde(default)]
    pub policy: TransferPolicy,

    /// Queue the job as soon as the daemon starts
    #[serde(default)]
    pub run_on_start: bool,
    pub queue: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl JobConfig {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: None,
            source_path: String::new(),
            destination_path: String::new(),
            direction: TransferDirection::default(),
            mode: TransferMode::default(),
            recursive: true,
            overwrite: true,
            enabled: true,
            max_retries: None,
            connection: ConnectionSettings::local(),
            policy: TransferPolicy::default(),
            run_on_start: false,
            queue: None,
            priority: DEFAULT_PRIORITY,
            depends_on: Vec::new(),
        }
    }
}

impl DaemonConfig {
    /// Load the TOML file; a missing file yields defaults
    pub fn load(path: &Path) -> Result<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(e).with_context(|| format!("reading config {}", path.display()))
            }
        };
        Self::parse(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply `TIDESYNC_*` overrides through `lookup`
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(db_path) = lookup(ENV_DB_PATH) {
            self.database_path = db_path;
        }
        if let Some(max) = lookup(ENV_MAX_CONCURRENT_JOBS) {
            self.runner.global_max_concurrent_jobs = max
                .trim()
                .parse()
                .with_context(|| format!("{} must be a positive integer", ENV_MAX_CONCURRENT_JOBS))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.runner.validate()?;
        for queue in &self.queues {
            if queue.id.trim().is_empty() {
                bail!("queue id must not be empty");
            }
            if queue.max_concurrent_jobs == 0 {
                bail!("queue {}: max_concurrent_jobs must be greater than 0", queue.id);
            }
        }
        for job in &self.jobs {
            if job.id.trim().is_empty() {
                bail!("job id must not be empty");
            }
            if job.source_path.is_empty() || job.destination_path.is_empty() {
                bail!("job {}: source_path and destination_path are required", job.id);
            }
        }
        Ok(())
    }

    pub fn database_file(&self) -> PathBuf {
        expand_path(&self.database_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tidesync_core::domain::Protocol;

    const SAMPLE: &str = r#"
database_path = "/var/lib/tidesync/state.db"
resume_dir = "/var/lib/tidesync/resume"

[runner]
global_max_concurrent_jobs = 8
enable_auto_retry = false

[[queues]]
id = "nightly"
name = "Nightly backups"
max_concurrent_jobs = 2
priority = 10

[[jobs]]
id = "photos"
source_path = "/home/me/photos"
destination_path = "/backup/photos"
mode = "mirror"
run_on_start = true
queue = "nightly"
depends_on = ["docs"]

[jobs.connection]
protocol = "sftp"
host = "nas.local"
username = "backup"
private_key_path = "~/.ssh/id_ed25519"

[jobs.policy]
verify_integrity = true
hash_algorithm = "blake3"
"#;

    #[test]
    fn test_parse_sample() {
        let config = DaemonConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.database_path, "/var/lib/tidesync/state.db");
        assert_eq!(config.runner.global_max_concurrent_jobs, 8);
        assert!(!config.runner.enable_auto_retry);
        // unspecified runner keys keep their defaults
        assert_eq!(config.runner.default_queue_max_concurrent_jobs, 2);

        assert_eq!(config.queues.len(), 1);
        assert_eq!(config.queues[0].display_name(), "Nightly backups");
        assert_eq!(config.queues[0].priority, 10);

        let job = &config.jobs[0];
        assert_eq!(job.display_name(), "photos");
        assert_eq!(job.mode, TransferMode::Mirror);
        assert!(job.recursive);
        assert!(job.run_on_start);
        assert_eq!(job.depends_on, vec!["docs".to_string()]);
        assert_eq!(job.connection.protocol, Protocol::Sftp);
        assert_eq!(job.connection.host, "nas.local");
        assert!(job.policy.verify_integrity);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = DaemonConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, DaemonConfig::default());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_DB_PATH, "/tmp/override.db"),
            (ENV_MAX_CONCURRENT_JOBS, "3"),
        ]
        .into_iter()
        .collect();
        let mut config = DaemonConfig::default();
        config
            .apply_env_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.database_path, "/tmp/override.db");
        assert_eq!(config.runner.global_max_concurrent_jobs, 3);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let mut config = DaemonConfig::default();
        let result =
            config.apply_env_overrides(|k| (k == ENV_MAX_CONCURRENT_JOBS).then(|| "many".into()));
        assert!(result.is_err());

        config.runner.global_max_concurrent_jobs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_queue_without_capacity_rejected() {
        let config = DaemonConfig::parse(
            r#"
[[queues]]
id = "q"
max_concurrent_jobs = 0
"#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }
}

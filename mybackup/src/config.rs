//! Configuration management for backup and restore runs.
//!
//! Built-in defaults, overridden by an optional TOML file, overridden by
//! `MYBACKUP__<SECTION>__<KEY>` environment variables. The database password
//! only ever comes from `MYSQL_PASSWORD`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::utils::{MyBackupError, Result};

/// Environment variable holding the database password.
pub const PASSWORD_ENV: &str = "MYSQL_PASSWORD";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mysql: MysqlConfig,
    pub backup: BackupConfig,
    pub restore: RestoreConfig,
    pub store: StoreConfig,
    pub sidecar: SidecarConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MysqlConfig {
    /// Port mysqld listens on in every pod
    pub port: u16,

    /// Account used for dumps and restores
    pub user: String,

    pub connect_timeout_secs: u64,

    /// Upper bound for a single statement, including large result transfers
    pub read_timeout_secs: u64,

    /// How long the single pooled connection may sit idle
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Writable root holding `<namespace>/<cluster>/<pod>/<timestamp>` dumps
    pub dump_dir: PathBuf,

    /// Threads handed to the dump and load utilities
    pub threads: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestoreConfig {
    /// Iterations of the pod-address and server-ready polls
    pub poll_attempts: u32,

    pub poll_interval_ms: u64,

    /// Whole-attempt restarts allowed after a privilege race
    pub max_attempts: u32,

    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database holding cluster state
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SidecarConfig {
    /// HTTP port of the backup trigger
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for MysqlConfig {
    fn default() -> Self {
        Self {
            port: 3306,
            user: "root".to_string(),
            connect_timeout_secs: 5,
            read_timeout_secs: 60,
            idle_timeout_secs: 30,
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            dump_dir: PathBuf::from("/backup"),
            threads: 4,
        }
    }
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            poll_attempts: 600,
            poll_interval_ms: 1000,
            max_attempts: 4,
            retry_delay_ms: 1000,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/backup/cluster-state.db"),
        }
    }
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self { port: 8082 }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl MysqlConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl RestoreConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Config {
    /// Load configuration: defaults, then `path` if given, then environment.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix("MYBACKUP")
                .separator("__")
                .try_parsing(true),
        );

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.backup.threads == 0 {
            return Err(MyBackupError::Config("backup.threads must be at least 1".into()));
        }
        if self.restore.max_attempts == 0 {
            return Err(MyBackupError::Config("restore.max_attempts must be at least 1".into()));
        }
        if self.mysql.user.is_empty() {
            return Err(MyBackupError::Config("mysql.user must not be empty".into()));
        }
        Ok(())
    }
}

/// Name of this node, used as the sidecar's identity in logs.
pub fn node_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "mybackup".to_string())
}

/// Database account handed to the core by the orchestration layer.
#[derive(Clone)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    /// Take the password from `MYSQL_PASSWORD`; refuse to continue without it.
    pub fn from_env(user: &str) -> Result<Self> {
        match std::env::var(PASSWORD_ENV) {
            Ok(password) if !password.is_empty() => Ok(Self {
                user: user.to_string(),
                password,
            }),
            _ => Err(MyBackupError::Config(format!(
                "{} must be set to the database password",
                PASSWORD_ENV
            ))),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

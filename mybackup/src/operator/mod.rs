//! Data-plane operations against a single MySQL instance.
//!
//! [`DatabaseOperator`] is the only way the managers touch a database.
//! [`MysqlOperator`] is the production implementation; managers receive a
//! [`Connector`] at construction time and open one operator per run.

pub mod command;
#[cfg(test)]
pub mod fake;
pub mod mysql;

pub use mysql::{MysqlConnector, MysqlOperator};

use chrono::NaiveDateTime;
use std::future::Future;
use std::path::Path;

use crate::fs::DumpCandidate;
use crate::utils::Result;

/// Service accounts that are never copied into a dump.
pub const INTERNAL_USERS: &[&str] = &["radondb_metrics", "radondb_operator", "radondb_repl", "root"];

/// Replication and identity state observed on a live instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStatus {
    pub super_read_only: bool,
    pub server_uuid: String,
    /// Binlog currently written, empty when binary logging is off
    pub binlog_file: String,
    pub executed_gtid_set: String,
}

/// Server version families with different `SHOW BINARY LOGS` result shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerFamily {
    Mysql57,
    Mysql80,
}

impl ServerFamily {
    /// `5.7*` selects the 5.7 family; anything else is treated as 8.0.
    pub fn from_version_hint(hint: &str) -> Self {
        if hint.trim().starts_with("5.7") {
            ServerFamily::Mysql57
        } else {
            ServerFamily::Mysql80
        }
    }

    /// Columns `SHOW BINARY LOGS` returns for this family.
    pub fn binlog_columns(&self) -> &'static [&'static str] {
        match self {
            ServerFamily::Mysql57 => &["Log_name", "File_size"],
            ServerFamily::Mysql80 => &["Log_name", "File_size", "Encrypted"],
        }
    }
}

/// Where and as whom to connect.
#[derive(Clone)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .finish()
    }
}

pub trait DatabaseOperator: Send + Sync {
    /// Lightweight liveness check.
    fn ping(&self) -> impl Future<Output = Result<()>> + Send;

    fn server_status(&self) -> impl Future<Output = Result<ServerStatus>> + Send;

    /// Dump the whole instance into `target_dir`, skipping [`INTERNAL_USERS`].
    fn full_backup(&self, target_dir: &Path) -> impl Future<Output = Result<()>> + Send;

    /// Binlog file names as the server lists them, unsorted.
    fn list_binlogs(&self, version_hint: &str) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Stream binlogs starting at `binlog` into `target_dir`, skipping
    /// transactions in `exclude_gtids`.
    fn binlog_backup(
        &self,
        target_dir: &Path,
        binlog: &str,
        exclude_gtids: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    fn prepare_restore(&self) -> impl Future<Output = Result<()>> + Send;

    fn load_dump(&self, dump: &DumpCandidate) -> impl Future<Output = Result<()>> + Send;

    /// Replay the binlogs stored with `successor` up to `stop_at`.
    fn load_binlog(
        &self,
        successor: &DumpCandidate,
        stop_at: NaiveDateTime,
    ) -> impl Future<Output = Result<()>> + Send;

    fn finish_restore(&self) -> impl Future<Output = Result<()>> + Send;
}

/// Opens an operator session against a host.
pub trait Connector: Send + Sync {
    type Operator: DatabaseOperator;

    fn open(&self, host: &str) -> Result<Self::Operator>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_from_hint() {
        assert_eq!(ServerFamily::from_version_hint("5.7.34"), ServerFamily::Mysql57);
        assert_eq!(ServerFamily::from_version_hint("8.0.25"), ServerFamily::Mysql80);
        assert_eq!(ServerFamily::from_version_hint(""), ServerFamily::Mysql80);
    }

    #[test]
    fn test_encrypted_column_only_on_80() {
        assert!(!ServerFamily::Mysql57.binlog_columns().contains(&"Encrypted"));
        assert!(ServerFamily::Mysql80.binlog_columns().contains(&"Encrypted"));
    }

    #[test]
    fn test_connection_params_hide_password() {
        let params = ConnectionParams {
            host: "10.0.0.1".into(),
            port: 3306,
            user: "root".into(),
            password: "s3cret".into(),
        };
        assert!(!format!("{:?}", params).contains("s3cret"));
    }
}

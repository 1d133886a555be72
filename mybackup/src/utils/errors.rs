//! Error types for backup and restore runs.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Restore primitive that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreStep {
    Prepare,
    LoadDump,
    LoadBinlog,
    Finish,
}

impl fmt::Display for RestoreStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RestoreStep::Prepare => "prepare",
            RestoreStep::LoadDump => "load dump",
            RestoreStep::LoadBinlog => "load binlog",
            RestoreStep::Finish => "finish",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum MyBackupError {
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("{tool} failed: {reason}")]
    ExternalTool { tool: String, reason: String },

    #[error("Restore step '{step}' failed: {source}")]
    RestoreStep {
        step: RestoreStep,
        #[source]
        source: Box<MyBackupError>,
    },

    /// The status query failed after the connection succeeded, usually because
    /// the account's grants have not reached this session yet.
    #[error("the connection hasn't reflected the latest user's privileges")]
    BadConnection,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("No candidate: {0}")]
    NoCandidate(String),

    #[error("No backup found under {}", .0.display())]
    NoBackupFound(PathBuf),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("State store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MyBackupError {
    pub fn tool(tool: &str, reason: impl Into<String>) -> Self {
        MyBackupError::ExternalTool {
            tool: tool.to_string(),
            reason: reason.into(),
        }
    }

    /// Attribute an error to a restore step. Cancellation passes through untouched.
    pub fn in_step(self, step: RestoreStep) -> Self {
        match self {
            MyBackupError::Cancelled | MyBackupError::RestoreStep { .. } => self,
            other => MyBackupError::RestoreStep {
                step,
                source: Box::new(other),
            },
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, MyBackupError::Conflict(_))
    }

    pub fn is_bad_connection(&self) -> bool {
        matches!(self, MyBackupError::BadConnection)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, MyBackupError::Cancelled)
    }
}

impl From<sqlx::Error> for MyBackupError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => MyBackupError::Connectivity(err.to_string()),
            sqlx::Error::ColumnIndexOutOfBounds { .. }
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::Decode(_)
            | sqlx::Error::TypeNotFound { .. } => MyBackupError::SchemaMismatch(err.to_string()),
            _ => MyBackupError::Query(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for MyBackupError {
    fn from(err: rusqlite::Error) -> Self {
        MyBackupError::Store(err.to_string())
    }
}

impl From<r2d2::Error> for MyBackupError {
    fn from(err: r2d2::Error) -> Self {
        MyBackupError::Store(err.to_string())
    }
}

impl From<tokio::task::JoinError> for MyBackupError {
    fn from(err: tokio::task::JoinError) -> Self {
        MyBackupError::Io(std::io::Error::other(err))
    }
}

pub type Result<T> = std::result::Result<T, MyBackupError>;

//! MySQL cluster backup and point-in-time restore.
//!
//! Full dumps plus incremental binlog capture, persisted as a backup
//! descriptor on the cluster, and restores that replay a dump and the
//! following binlogs up to a requested moment.

pub mod api;
pub mod backup;
pub mod binlog;
pub mod cluster;
pub mod config;
pub mod daemon;
pub mod fs;
pub mod operator;
pub mod restore;
pub mod utils;

use chrono::NaiveDateTime;

// Re-export commonly used types
pub use config::Config;
pub use utils::errors::MyBackupError;
pub type Result<T> = std::result::Result<T, MyBackupError>;

/// Format of dump directory names and restore points, always UTC.
pub const BACKUP_TIME_FORMAT: &str = "%Y%m%d-%H%M%S";

const BACKUP_TIME_LEN: usize = 15;

/// Parse a `YYYYMMDD-HHMMSS` timestamp. The whole string must match.
pub fn parse_backup_time(value: &str) -> Option<NaiveDateTime> {
    let bytes = value.as_bytes();
    if bytes.len() != BACKUP_TIME_LEN {
        return None;
    }
    // chrono tolerates padding and short fields; the name must be all digits
    let well_formed = bytes
        .iter()
        .enumerate()
        .all(|(i, b)| if i == 8 { *b == b'-' } else { b.is_ascii_digit() });
    if !well_formed {
        return None;
    }
    NaiveDateTime::parse_from_str(value, BACKUP_TIME_FORMAT).ok()
}

pub fn format_backup_time(time: &NaiveDateTime) -> String {
    time.format(BACKUP_TIME_FORMAT).to_string()
}

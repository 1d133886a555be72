//! Ordering of binary log segment names.
//!
//! Segment names look like `binlog.000123`. The number after the last `.` is
//! the only ordering key: once a server rolls past `.999999` the names stop
//! sorting lexicographically.

/// Subdirectory of a dump holding the binlogs captured up to that dump.
pub const BINLOG_DIR: &str = "binlog";

/// Sequence number of a binlog file name, 0 when absent or unparseable.
pub fn sequence_number(name: &str) -> u64 {
    name.rsplit_once('.')
        .and_then(|(_, suffix)| suffix.parse().ok())
        .unwrap_or(0)
}

/// Sort binlog file names ascending by sequence number. Names with equal
/// numbers keep their input order.
pub fn sort_by_sequence<S: AsRef<str>>(mut names: Vec<S>) -> Vec<S> {
    names.sort_by_key(|name| sequence_number(name.as_ref()));
    names
}

/// Binlog with the lowest sequence number, if any.
pub fn earliest<S: AsRef<str> + Clone>(names: &[S]) -> Option<S> {
    names
        .iter()
        .min_by_key(|name| sequence_number(name.as_ref()))
        .cloned()
}

//! Choosing the dump and binlogs that reach a restore point.

use chrono::NaiveDateTime;
use std::io::ErrorKind;
use std::path::Path;

use crate::fs::{find_dump_candidates, DumpCandidate};
use crate::utils::{MyBackupError, Result};

/// The dump to load and the dump whose `binlog/` directory continues it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestorePlan {
    /// Latest dump taken at or before the restore point
    pub dump: DumpCandidate,
    /// First dump taken after the restore point
    pub successor: Option<DumpCandidate>,
}

impl RestorePlan {
    /// Dump whose binlogs must be replayed to reach `point`, if any. An
    /// exact hit on the dump's own timestamp needs no replay.
    pub fn binlog_source(&self, point: NaiveDateTime) -> Option<&DumpCandidate> {
        if self.dump.timestamp == point {
            None
        } else {
            self.successor.as_ref()
        }
    }
}

/// Pick the plan among `candidates`, which may come in any order.
pub fn plan(mut candidates: Vec<DumpCandidate>, point: NaiveDateTime) -> Option<RestorePlan> {
    candidates.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.path.cmp(&b.path)));

    let mut dump = None;
    let mut successor = None;
    for candidate in candidates {
        if candidate.timestamp > point {
            successor = Some(candidate);
            break;
        }
        dump = Some(candidate);
    }

    dump.map(|dump| RestorePlan { dump, successor })
}

/// Scan `root` and resolve the plan for `point`.
///
/// # Errors
/// `NoBackupFound` when `root` is missing or holds no dump taken at or
/// before `point`.
pub fn resolve(root: &Path, point: NaiveDateTime) -> Result<RestorePlan> {
    let candidates = match find_dump_candidates(root) {
        Ok(candidates) => candidates,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(MyBackupError::NoBackupFound(root.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };

    plan(candidates, point).ok_or_else(|| MyBackupError::NoBackupFound(root.to_path_buf()))
}

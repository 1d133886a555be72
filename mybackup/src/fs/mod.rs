//! File system accounting for backup artifacts.

pub mod metadata;
pub mod usage;
pub mod walker;

pub use usage::dir_usage;
pub use walker::{find_dump_candidates, DumpCandidate};

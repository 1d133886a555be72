//! On-disk usage of backup artifacts.

use std::fs::Metadata;
use std::path::Path;
use walkdir::WalkDir;

/// Allocated size of a directory tree in bytes, the root entry included.
///
/// Counts allocated blocks (`st_blocks * 512`) so sparse and compressed
/// files report what they really occupy. Platforms without block counts fall
/// back to the logical length. Symlinks are not followed.
pub fn dir_usage(root: &Path) -> std::io::Result<u64> {
    let mut usage = 0u64;

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry?;
        let metadata = entry.metadata()?;
        usage = usage.saturating_add(allocated_bytes(&metadata));
    }

    Ok(usage)
}

#[cfg(unix)]
fn allocated_bytes(metadata: &Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    metadata.blocks().saturating_mul(512)
}

#[cfg(not(unix))]
fn allocated_bytes(metadata: &Metadata) -> u64 {
    metadata.len()
}

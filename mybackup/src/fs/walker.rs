//! Discovery of dump directories under a backup root.
//!
//! Dump directories are named after their capture time (`YYYYMMDD-HHMMSS`)
//! and may sit at any depth below the root, typically
//! `<root>/<source pod>/<timestamp>`.

use crate::parse_backup_time;
use chrono::NaiveDateTime;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A dump directory found during walking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpCandidate {
    /// Directory name, the capture timestamp in textual form
    pub name: String,

    /// Full path to the directory
    pub path: PathBuf,

    /// Capture time parsed from the name
    pub timestamp: NaiveDateTime,
}

/// Walk `root` in file-name order and collect every directory whose whole
/// name is a capture timestamp. Matched directories are not descended into.
///
/// # Returns
/// * `Ok(Vec<DumpCandidate>)` - Candidates in encounter order
/// * `Err(io::Error)` - If the root or a subdirectory cannot be read
pub fn find_dump_candidates(root: &Path) -> std::io::Result<Vec<DumpCandidate>> {
    let mut candidates = Vec::new();
    let mut walker = WalkDir::new(root)
        .follow_links(false)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter();

    while let Some(entry) = walker.next() {
        let entry = entry?;
        if !entry.file_type().is_dir() {
            continue;
        }

        let name = entry.file_name().to_string_lossy();
        if let Some(timestamp) = parse_backup_time(&name) {
            candidates.push(DumpCandidate {
                name: name.to_string(),
                path: entry.path().to_path_buf(),
                timestamp,
            });
            walker.skip_current_dir();
        }
    }

    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_walk_empty_directory() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let found = find_dump_candidates(temp_dir.path())?;
        assert!(found.is_empty());
        Ok(())
    }

    #[test]
    fn test_finds_nested_dump_dirs_in_name_order() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        fs::create_dir_all(root.join("sample-mysql-1/20230102-000000/binlog"))?;
        fs::create_dir_all(root.join("sample-mysql-0/20230101-000000"))?;
        fs::create_dir_all(root.join("sample-mysql-0/20230103-000000"))?;

        let found = find_dump_candidates(root)?;
        let names: Vec<&str> = found.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["20230101-000000", "20230103-000000", "20230102-000000"]);
        assert_eq!(found[2].path, root.join("sample-mysql-1/20230102-000000"));

        Ok(())
    }

    #[test]
    fn test_ignores_files_and_near_misses() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        fs::write(root.join("20230101-000000"), b"not a dir")?;
        fs::create_dir(root.join("x20230101-000000"))?;
        fs::create_dir(root.join("20230101-0000"))?;
        fs::create_dir(root.join("20231399-000000"))?;
        fs::create_dir(root.join("2023 102-120000"))?;
        fs::create_dir(root.join("20230105-101010"))?;

        let found = find_dump_candidates(root)?;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "20230105-101010");

        Ok(())
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let err = find_dump_candidates(&temp_dir.path().join("missing")).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }
}

//! Metadata written by the dump utility next to each dump.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::utils::{MyBackupError, Result};

/// File name of the dump metadata document inside a dump directory.
pub const DUMP_METADATA_FILE: &str = "@.json";

/// The parts of `@.json` this crate relies on
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DumpMetadata {
    /// GTID set executed on the source when the dump was consistent
    #[serde(default)]
    pub gtid_executed: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,
}

impl DumpMetadata {
    /// Read the metadata of the dump stored in `dir`.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let path = dir.join(DUMP_METADATA_FILE);
        let data = fs::read(&path).map_err(|e| {
            MyBackupError::Io(std::io::Error::new(
                e.kind(),
                format!("could not read {}: {}", path.display(), e),
            ))
        })?;
        let metadata = serde_json::from_slice(&data)?;
        Ok(metadata)
    }
}

/// Executed GTID set recorded in the dump stored in `dir`.
pub fn gtid_executed(dir: &Path) -> Result<String> {
    Ok(DumpMetadata::from_dir(dir)?.gtid_executed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_reads_gtid_executed() -> Result<()> {
        let temp_dir = TempDir::new()?;
        fs::write(
            temp_dir.path().join(DUMP_METADATA_FILE),
            br#"{"dumper":"mysqlsh Ver 8.0.32","gtidExecuted":"3e11fa47-71ca-11e1-9e33-c80aa9429562:1-5","serverVersion":"8.0.32"}"#,
        )?;

        let gtid = gtid_executed(temp_dir.path())?;
        assert_eq!(gtid, "3e11fa47-71ca-11e1-9e33-c80aa9429562:1-5");

        let metadata = DumpMetadata::from_dir(temp_dir.path())?;
        assert_eq!(metadata.server_version.as_deref(), Some("8.0.32"));
        Ok(())
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let temp_dir = TempDir::new().unwrap();
        let err = gtid_executed(temp_dir.path()).unwrap_err();
        assert!(matches!(err, MyBackupError::Io(_)));
    }

    #[test]
    fn test_garbage_is_serialization_error() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join(DUMP_METADATA_FILE), b"{not json").unwrap();
        let err = gtid_executed(temp_dir.path()).unwrap_err();
        assert!(matches!(err, MyBackupError::Serialization(_)));
    }
}

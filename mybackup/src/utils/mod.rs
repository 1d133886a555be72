//! Utility modules shared by the backup and restore runs.

pub mod diagnostics;
pub mod errors;
pub mod logger;

pub use diagnostics::Diagnosed;
pub use errors::{MyBackupError, RestoreStep, Result};

//! The archival pipeline.
//!
//! One run moves aged rows out of the source table in four stages:
//!
//! 1. **Cutoff**: `now - retention_days`, optionally truncated to midnight UTC
//! 2. **Fetch**: every row whose timestamp is strictly before the cutoff
//! 3. **Externalize**: write a CSV, upload it, and read back its metadata
//! 4. **Delete**: remove exactly the exported keys in one transaction
//!
//! A failure in stages 1-3 ends the run with the source table untouched.
//! The local CSV is removed at the end of every run unless `keep_local` is set.

mod cutoff;
mod pipeline;

use std::path::PathBuf;

pub use cutoff::{Cutoff, CutoffValue};
pub use pipeline::Archiver;
use thiserror::Error;

use crate::{db::DbError, records::RecordError, staging::ExportError, storage::StorageError};

/// What a run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveOutcome {
    /// No row was older than the cutoff; nothing was written or deleted.
    NothingToArchive { cutoff: Cutoff },
    /// Rows were fetched and staged but neither uploaded nor deleted.
    DryRun {
        cutoff: Cutoff,
        rows: usize,
        /// Set when the staging file was kept.
        file: Option<PathBuf>,
    },
    Archived(ArchiveReport),
}

/// Summary of a completed archive run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveReport {
    pub cutoff: Cutoff,
    pub rows_exported: usize,
    pub rows_deleted: u64,
    pub rows_copied_to_recovery: u64,
    /// Where the archive landed (`s3://bucket/key` or a path).
    pub location: String,
    pub object_key: String,
    pub bytes: u64,
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Export failed: {0}")]
    Export(#[from] ExportError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Upload verification failed for {key}: {reason}")]
    Verification { key: String, reason: String },

    #[error("Id column '{0}' is not present in the fetched rows")]
    MissingIdColumn(String),

    #[error("Row {row} has a NULL value in id column '{column}'")]
    NullKey { column: String, row: usize },

    #[error("No unused archive key for {file_name} after {attempts} attempts")]
    KeysExhausted { file_name: String, attempts: u32 },

    #[error("Staging directory {path} is not writable: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid archive configuration: {0}")]
    Config(String),
}

impl From<RecordError> for ArchiveError {
    fn from(err: RecordError) -> Self {
        match err {
            RecordError::MissingColumn(column) => ArchiveError::MissingIdColumn(column),
            RecordError::NullKey { column, row } => ArchiveError::NullKey { column, row },
        }
    }
}

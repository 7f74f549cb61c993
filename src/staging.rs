//! Local CSV export.
//!
//! Fetched rows are written to a CSV file in the staging directory before
//! upload. The header row holds the column names in select order; NULL values
//! are written as empty fields.

use std::{
    fs::File,
    io::BufWriter,
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{debug, warn};

use crate::{config::StagingConfig, records::RecordSet};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Failed to write staging file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// A CSV file written to the staging directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub path: PathBuf,
    pub rows: usize,
    pub bytes: u64,
}

impl StagedFile {
    /// Remove the file. A file that is already gone is not an error.
    pub fn cleanup(&self) -> std::io::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "Removed staging file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Write `records` to `<staging dir>/<file_name>`, creating the directory if needed.
///
/// A partially written file is removed before the error is returned.
pub fn stage_csv(
    records: &RecordSet,
    config: &StagingConfig,
    file_name: &str,
) -> Result<StagedFile, ExportError> {
    let dir = config.dir();
    std::fs::create_dir_all(&dir).map_err(|source| ExportError::Io {
        path: dir.clone(),
        source,
    })?;

    let path = dir.join(file_name);
    match write_csv(records, &path) {
        Ok(bytes) => Ok(StagedFile {
            path,
            rows: records.len(),
            bytes,
        }),
        Err(e) => {
            if let Err(cleanup) = std::fs::remove_file(&path)
                && cleanup.kind() != std::io::ErrorKind::NotFound
            {
                warn!(path = %path.display(), error = %cleanup, "Failed to remove partial staging file");
            }
            Err(e)
        }
    }
}

fn write_csv(records: &RecordSet, path: &Path) -> Result<u64, ExportError> {
    let io_err = |source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    };

    let file = File::create(path).map_err(io_err)?;
    let mut wtr = csv::Writer::from_writer(BufWriter::new(file));

    wtr.write_record(&records.columns)?;
    for row in &records.rows {
        wtr.write_record(row.iter().map(|v| v.to_csv_field()))?;
    }

    let file = wtr
        .into_inner()
        .map_err(|e| io_err(e.into_error()))?
        .into_inner()
        .map_err(|e| io_err(e.into_error()))?;
    file.sync_all().map_err(io_err)?;

    Ok(file.metadata().map_err(io_err)?.len())
}

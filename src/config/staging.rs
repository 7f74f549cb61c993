use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Local staging for the export file.
///
/// The CSV is written here before upload and removed afterwards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct StagingConfig {
    /// Directory for the export file. Created if missing.
    /// Default: the system temp directory
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// Keep the local CSV after the run instead of deleting it.
    /// Default: false
    #[serde(default)]
    pub keep_local: bool,
}

impl StagingConfig {
    /// Resolved staging directory.
    pub fn dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(dir) = &self.dir
            && dir.as_os_str().is_empty()
        {
            return Err("staging.dir cannot be empty".to_string());
        }
        Ok(())
    }
}

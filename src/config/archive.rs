//! Archive job configuration.
//!
//! Describes the source table, how its age column is stored, and how far
//! back rows are kept before they are moved to archive storage.
//!
//! # Example
//!
//! ```toml
//! [archive]
//! table = "run"
//! id_column = "run_id"
//! timestamp_column = "msg_sent_date"
//! timestamp_format = "epoch_millis"
//! retention_days = 60
//! cutoff_alignment = "start_of_day"
//! file_prefix = "run_archive"
//! max_rows = 0
//! delete_batch_size = 1000
//! verify_upload = true
//! dry_run = false
//! ```

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Upper bound on `retention_days` (about a century).
pub const MAX_RETENTION_DAYS: u32 = 36_500;

/// Upper bound on `delete_batch_size`. Each key is one bind parameter and
/// SQLite caps a statement at 32766 of them.
pub const MAX_DELETE_BATCH_SIZE: u32 = 32_766;

/// Table names may be schema-qualified (`schema.table`); columns may not.
static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$").expect("valid regex")
});

/// Archive job configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct ArchiveConfig {
    /// Table to archive from.
    pub table: String,

    /// Primary key column. Deletion targets exactly the exported keys.
    pub id_column: String,

    /// Column holding the row's age.
    pub timestamp_column: String,

    /// How `timestamp_column` is stored.
    /// Default: epoch_millis
    #[serde(default)]
    pub timestamp_format: TimestampFormat,

    /// Rows older than this many days are archived.
    /// Default: 60
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Whether the cutoff is truncated to midnight UTC.
    /// Default: start_of_day
    #[serde(default)]
    pub cutoff_alignment: CutoffAlignment,

    /// Archive file name prefix. Files are named `<prefix>_<timestamp>.csv`.
    /// Default: "<table>_archive"
    #[serde(default)]
    file_prefix: Option<String>,

    /// chrono format string for the file name timestamp.
    /// Default: "%Y%m%d"
    #[serde(default = "default_file_timestamp_format")]
    pub file_timestamp_format: String,

    /// Maximum number of rows archived per run (oldest first).
    /// Set to 0 for unlimited.
    /// Default: 0
    #[serde(default)]
    pub max_rows: u64,

    /// Number of keys per DELETE statement.
    /// Default: 1000
    #[serde(default = "default_delete_batch_size")]
    pub delete_batch_size: u32,

    /// Optional in-database copy of archived rows, written in the same
    /// transaction as the delete. Must have the same columns as `table`.
    #[serde(default)]
    pub recovery_table: Option<String>,

    /// Confirm the uploaded object exists and carries archive metadata
    /// before deleting anything.
    /// Default: true
    #[serde(default = "default_true")]
    pub verify_upload: bool,

    /// If true, fetch and stage the export but neither upload nor delete.
    /// Default: false
    #[serde(default)]
    pub dry_run: bool,
}

/// Storage representation of the timestamp column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum TimestampFormat {
    /// Milliseconds since the Unix epoch in an integer column.
    #[default]
    EpochMillis,
    /// Seconds since the Unix epoch in an integer column.
    EpochSeconds,
    /// A native DATETIME / TIMESTAMP column, compared in UTC.
    Datetime,
}

/// How the retention window is anchored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum CutoffAlignment {
    /// Midnight UTC of the day `retention_days` ago. Repeated runs on the
    /// same day select the same rows.
    #[default]
    StartOfDay,
    /// Exactly `retention_days * 24h` before now.
    Exact,
}

fn default_retention_days() -> u32 {
    60
}

fn default_file_timestamp_format() -> String {
    "%Y%m%d".to_string()
}

fn default_delete_batch_size() -> u32 {
    1000
}

fn default_true() -> bool {
    true
}

impl ArchiveConfig {
    /// Config for `table` with every optional setting at its default.
    pub fn new(
        table: impl Into<String>,
        id_column: impl Into<String>,
        timestamp_column: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            id_column: id_column.into(),
            timestamp_column: timestamp_column.into(),
            timestamp_format: TimestampFormat::default(),
            retention_days: default_retention_days(),
            cutoff_alignment: CutoffAlignment::default(),
            file_prefix: None,
            file_timestamp_format: default_file_timestamp_format(),
            max_rows: 0,
            delete_batch_size: default_delete_batch_size(),
            recovery_table: None,
            verify_upload: true,
            dry_run: false,
        }
    }

    /// Set an explicit archive file prefix.
    pub fn with_file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.file_prefix = Some(prefix.into());
        self
    }

    /// The archive file prefix, derived from the table name when unset.
    pub fn file_prefix(&self) -> String {
        match &self.file_prefix {
            Some(prefix) => prefix.clone(),
            None => format!("{}_archive", self.table.replace('.', "_")),
        }
    }

    /// Row limit for the fetch, `None` when unlimited.
    pub fn row_limit(&self) -> Option<u64> {
        (self.max_rows > 0).then_some(self.max_rows)
    }

    /// Validate the archive configuration.
    pub fn validate(&self) -> Result<(), String> {
        if !IDENTIFIER.is_match(&self.table) {
            return Err(format!("archive.table '{}' is not a valid identifier", self.table));
        }
        for (field, value) in [
            ("id_column", &self.id_column),
            ("timestamp_column", &self.timestamp_column),
        ] {
            if !is_column_identifier(value) {
                return Err(format!("archive.{field} '{value}' is not a valid column name"));
            }
        }
        if let Some(recovery) = &self.recovery_table
            && !IDENTIFIER.is_match(recovery)
        {
            return Err(format!(
                "archive.recovery_table '{recovery}' is not a valid identifier"
            ));
        }
        if !(1..=MAX_RETENTION_DAYS).contains(&self.retention_days) {
            return Err(format!(
                "archive.retention_days must be between 1 and {MAX_RETENTION_DAYS}"
            ));
        }
        if !(1..=MAX_DELETE_BATCH_SIZE).contains(&self.delete_batch_size) {
            return Err(format!(
                "archive.delete_batch_size must be between 1 and {MAX_DELETE_BATCH_SIZE}"
            ));
        }
        let prefix = self.file_prefix();
        if prefix.is_empty() || prefix.contains(['/', '\\']) {
            return Err(format!(
                "archive.file_prefix '{prefix}' must be a non-empty file name"
            ));
        }
        if self.file_timestamp_format.is_empty()
            || self.file_timestamp_format.contains(['/', '\\'])
        {
            return Err("archive.file_timestamp_format must not be empty or contain path separators".to_string());
        }
        if chrono::format::StrftimeItems::new(&self.file_timestamp_format)
            .any(|item| matches!(item, chrono::format::Item::Error))
        {
            return Err(format!(
                "archive.file_timestamp_format '{}' is not a valid strftime pattern",
                self.file_timestamp_format
            ));
        }
        Ok(())
    }
}

/// Check a single, unqualified SQL identifier.
pub(crate) fn is_column_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name) && !name.contains('.')
}

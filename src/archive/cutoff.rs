//! Retention cutoff selection.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, NaiveTime, SecondsFormat, TimeDelta, Utc};

use crate::config::{ArchiveConfig, CutoffAlignment, TimestampFormat};

/// The cutoff in the representation of the timestamp column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CutoffValue {
    EpochMillis(i64),
    EpochSeconds(i64),
    /// Naive UTC date-time.
    DateTime(NaiveDateTime),
}

impl fmt::Display for CutoffValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CutoffValue::EpochMillis(ms) => write!(f, "{ms}"),
            CutoffValue::EpochSeconds(s) => write!(f, "{s}"),
            CutoffValue::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

/// Rows strictly older than `instant` are aged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cutoff {
    pub instant: DateTime<Utc>,
    pub bound: CutoffValue,
}

impl Cutoff {
    pub fn compute(
        now: DateTime<Utc>,
        retention_days: u32,
        alignment: CutoffAlignment,
        format: TimestampFormat,
    ) -> Self {
        // Windows reaching past chrono's range clamp to its earliest instant.
        let shifted = TimeDelta::try_days(i64::from(retention_days))
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let instant = match alignment {
            CutoffAlignment::StartOfDay => shifted.date_naive().and_time(NaiveTime::MIN).and_utc(),
            CutoffAlignment::Exact => shifted,
        };

        let bound = match format {
            TimestampFormat::EpochMillis => CutoffValue::EpochMillis(instant.timestamp_millis()),
            TimestampFormat::EpochSeconds => CutoffValue::EpochSeconds(instant.timestamp()),
            TimestampFormat::Datetime => CutoffValue::DateTime(instant.naive_utc()),
        };

        Self { instant, bound }
    }

    pub fn from_config(now: DateTime<Utc>, config: &ArchiveConfig) -> Self {
        Self::compute(
            now,
            config.retention_days,
            config.cutoff_alignment,
            config.timestamp_format,
        )
    }
}

impl fmt::Display for Cutoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.instant.to_rfc3339_opts(SecondsFormat::Secs, true))
    }
}

//! Dynamically-typed rows fetched from the source table.
//!
//! The archiver runs `SELECT *`, so column types are only known at runtime.
//! Each backend decodes its native types into [`Value`], which knows how to
//! render itself as a CSV field and how to be bound back as a key.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

/// A single column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Decimal(Decimal),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    DateTimeUtc(DateTime<Utc>),
    Uuid(Uuid),
    Json(serde_json::Value),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Render as a CSV field. NULL becomes an empty field.
    pub fn to_csv_field(&self) -> String {
        match self {
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::UInt(u) => write!(f, "{u}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Decimal(d) => write!(f, "{d}"),
            Value::Text(s) => f.write_str(s),
            Value::Bytes(b) => write!(f, "0x{}", hex::encode(b)),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Time(t) => write!(f, "{}", t.format("%H:%M:%S%.f")),
            Value::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%.f")),
            Value::DateTimeUtc(dt) => {
                f.write_str(&dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            Value::Uuid(u) => write!(f, "{u}"),
            Value::Json(j) => write!(f, "{j}"),
        }
    }
}

/// Rows fetched in one run, with their column names in select order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl RecordSet {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column, matched case-insensitively.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
    }

    /// Primary key values of every row, in row order.
    pub fn ids(&self, id_column: &str) -> Result<Vec<Value>, RecordError> {
        let index = self
            .column_index(id_column)
            .ok_or_else(|| RecordError::MissingColumn(id_column.to_string()))?;

        self.rows
            .iter()
            .enumerate()
            .map(|(row, values)| match values.get(index) {
                Some(Value::Null) | None => Err(RecordError::NullKey {
                    column: id_column.to_string(),
                    row,
                }),
                Some(value) => Ok(value.clone()),
            })
            .collect()
    }
}

/// Problems with the shape of fetched rows.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("column '{0}' is not present in the result set")]
    MissingColumn(String),

    #[error("row {row} has a NULL value in key column '{column}'")]
    NullKey { column: String, row: usize },
}

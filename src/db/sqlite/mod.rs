//! SQLite archive source.
//!
//! SQLite reports the storage class of each value rather than a declared
//! column type, so decoding follows the value: INTEGER, REAL, BLOB, or text.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::{
    Column, Row, SqlitePool, TypeInfo, ValueRef,
    query::Query,
    sqlite::{Sqlite, SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
};
use tracing::{debug, instrument};

use super::{
    ArchiveSource, DeleteSummary,
    common::{Dialect, TableTarget, key_batches},
    error::{DbError, DbResult},
};
use crate::{
    archive::CutoffValue,
    config::SqliteConfig,
    records::{RecordSet, Value},
};

const DIALECT: Dialect = Dialect::Sqlite;

pub struct SqliteArchiveSource {
    pool: SqlitePool,
    target: TableTarget,
}

impl SqliteArchiveSource {
    pub async fn connect(config: &SqliteConfig, target: TableTarget) -> DbResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(
                SqliteConnectOptions::new()
                    .filename(&config.path)
                    .create_if_missing(false)
                    .busy_timeout(Duration::from_millis(config.busy_timeout_ms)),
            )
            .await?;
        Ok(Self::new(pool, target))
    }

    /// Wrap an existing pool. Primarily useful for testing.
    pub fn new(pool: SqlitePool, target: TableTarget) -> Self {
        Self { pool, target }
    }
}

#[async_trait]
impl ArchiveSource for SqliteArchiveSource {
    #[instrument(skip(self), fields(table = %self.target.table))]
    async fn fetch_before(&self, cutoff: &CutoffValue, limit: Option<u64>) -> DbResult<RecordSet> {
        let sql = DIALECT.select_aged(&self.target, limit);
        debug!(%sql, %cutoff, "Fetching aged rows");

        let rows = bind_cutoff(sqlx::query(&sql), cutoff)
            .fetch_all(&self.pool)
            .await?;

        decode_rows(&rows)
    }

    #[instrument(skip(self, ids), fields(table = %self.target.table, keys = ids.len()))]
    async fn delete_archived(
        &self,
        ids: &[Value],
        recovery_table: Option<&str>,
        batch_size: u32,
    ) -> DbResult<DeleteSummary> {
        let mut summary = DeleteSummary::default();
        let mut tx = self.pool.begin().await?;

        for batch in key_batches(ids, batch_size) {
            if let Some(recovery) = recovery_table {
                let sql = DIALECT.copy_by_ids(&self.target, recovery, batch.len());
                let query = batch.iter().fold(sqlx::query(&sql), bind_key);
                summary.copied += query.execute(&mut *tx).await?.rows_affected();
            }

            let sql = DIALECT.delete_by_ids(&self.target, batch.len());
            let query = batch.iter().fold(sqlx::query(&sql), bind_key);
            summary.deleted += query.execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(summary)
    }

    async fn ping(&self) -> DbResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

fn bind_cutoff<'q>(query: SqliteQuery<'q>, cutoff: &CutoffValue) -> SqliteQuery<'q> {
    match *cutoff {
        CutoffValue::EpochMillis(v) | CutoffValue::EpochSeconds(v) => query.bind(v),
        CutoffValue::DateTime(dt) => query.bind(dt),
    }
}

fn bind_key<'q>(query: SqliteQuery<'q>, value: &Value) -> SqliteQuery<'q> {
    match value {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(b) => query.bind(*b),
        Value::Int(i) => query.bind(*i),
        Value::UInt(u) => match i64::try_from(*u) {
            Ok(i) => query.bind(i),
            Err(_) => query.bind(u.to_string()),
        },
        Value::Float(f) => query.bind(*f),
        Value::Bytes(b) => query.bind(b.clone()),
        Value::Date(d) => query.bind(*d),
        Value::Time(t) => query.bind(*t),
        Value::DateTime(dt) => query.bind(*dt),
        Value::DateTimeUtc(dt) => query.bind(*dt),
        other => query.bind(other.to_string()),
    }
}

fn decode_rows(rows: &[SqliteRow]) -> DbResult<RecordSet> {
    let Some(first) = rows.first() else {
        return Ok(RecordSet::default());
    };

    let mut records = RecordSet::new(
        first
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect(),
    );

    for row in rows {
        let values = (0..records.columns.len())
            .map(|i| decode_column(row, i, &records.columns[i]))
            .collect::<DbResult<Vec<_>>>()?;
        records.rows.push(values);
    }

    Ok(records)
}

fn decode_column(row: &SqliteRow, index: usize, column: &str) -> DbResult<Value> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let storage = raw.type_info().name().to_ascii_uppercase();

    let decoded = match storage.as_str() {
        "INTEGER" | "BOOLEAN" => row.try_get_unchecked::<i64, _>(index).map(Value::Int),
        "REAL" => row.try_get_unchecked::<f64, _>(index).map(Value::Float),
        "BLOB" => row.try_get_unchecked::<Vec<u8>, _>(index).map(Value::Bytes),
        _ => row.try_get_unchecked::<String, _>(index).map(Value::Text),
    };

    decoded
        .or_else(|_| row.try_get_unchecked::<Vec<u8>, _>(index).map(Value::Bytes))
        .map_err(|e| DbError::Decode {
            column: column.to_string(),
            message: e.to_string(),
        })
}

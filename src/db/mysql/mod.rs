//! MySQL / MariaDB archive source.

use std::{str::FromStr, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use sqlx::{
    Column, MySqlPool, Row, TypeInfo, ValueRef,
    mysql::{MySql, MySqlArguments, MySqlConnectOptions, MySqlPoolOptions, MySqlRow},
    query::Query,
};
use tracing::{debug, instrument};

use super::{
    ArchiveSource, DeleteSummary,
    common::{Dialect, TableTarget, key_batches},
    error::{DbError, DbResult},
};
use crate::{
    archive::CutoffValue,
    config::MysqlConfig,
    records::{RecordSet, Value},
};

const DIALECT: Dialect = Dialect::Mysql;

pub struct MySqlArchiveSource {
    pool: MySqlPool,
    target: TableTarget,
}

impl MySqlArchiveSource {
    pub async fn connect(config: &MysqlConfig, target: TableTarget) -> DbResult<Self> {
        let options = MySqlConnectOptions::from_str(&config.url)?;
        let pool = MySqlPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect_with(options)
            .await?;
        Ok(Self::new(pool, target))
    }

    pub fn new(pool: MySqlPool, target: TableTarget) -> Self {
        Self { pool, target }
    }
}

#[async_trait]
impl ArchiveSource for MySqlArchiveSource {
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
        "mysql"
    }
}

type MySqlQuery<'q> = Query<'q, MySql, MySqlArguments>;

fn bind_cutoff<'q>(query: MySqlQuery<'q>, cutoff: &CutoffValue) -> MySqlQuery<'q> {
    match *cutoff {
        CutoffValue::EpochMillis(v) | CutoffValue::EpochSeconds(v) => query.bind(v),
        CutoffValue::DateTime(dt) => query.bind(dt),
    }
}

fn bind_key<'q>(query: MySqlQuery<'q>, value: &Value) -> MySqlQuery<'q> {
    match value {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(b) => query.bind(*b),
        Value::Int(i) => query.bind(*i),
        Value::UInt(u) => query.bind(*u),
        Value::Float(f) => query.bind(*f),
        Value::Decimal(d) => query.bind(*d),
        Value::Bytes(b) => query.bind(b.clone()),
        Value::Date(d) => query.bind(*d),
        Value::Time(t) => query.bind(*t),
        Value::DateTime(dt) => query.bind(*dt),
        Value::DateTimeUtc(dt) => query.bind(*dt),
        other => query.bind(other.to_string()),
    }
}

fn decode_rows(rows: &[MySqlRow]) -> DbResult<RecordSet> {
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

fn decode_column(row: &MySqlRow, index: usize, column: &str) -> DbResult<Value> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let type_name = raw.type_info().name().to_ascii_uppercase();

    let decoded = match type_name.as_str() {
        name if name.ends_with("UNSIGNED") => {
            row.try_get_unchecked::<u64, _>(index).map(Value::UInt)
        }
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
            row.try_get_unchecked::<i64, _>(index).map(Value::Int)
        }
        "BOOLEAN" => row.try_get_unchecked::<bool, _>(index).map(Value::Bool),
        "FLOAT" => row
            .try_get_unchecked::<f32, _>(index)
            .map(|f| Value::Float(f64::from(f))),
        "DOUBLE" => row.try_get_unchecked::<f64, _>(index).map(Value::Float),
        "DECIMAL" => row.try_get_unchecked::<Decimal, _>(index).map(Value::Decimal),
        "DATE" => row.try_get_unchecked::<NaiveDate, _>(index).map(Value::Date),
        "TIME" => row.try_get_unchecked::<NaiveTime, _>(index).map(Value::Time),
        "DATETIME" => row
            .try_get_unchecked::<NaiveDateTime, _>(index)
            .map(Value::DateTime),
        "TIMESTAMP" => row
            .try_get_unchecked::<DateTime<Utc>, _>(index)
            .map(Value::DateTimeUtc),
        "JSON" => row
            .try_get_unchecked::<serde_json::Value, _>(index)
            .map(Value::Json),
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BIT"
        | "GEOMETRY" => row.try_get_unchecked::<Vec<u8>, _>(index).map(Value::Bytes),
        _ => row.try_get_unchecked::<String, _>(index).map(Value::Text),
    };

    decoded
        .or_else(|_| row.try_get_unchecked::<String, _>(index).map(Value::Text))
        .or_else(|_| row.try_get_unchecked::<Vec<u8>, _>(index).map(Value::Bytes))
        .map_err(|e| DbError::Decode {
            column: column.to_string(),
            message: format!("{type_name}: {e}"),
        })
}

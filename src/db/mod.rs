//! Access to the source table.
//!
//! The archiver needs exactly two things from the datastore: the aged rows,
//! and a way to remove precisely those rows once they are safely stored.
//! Each backend implements [`ArchiveSource`] over a single-connection sqlx pool.

mod common;
mod error;
#[cfg(feature = "database-mysql")]
pub mod mysql;
#[cfg(feature = "database-postgres")]
pub mod postgres;
#[cfg(feature = "database-sqlite")]
pub mod sqlite;

#[cfg(all(test, feature = "database-sqlite"))]
pub mod tests;

use std::sync::Arc;

use async_trait::async_trait;
pub use common::{Dialect, TableTarget};
pub use error::{DbError, DbResult};

use crate::{archive::CutoffValue, config::DatabaseConfig, records::{RecordSet, Value}};

/// Result of removing archived rows.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeleteSummary {
    /// Rows removed from the source table.
    pub deleted: u64,
    /// Rows copied into the recovery table, if one is configured.
    pub copied: u64,
}

/// Source table operations used by the archive pipeline.
#[async_trait]
pub trait ArchiveSource: Send + Sync {
    /// Fetch every row whose timestamp column is strictly before `cutoff`,
    /// oldest first, up to `limit` rows.
    async fn fetch_before(&self, cutoff: &CutoffValue, limit: Option<u64>) -> DbResult<RecordSet>;

    /// Delete the rows with the given keys in one transaction, copying them
    /// into `recovery_table` first when set.
    async fn delete_archived(
        &self,
        ids: &[Value],
        recovery_table: Option<&str>,
        batch_size: u32,
    ) -> DbResult<DeleteSummary>;

    /// Round-trip a trivial query to confirm connectivity.
    async fn ping(&self) -> DbResult<()>;

    /// Close the underlying connection.
    async fn close(&self);

    /// Backend name for logging.
    fn backend_name(&self) -> &'static str;
}

/// Connect to the configured database.
pub async fn connect(
    config: &DatabaseConfig,
    target: TableTarget,
) -> DbResult<Arc<dyn ArchiveSource>> {
    match config {
        DatabaseConfig::None => {
            let _ = target;
            Err(DbError::NotConfigured)
        }
        #[cfg(feature = "database-sqlite")]
        DatabaseConfig::Sqlite(cfg) => Ok(Arc::new(
            sqlite::SqliteArchiveSource::connect(cfg, target).await?,
        )),
        #[cfg(feature = "database-mysql")]
        DatabaseConfig::Mysql(cfg) => Ok(Arc::new(
            mysql::MySqlArchiveSource::connect(cfg, target).await?,
        )),
        #[cfg(feature = "database-postgres")]
        DatabaseConfig::Postgres(cfg) => Ok(Arc::new(
            postgres::PostgresArchiveSource::connect(cfg, target).await?,
        )),
    }
}

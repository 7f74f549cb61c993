use std::{path::PathBuf, sync::Arc};

use chrono::{DateTime, Utc};

use super::{ArchiveError, ArchiveOutcome, ArchiveReport, Cutoff};
use crate::{
    config::{ArchiveConfig, StagingConfig},
    db::ArchiveSource,
    records::Value,
    staging::{StagedFile, stage_csv},
    storage::{
        ArchiveStore, META_ARCHIVE_DATE, META_CUTOFF, META_ROW_COUNT, META_SOURCE_TABLE,
        ObjectMetadata, StoredObject,
    },
};

/// Suffixes tried before a run gives up on finding a free archive key.
const MAX_KEY_SUFFIX: u32 = 999;

/// Runs the archive pipeline for one table.
pub struct Archiver {
    source: Arc<dyn ArchiveSource>,
    store: Arc<dyn ArchiveStore>,
    config: ArchiveConfig,
    staging: StagingConfig,
}

impl Archiver {
    pub fn new(
        source: Arc<dyn ArchiveSource>,
        store: Arc<dyn ArchiveStore>,
        config: ArchiveConfig,
        staging: StagingConfig,
    ) -> Self {
        Self {
            source,
            store,
            config,
            staging,
        }
    }

    /// Release the database connection.
    pub async fn close(&self) {
        self.source.close().await;
    }

    /// Archive file name for a run at `now`.
    pub fn file_name(&self, now: DateTime<Utc>) -> String {
        format!(
            "{}_{}.csv",
            self.config.file_prefix(),
            now.format(&self.config.file_timestamp_format)
        )
    }

    /// Execute one archive run.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<ArchiveOutcome, ArchiveError> {
        self.config.validate().map_err(ArchiveError::Config)?;

        let cutoff = Cutoff::from_config(now, &self.config);
        tracing::info!(
            table = %self.config.table,
            cutoff = %cutoff,
            bound = %cutoff.bound,
            retention_days = self.config.retention_days,
            dry_run = self.config.dry_run,
            "Starting archive run"
        );

        let records = self
            .source
            .fetch_before(&cutoff.bound, self.config.row_limit())
            .await?;

        if records.is_empty() {
            tracing::info!(table = %self.config.table, cutoff = %cutoff, "No rows to archive");
            return Ok(ArchiveOutcome::NothingToArchive { cutoff });
        }

        // Keys are extracted before anything is written so a bad id column
        // fails the run without side effects.
        let ids = records.ids(&self.config.id_column)?;
        tracing::info!(rows = records.len(), "Fetched rows to archive");

        let file_name = self.file_name(now);
        let staged = stage_csv(&records, &self.staging, &file_name)?;
        tracing::debug!(
            path = %staged.path.display(),
            rows = staged.rows,
            bytes = staged.bytes,
            "Staged archive file"
        );

        if self.config.dry_run {
            tracing::info!(
                table = %self.config.table,
                rows = staged.rows,
                file = %file_name,
                destination = %self.store.location(&self.store.object_key(&file_name)),
                "DRY RUN: Would upload archive and delete {} rows",
                staged.rows
            );
            let file = self.finish_staging(&staged);
            return Ok(ArchiveOutcome::DryRun {
                cutoff,
                rows: staged.rows,
                file,
            });
        }

        let result = self
            .externalize_and_delete(&cutoff, &staged, &file_name, &ids, now)
            .await;
        self.finish_staging(&staged);

        let report = result?;
        tracing::info!(
            table = %self.config.table,
            rows_exported = report.rows_exported,
            rows_deleted = report.rows_deleted,
            rows_copied_to_recovery = report.rows_copied_to_recovery,
            location = %report.location,
            bytes = report.bytes,
            "Archive run complete"
        );
        Ok(ArchiveOutcome::Archived(report))
    }

    async fn externalize_and_delete(
        &self,
        cutoff: &Cutoff,
        staged: &StagedFile,
        file_name: &str,
        ids: &[Value],
        now: DateTime<Utc>,
    ) -> Result<ArchiveReport, ArchiveError> {
        let key = self.unused_key(file_name).await?;
        let metadata = self.object_metadata(cutoff, staged.rows, now);

        tracing::info!(
            backend = self.store.backend_name(),
            destination = %self.store.location(&key),
            "Uploading archive"
        );
        let stored = self.store.upload(&key, &staged.path, &metadata).await?;

        if self.config.verify_upload {
            self.verify(&stored, &metadata).await?;
        }

        let summary = self
            .source
            .delete_archived(
                ids,
                self.config.recovery_table.as_deref(),
                self.config.delete_batch_size,
            )
            .await?;

        if summary.deleted != ids.len() as u64 {
            tracing::warn!(
                exported = ids.len(),
                deleted = summary.deleted,
                "Deleted row count differs from exported row count; rows may have been removed concurrently"
            );
        }

        Ok(ArchiveReport {
            cutoff: *cutoff,
            rows_exported: staged.rows,
            rows_deleted: summary.deleted,
            rows_copied_to_recovery: summary.copied,
            location: stored.location,
            object_key: stored.key,
            bytes: stored.bytes,
        })
    }

    /// First key for `file_name` that is not already in the store. Later runs
    /// on the same day get `_1`, `_2`, ... so no archive is ever replaced.
    async fn unused_key(&self, file_name: &str) -> Result<String, ArchiveError> {
        let stem = file_name.strip_suffix(".csv").unwrap_or(file_name);

        for n in 0..=MAX_KEY_SUFFIX {
            let candidate = match n {
                0 => file_name.to_string(),
                n => format!("{stem}_{n}.csv"),
            };
            let key = self.store.object_key(&candidate);
            if !self.store.exists(&key).await? {
                if n > 0 {
                    tracing::info!(key = %key, "Archive name already used today; using suffixed key");
                }
                return Ok(key);
            }
        }

        Err(ArchiveError::KeysExhausted {
            file_name: file_name.to_string(),
            attempts: MAX_KEY_SUFFIX + 1,
        })
    }

    fn object_metadata(&self, cutoff: &Cutoff, rows: usize, now: DateTime<Utc>) -> ObjectMetadata {
        ObjectMetadata::from([
            (
                META_ARCHIVE_DATE.to_string(),
                now.format("%Y-%m-%d").to_string(),
            ),
            (META_SOURCE_TABLE.to_string(), self.config.table.clone()),
            (META_ROW_COUNT.to_string(), rows.to_string()),
            (META_CUTOFF.to_string(), cutoff.to_string()),
        ])
    }

    /// Read back the uploaded object and compare its archive date.
    async fn verify(
        &self,
        stored: &StoredObject,
        expected: &ObjectMetadata,
    ) -> Result<(), ArchiveError> {
        let failed = |reason: &str| ArchiveError::Verification {
            key: stored.key.clone(),
            reason: reason.to_string(),
        };

        let actual = self
            .store
            .metadata(&stored.key)
            .await?
            .ok_or_else(|| failed("object not found after upload"))?;

        match actual.get(META_ARCHIVE_DATE) {
            None => Err(failed("object has no archive-date metadata")),
            Some(date) if Some(date) != expected.get(META_ARCHIVE_DATE) => {
                Err(failed(&format!("unexpected archive-date '{date}'")))
            }
            Some(_) => {
                tracing::debug!(key = %stored.key, "Upload verified");
                Ok(())
            }
        }
    }

    /// Remove the staging file unless configured to keep it. Returns the
    /// path of a kept file.
    fn finish_staging(&self, staged: &StagedFile) -> Option<PathBuf> {
        if self.staging.keep_local {
            tracing::info!(path = %staged.path.display(), "Keeping local archive file");
            return Some(staged.path.clone());
        }
        if let Err(e) = staged.cleanup() {
            tracing::warn!(path = %staged.path.display(), error = %e, "Failed to remove staging file");
        }
        None
    }

    /// Confirm the database answers and the staging directory accepts writes.
    pub async fn check(&self) -> Result<PathBuf, ArchiveError> {
        self.config.validate().map_err(ArchiveError::Config)?;
        self.source.ping().await?;

        let dir = self.staging.dir();
        let io_err = |source| ArchiveError::Io {
            path: dir.clone(),
            source,
        };
        std::fs::create_dir_all(&dir).map_err(io_err)?;
        let marker = dir.join(format!(".table-archiver-marker-{}", uuid::Uuid::new_v4()));
        std::fs::write(&marker, b"").map_err(io_err)?;
        std::fs::remove_file(&marker).map_err(io_err)?;

        Ok(dir)
    }
}

#[cfg(all(test, feature = "database-sqlite"))]
mod tests {
    use std::path::Path;

    use async_trait::async_trait;
    use chrono::TimeZone;
    use sqlx::SqlitePool;
    use tempfile::TempDir;

    use super::*;
    use crate::{
        config::{CutoffAlignment, FilesystemStorageConfig},
        db::{
            TableTarget,
            sqlite::SqliteArchiveSource,
            tests::harness::{
                SEED_ROWS, count_sqlite_rows, create_sqlite_pool, insert_sqlite_run, run_target,
                seed_sqlite,
            },
        },
        storage::{FilesystemArchiveStore, StorageError, StorageResult},
    };

    /// One day and five seconds after the epoch: with a one-day exact window
    /// the cutoff is 5_000 ms, so seed rows 1-3 are aged.
    fn now() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(86_400_000 + 5_000).unwrap()
    }

    fn archive_config() -> ArchiveConfig {
        let mut config = ArchiveConfig::new("run", "run_id", "msg_sent_date");
        config.retention_days = 1;
        config.cutoff_alignment = CutoffAlignment::Exact;
        config
    }

    struct Fixture {
        pool: SqlitePool,
        staging_dir: TempDir,
        archive_dir: TempDir,
    }

    impl Fixture {
        async fn new() -> Self {
            let pool = create_sqlite_pool().await;
            seed_sqlite(&pool).await;
            Self {
                pool,
                staging_dir: TempDir::new().unwrap(),
                archive_dir: TempDir::new().unwrap(),
            }
        }

        fn staging(&self) -> StagingConfig {
            StagingConfig {
                dir: Some(self.staging_dir.path().to_path_buf()),
                keep_local: false,
            }
        }

        fn store(&self) -> FilesystemArchiveStore {
            FilesystemArchiveStore::new(FilesystemStorageConfig {
                path: self.archive_dir.path().to_string_lossy().to_string(),
                key_prefix: Some("run_table_data_archives/".to_string()),
                create_dir: true,
                file_mode: 0o640,
                dir_mode: 0o750,
            })
            .unwrap()
        }

        fn archiver(&self, store: Arc<dyn ArchiveStore>, config: ArchiveConfig) -> Archiver {
            Archiver::new(
                Arc::new(SqliteArchiveSource::new(self.pool.clone(), run_target())),
                store,
                config,
                self.staging(),
            )
        }

        async fn rows_left(&self) -> i64 {
            count_sqlite_rows(&self.pool, "run").await
        }

        fn staging_is_empty(&self) -> bool {
            std::fs::read_dir(self.staging_dir.path())
                .unwrap()
                .next()
                .is_none()
        }
    }

    /// Store whose uploads always fail.
    struct FailingStore;

    #[async_trait]
    impl ArchiveStore for FailingStore {
        fn object_key(&self, file_name: &str) -> String {
            file_name.to_string()
        }

        async fn upload(
            &self,
            _key: &str,
            _path: &Path,
            _metadata: &ObjectMetadata,
        ) -> StorageResult<StoredObject> {
            Err(StorageError::S3("service unavailable".to_string()))
        }

        async fn metadata(&self, _key: &str) -> StorageResult<Option<ObjectMetadata>> {
            Ok(None)
        }

        fn location(&self, key: &str) -> String {
            format!("mem://{key}")
        }

        fn backend_name(&self) -> &'static str {
            "failing"
        }
    }

    /// Store that accepts uploads but reports `metadata` for every object.
    struct UnverifiableStore {
        metadata: Option<ObjectMetadata>,
    }

    #[async_trait]
    impl ArchiveStore for UnverifiableStore {
        fn object_key(&self, file_name: &str) -> String {
            file_name.to_string()
        }

        async fn upload(
            &self,
            key: &str,
            path: &Path,
            _metadata: &ObjectMetadata,
        ) -> StorageResult<StoredObject> {
            Ok(StoredObject {
                key: key.to_string(),
                location: self.location(key),
                bytes: std::fs::metadata(path)?.len(),
            })
        }

        async fn exists(&self, _key: &str) -> StorageResult<bool> {
            Ok(false)
        }

        async fn metadata(&self, _key: &str) -> StorageResult<Option<ObjectMetadata>> {
            Ok(self.metadata.clone())
        }

        fn location(&self, key: &str) -> String {
            format!("mem://{key}")
        }

        fn backend_name(&self) -> &'static str {
            "unverifiable"
        }
    }

    /// Store that inserts a freshly aged row while the upload is in flight.
    struct RacingStore {
        inner: FilesystemArchiveStore,
        pool: SqlitePool,
    }

    #[async_trait]
    impl ArchiveStore for RacingStore {
        fn object_key(&self, file_name: &str) -> String {
            self.inner.object_key(file_name)
        }

        async fn upload(
            &self,
            key: &str,
            path: &Path,
            metadata: &ObjectMetadata,
        ) -> StorageResult<StoredObject> {
            insert_sqlite_run(&self.pool, 6, 4_000, Some("late")).await;
            self.inner.upload(key, path, metadata).await
        }

        async fn metadata(&self, key: &str) -> StorageResult<Option<ObjectMetadata>> {
            self.inner.metadata(key).await
        }

        fn location(&self, key: &str) -> String {
            self.inner.location(key)
        }

        fn backend_name(&self) -> &'static str {
            "racing"
        }
    }

    #[tokio::test]
    async fn test_archives_then_deletes() {
        let fixture = Fixture::new().await;
        let archiver = fixture.archiver(Arc::new(fixture.store()), archive_config());

        let outcome = archiver.run(now()).await.unwrap();

        let ArchiveOutcome::Archived(report) = outcome else {
            panic!("expected Archived, got {outcome:?}");
        };
        assert_eq!(report.rows_exported, 3);
        assert_eq!(report.rows_deleted, 3);
        assert_eq!(report.rows_copied_to_recovery, 0);
        assert_eq!(
            report.object_key,
            "run_table_data_archives/run_archive_19700102.csv"
        );
        assert_eq!(report.cutoff.bound, crate::archive::CutoffValue::EpochMillis(5_000));

        let archived =
            std::fs::read_to_string(fixture.archive_dir.path().join(&report.object_key)).unwrap();
        assert_eq!(
            archived,
            "run_id,msg_sent_date,payload\n1,1000,first\n2,2000,\n3,3000,third\n"
        );
        assert_eq!(report.bytes, archived.len() as u64);

        assert_eq!(fixture.rows_left().await, (SEED_ROWS.len() - 3) as i64);
        assert!(fixture.staging_is_empty());
    }

    #[tokio::test]
    async fn test_archive_metadata() {
        let fixture = Fixture::new().await;
        let store = Arc::new(fixture.store());
        let archiver = fixture.archiver(store.clone(), archive_config());

        let ArchiveOutcome::Archived(report) = archiver.run(now()).await.unwrap() else {
            panic!("expected Archived");
        };

        let metadata = store.metadata(&report.object_key).await.unwrap().unwrap();
        assert_eq!(metadata[META_ARCHIVE_DATE], "1970-01-02");
        assert_eq!(metadata[META_SOURCE_TABLE], "run");
        assert_eq!(metadata[META_ROW_COUNT], "3");
        assert_eq!(metadata[META_CUTOFF], "1970-01-01T00:00:05Z");
    }

    #[tokio::test]
    async fn test_nothing_to_archive() {
        let fixture = Fixture::new().await;
        let mut config = archive_config();
        config.retention_days = 2;
        let archiver = fixture.archiver(Arc::new(fixture.store()), config);

        let outcome = archiver.run(now()).await.unwrap();

        assert!(matches!(outcome, ArchiveOutcome::NothingToArchive { .. }));
        assert_eq!(fixture.rows_left().await, SEED_ROWS.len() as i64);
        assert!(fixture.staging_is_empty());
        assert!(
            std::fs::read_dir(fixture.archive_dir.path())
                .unwrap()
                .next()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_upload_failure_deletes_nothing() {
        let fixture = Fixture::new().await;
        let archiver = fixture.archiver(Arc::new(FailingStore), archive_config());

        let result = archiver.run(now()).await;

        assert!(matches!(result, Err(ArchiveError::Storage(_))));
        assert_eq!(fixture.rows_left().await, SEED_ROWS.len() as i64);
        assert!(fixture.staging_is_empty());
    }

    #[tokio::test]
    async fn test_verification_missing_object_deletes_nothing() {
        let fixture = Fixture::new().await;
        let archiver = fixture.archiver(
            Arc::new(UnverifiableStore { metadata: None }),
            archive_config(),
        );

        let result = archiver.run(now()).await;

        assert!(matches!(result, Err(ArchiveError::Verification { .. })));
        assert_eq!(fixture.rows_left().await, SEED_ROWS.len() as i64);
        assert!(fixture.staging_is_empty());
    }

    #[tokio::test]
    async fn test_verification_missing_archive_date_deletes_nothing() {
        let fixture = Fixture::new().await;
        let archiver = fixture.archiver(
            Arc::new(UnverifiableStore {
                metadata: Some(ObjectMetadata::new()),
            }),
            archive_config(),
        );

        let result = archiver.run(now()).await;

        assert!(matches!(
            result,
            Err(ArchiveError::Verification { reason, .. }) if reason.contains("archive-date")
        ));
        assert_eq!(fixture.rows_left().await, SEED_ROWS.len() as i64);
    }

    #[tokio::test]
    async fn test_verification_disabled() {
        let fixture = Fixture::new().await;
        let mut config = archive_config();
        config.verify_upload = false;
        let archiver = fixture.archiver(Arc::new(UnverifiableStore { metadata: None }), config);

        let outcome = archiver.run(now()).await.unwrap();

        assert!(matches!(outcome, ArchiveOutcome::Archived(_)));
        assert_eq!(fixture.rows_left().await, (SEED_ROWS.len() - 3) as i64);
    }

    #[tokio::test]
    async fn test_dry_run_keeps_rows() {
        let fixture = Fixture::new().await;
        let mut config = archive_config();
        config.dry_run = true;
        let archiver = fixture.archiver(Arc::new(FailingStore), config);

        let outcome = archiver.run(now()).await.unwrap();

        assert!(matches!(
            outcome,
            ArchiveOutcome::DryRun { rows: 3, file: None, .. }
        ));
        assert_eq!(fixture.rows_left().await, SEED_ROWS.len() as i64);
        assert!(fixture.staging_is_empty());
    }

    #[tokio::test]
    async fn test_keep_local() {
        let fixture = Fixture::new().await;
        let mut staging = fixture.staging();
        staging.keep_local = true;
        let archiver = Archiver::new(
            Arc::new(SqliteArchiveSource::new(fixture.pool.clone(), run_target())),
            Arc::new(fixture.store()),
            archive_config(),
            staging,
        );

        archiver.run(now()).await.unwrap();

        assert!(
            fixture
                .staging_dir
                .path()
                .join("run_archive_19700102.csv")
                .exists()
        );
    }

    #[tokio::test]
    async fn test_recovery_table() {
        let fixture = Fixture::new().await;
        let mut config = archive_config();
        config.recovery_table = Some("run_archive".to_string());
        let archiver = fixture.archiver(Arc::new(fixture.store()), config);

        let ArchiveOutcome::Archived(report) = archiver.run(now()).await.unwrap() else {
            panic!("expected Archived");
        };

        assert_eq!(report.rows_copied_to_recovery, 3);
        assert_eq!(count_sqlite_rows(&fixture.pool, "run_archive").await, 3);
        assert_eq!(fixture.rows_left().await, 2);
    }

    #[tokio::test]
    async fn test_max_rows_archives_oldest() {
        let fixture = Fixture::new().await;
        let mut config = archive_config();
        config.max_rows = 2;
        let archiver = fixture.archiver(Arc::new(fixture.store()), config);

        let ArchiveOutcome::Archived(report) = archiver.run(now()).await.unwrap() else {
            panic!("expected Archived");
        };

        assert_eq!(report.rows_deleted, 2);
        let remaining: Vec<i64> = sqlx::query_scalar("SELECT run_id FROM run ORDER BY run_id")
            .fetch_all(&fixture.pool)
            .await
            .unwrap();
        assert_eq!(remaining, vec![3, 4, 5]);
    }

    /// Run ids found in every CSV under the archive directory.
    fn archived_ids(dir: &Path) -> Vec<i64> {
        let mut ids: Vec<i64> = std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "csv"))
            .flat_map(|path| {
                let mut reader = csv::Reader::from_path(path).unwrap();
                reader
                    .records()
                    .map(|record| record.unwrap()[0].parse::<i64>().unwrap())
                    .collect::<Vec<_>>()
            })
            .collect();
        ids.sort_unstable();
        ids
    }

    #[tokio::test]
    async fn test_same_day_runs_keep_every_archive() {
        let fixture = Fixture::new().await;
        let mut config = archive_config();
        config.max_rows = 2;
        let archiver = fixture.archiver(Arc::new(fixture.store()), config);

        let ArchiveOutcome::Archived(first) = archiver.run(now()).await.unwrap() else {
            panic!("expected Archived");
        };
        let later = now() + chrono::TimeDelta::hours(1);
        let ArchiveOutcome::Archived(second) = archiver.run(later).await.unwrap() else {
            panic!("expected Archived");
        };

        assert_eq!(
            first.object_key,
            "run_table_data_archives/run_archive_19700102.csv"
        );
        assert_eq!(
            second.object_key,
            "run_table_data_archives/run_archive_19700102_1.csv"
        );
        assert_eq!(first.rows_deleted + second.rows_deleted, 4);

        let remaining: Vec<i64> = sqlx::query_scalar("SELECT run_id FROM run ORDER BY run_id")
            .fetch_all(&fixture.pool)
            .await
            .unwrap();
        assert_eq!(remaining, vec![5]);
        assert_eq!(
            archived_ids(&fixture.archive_dir.path().join("run_table_data_archives")),
            vec![1, 2, 3, 4]
        );
    }

    #[tokio::test]
    async fn test_rows_aged_during_upload_survive() {
        let fixture = Fixture::new().await;
        let store = RacingStore {
            inner: fixture.store(),
            pool: fixture.pool.clone(),
        };
        let archiver = fixture.archiver(Arc::new(store), archive_config());

        let ArchiveOutcome::Archived(report) = archiver.run(now()).await.unwrap() else {
            panic!("expected Archived");
        };

        assert_eq!(report.rows_deleted, 3);
        let late: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM run WHERE run_id = 6")
            .fetch_one(&fixture.pool)
            .await
            .unwrap();
        assert_eq!(late, 1);
    }

    #[tokio::test]
    async fn test_missing_id_column_fails_before_upload() {
        let fixture = Fixture::new().await;
        let mut config = archive_config();
        config.id_column = "id".to_string();
        let archiver = fixture.archiver(Arc::new(fixture.store()), config);

        let result = archiver.run(now()).await;

        assert!(matches!(result, Err(ArchiveError::MissingIdColumn(c)) if c == "id"));
        assert_eq!(fixture.rows_left().await, SEED_ROWS.len() as i64);
        assert!(fixture.staging_is_empty());
    }

    #[tokio::test]
    async fn test_null_key_fails_before_upload() {
        let fixture = Fixture::new().await;
        sqlx::query(
            "CREATE TABLE loose_run (run_id INTEGER, msg_sent_date INTEGER NOT NULL, payload TEXT)",
        )
        .execute(&fixture.pool)
        .await
        .unwrap();
        sqlx::query("INSERT INTO loose_run VALUES (1, 1000, 'keyed'), (NULL, 2000, 'unkeyed')")
            .execute(&fixture.pool)
            .await
            .unwrap();

        let mut config = archive_config();
        config.table = "loose_run".to_string();
        let archiver = Archiver::new(
            Arc::new(SqliteArchiveSource::new(
                fixture.pool.clone(),
                TableTarget::from(&config),
            )),
            Arc::new(fixture.store()),
            config,
            fixture.staging(),
        );

        let result = archiver.run(now()).await;

        assert!(matches!(
            result,
            Err(ArchiveError::NullKey { ref column, row: 1 }) if column == "run_id"
        ));
        assert_eq!(count_sqlite_rows(&fixture.pool, "loose_run").await, 2);
        assert!(fixture.staging_is_empty());
        assert!(
            std::fs::read_dir(fixture.archive_dir.path())
                .unwrap()
                .next()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_oversized_retention_is_config_error() {
        let fixture = Fixture::new().await;
        let mut config = archive_config();
        config.retention_days = u32::MAX;
        let archiver = fixture.archiver(Arc::new(fixture.store()), config);

        let result = archiver.run(now()).await;

        assert!(matches!(result, Err(ArchiveError::Config(reason)) if reason.contains("retention_days")));
        assert_eq!(fixture.rows_left().await, SEED_ROWS.len() as i64);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let fixture = Fixture::new().await;
        let mut config = archive_config();
        config.table = "run; DROP TABLE run".to_string();
        let archiver = fixture.archiver(Arc::new(fixture.store()), config);

        let result = archiver.run(now()).await;

        assert!(matches!(result, Err(ArchiveError::Config(_))));
        assert_eq!(fixture.rows_left().await, SEED_ROWS.len() as i64);
    }

    #[tokio::test]
    async fn test_check() {
        let fixture = Fixture::new().await;
        let archiver = fixture.archiver(Arc::new(fixture.store()), archive_config());

        let dir = archiver.check().await.unwrap();

        assert_eq!(dir, fixture.staging_dir.path());
        assert!(fixture.staging_is_empty());
    }

    #[tokio::test]
    async fn test_file_name() {
        let config = ArchiveConfig::new("ops.run", "run_id", "msg_sent_date");
        let archiver = Archiver::new(
            Arc::new(SqliteArchiveSource::new(
                sqlx::SqlitePool::connect_lazy("sqlite::memory:").unwrap(),
                run_target(),
            )),
            Arc::new(FailingStore),
            config,
            StagingConfig::default(),
        );

        let now = Utc.with_ymd_and_hms(2024, 3, 15, 1, 2, 3).unwrap();
        assert_eq!(archiver.file_name(now), "ops_run_archive_20240315.csv");
    }
}

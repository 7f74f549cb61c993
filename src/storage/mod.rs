//! Durable storage for archive files.
//!
//! An archive is only as safe as the place it lands, so the pipeline talks to
//! storage through the [`ArchiveStore`] trait and never deletes source rows
//! until an upload (and, by default, a read-back of its metadata) succeeds.
//!
//! - **S3**: S3-compatible object storage (requires the `s3-storage` feature)
//! - **Filesystem**: a durable directory such as a mounted network volume
//!
//! The backend is configured via `[storage]`.

mod filesystem;
#[cfg(feature = "s3-storage")]
mod s3;

use std::{collections::HashMap, path::Path, sync::Arc};

use async_trait::async_trait;
pub use filesystem::FilesystemArchiveStore;
#[cfg(feature = "s3-storage")]
pub use s3::S3ArchiveStore;
use thiserror::Error;
use tracing::info;

use crate::config::{StorageBackend, StorageConfig};

/// User metadata attached to an uploaded archive.
pub type ObjectMetadata = HashMap<String, String>;

/// Metadata key recording the day the archive was produced.
pub const META_ARCHIVE_DATE: &str = "archive-date";
pub const META_SOURCE_TABLE: &str = "source-table";
pub const META_ROW_COUNT: &str = "row-count";
pub const META_CUTOFF: &str = "cutoff";

/// Content type of every archive file.
pub const CSV_CONTENT_TYPE: &str = "text/csv";

/// Errors that can occur during archive storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("S3 error: {0}")]
    S3(String),

    #[error("Invalid metadata sidecar: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// An archive that has been written to durable storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Key relative to the store root, including any configured prefix.
    pub key: String,
    /// Human-readable location (`s3://bucket/key` or an absolute path).
    pub location: String,
    pub bytes: u64,
}

/// Trait for durable archive storage backends.
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Map an archive file name to its key, applying the configured prefix.
    fn object_key(&self, file_name: &str) -> String;

    /// Upload the local file at `path` under `key` with the given metadata.
    async fn upload(
        &self,
        key: &str,
        path: &Path,
        metadata: &ObjectMetadata,
    ) -> StorageResult<StoredObject>;

    /// Check whether an object exists.
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.metadata(key).await?.is_some())
    }

    /// Read back the metadata of an object, or `None` if it does not exist.
    async fn metadata(&self, key: &str) -> StorageResult<Option<ObjectMetadata>>;

    /// Human-readable location of `key`.
    fn location(&self, key: &str) -> String;

    /// Get the backend type name (for logging/debugging).
    fn backend_name(&self) -> &'static str;
}

/// Create an archive store from configuration.
pub async fn create_archive_store(config: &StorageConfig) -> StorageResult<Arc<dyn ArchiveStore>> {
    match config.backend {
        StorageBackend::Filesystem => {
            let fs_config = config.filesystem.clone().ok_or_else(|| {
                StorageError::Config(
                    "Filesystem backend requires [storage.filesystem] config".to_string(),
                )
            })?;
            info!(path = %fs_config.path, "Using filesystem archive storage backend");
            Ok(Arc::new(FilesystemArchiveStore::new(fs_config)?))
        }
        #[cfg(feature = "s3-storage")]
        StorageBackend::S3 => {
            let s3_config = config.s3.clone().ok_or_else(|| {
                StorageError::Config("S3 backend requires [storage.s3] config".to_string())
            })?;
            info!(bucket = %s3_config.bucket, "Using S3 archive storage backend");
            Ok(Arc::new(S3ArchiveStore::new(s3_config).await))
        }
        #[cfg(not(feature = "s3-storage"))]
        StorageBackend::S3 => Err(StorageError::Config(
            "S3 archive storage backend requires the 's3-storage' feature. \
                Rebuild with: cargo build --features s3-storage"
                .to_string(),
        )),
    }
}

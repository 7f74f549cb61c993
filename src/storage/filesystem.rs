use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use super::{ArchiveStore, ObjectMetadata, StorageError, StorageResult, StoredObject};
use crate::config::FilesystemStorageConfig;

/// Directory archive store.
///
/// Archives are written as `{path}/{key}`. Metadata lives next to each archive in
/// a `{key}.meta.json` sidecar, written before the archive itself is renamed into
/// place so a visible archive always has its metadata.
pub struct FilesystemArchiveStore {
    config: FilesystemStorageConfig,
}

impl FilesystemArchiveStore {
    pub fn new(config: FilesystemStorageConfig) -> StorageResult<Self> {
        let store = Self { config };

        if store.config.create_dir {
            let path = Path::new(&store.config.path);
            if !path.exists() {
                info!(path = %store.config.path, "Creating archive directory");
                std::fs::create_dir_all(path)?;

                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    std::fs::set_permissions(
                        path,
                        std::fs::Permissions::from_mode(store.config.dir_mode),
                    )?;
                }
            }
        }

        Ok(store)
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.config.object_path(key)
    }

    fn sidecar_path(&self, key: &str) -> PathBuf {
        self.object_path(&format!("{key}.meta.json"))
    }

    async fn ensure_parent(&self, path: &Path) -> StorageResult<()> {
        let Some(parent) = path.parent() else {
            return Ok(());
        };
        if tokio::fs::metadata(parent).await.is_ok() {
            return Ok(());
        }

        tokio::fs::create_dir_all(parent).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(
                parent,
                std::fs::Permissions::from_mode(self.config.dir_mode),
            )
            .await?;
        }
        Ok(())
    }

    /// Write `content` beside `path`, fsync it, rename it into place, then
    /// fsync the directory so the rename itself is durable.
    async fn write_atomic(&self, path: &Path, content: WriteSource<'_>) -> StorageResult<u64> {
        let mut temp_name = path.as_os_str().to_owned();
        temp_name.push(".tmp");
        let temp_path = PathBuf::from(temp_name);

        let bytes = match content {
            WriteSource::File(source) => tokio::fs::copy(source, &temp_path).await?,
            WriteSource::Bytes(data) => {
                tokio::fs::write(&temp_path, data).await?;
                data.len() as u64
            }
        };

        tokio::fs::OpenOptions::new()
            .write(true)
            .open(&temp_path)
            .await?
            .sync_all()
            .await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(
                &temp_path,
                std::fs::Permissions::from_mode(self.config.file_mode),
            )
            .await?;
        }

        tokio::fs::rename(&temp_path, path).await?;
        if let Some(parent) = path.parent() {
            sync_dir(parent).await?;
        }
        Ok(bytes)
    }
}

async fn sync_dir(dir: &Path) -> StorageResult<()> {
    #[cfg(unix)]
    {
        tokio::fs::File::open(dir).await?.sync_all().await?;
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
    Ok(())
}

enum WriteSource<'a> {
    File(&'a Path),
    Bytes(&'a [u8]),
}

#[async_trait]
impl ArchiveStore for FilesystemArchiveStore {
    fn object_key(&self, file_name: &str) -> String {
        self.config.object_key(file_name)
    }

    #[instrument(skip(self, metadata), fields(path = %path.display()))]
    async fn upload(
        &self,
        key: &str,
        path: &Path,
        metadata: &ObjectMetadata,
    ) -> StorageResult<StoredObject> {
        let target = self.object_path(key);
        debug!(key, target = %target.display(), "Storing archive on filesystem");

        tokio::fs::metadata(path).await?;
        self.ensure_parent(&target).await?;

        let sorted: BTreeMap<&String, &String> = metadata.iter().collect();
        let sidecar = serde_json::to_vec_pretty(&sorted)?;
        self.write_atomic(&self.sidecar_path(key), WriteSource::Bytes(&sidecar))
            .await?;

        let bytes = self.write_atomic(&target, WriteSource::File(path)).await?;

        info!(key, path = %target.display(), bytes, "Archive stored on filesystem");
        Ok(StoredObject {
            key: key.to_string(),
            location: self.location(key),
            bytes,
        })
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(tokio::fs::metadata(self.object_path(key)).await.is_ok())
    }

    #[instrument(skip(self))]
    async fn metadata(&self, key: &str) -> StorageResult<Option<ObjectMetadata>> {
        if !self.exists(key).await? {
            return Ok(None);
        }

        match tokio::fs::read(self.sidecar_path(key)).await {
            Ok(content) => Ok(Some(serde_json::from_slice(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Some(ObjectMetadata::new())),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    fn location(&self, key: &str) -> String {
        self.object_path(key).to_string_lossy().to_string()
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }
}

use std::path::Path;

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use tracing::{debug, error, info, instrument};

use super::{
    ArchiveStore, CSV_CONTENT_TYPE, ObjectMetadata, StorageError, StorageResult, StoredObject,
};
use crate::config::{S3ServerSideEncryption, S3StorageConfig};

/// S3-compatible object storage backend.
///
/// Works with AWS S3 and S3-compatible services (MinIO, Cloudflare R2, ...).
/// Every call is a single attempt: the SDK's retry layer is disabled so a
/// failed upload surfaces immediately and the run ends without deleting.
pub struct S3ArchiveStore {
    config: S3StorageConfig,
    client: aws_sdk_s3::Client,
}

impl S3ArchiveStore {
    pub async fn new(config: S3StorageConfig) -> Self {
        info!(bucket = %config.bucket, "Initializing S3 archive storage");

        let mut sdk_config_builder = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .retry_config(aws_config::retry::RetryConfig::disabled());

        if let Some(region) = &config.region {
            sdk_config_builder = sdk_config_builder.region(aws_config::Region::new(region.clone()));
        }

        // Explicit keys win over the default credential chain
        if let (Some(access_key), Some(secret_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            let credentials = aws_credential_types::Credentials::new(
                access_key.clone(),
                secret_key.clone(),
                config.session_token.clone(),
                None,
                "table-archiver-config",
            );
            sdk_config_builder = sdk_config_builder.credentials_provider(credentials);
        }

        let sdk_config = sdk_config_builder.load().await;

        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&sdk_config);

        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = aws_sdk_s3::Client::from_conf(s3_config_builder.build());

        Self { config, client }
    }
}

#[async_trait]
impl ArchiveStore for S3ArchiveStore {
    fn object_key(&self, file_name: &str) -> String {
        self.config.object_key(file_name)
    }

    #[instrument(skip(self, metadata), fields(bucket = %self.config.bucket, path = %path.display()))]
    async fn upload(
        &self,
        key: &str,
        path: &Path,
        metadata: &ObjectMetadata,
    ) -> StorageResult<StoredObject> {
        let bytes = tokio::fs::metadata(path).await?.len();
        debug!(key, bytes, "Uploading archive to S3");

        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StorageError::S3(format!("Failed to read {}: {}", path.display(), e)))?;

        let mut request = self
            .client
            .put_object()
            .bucket(&self.config.bucket)
            .key(key)
            .content_type(CSV_CONTENT_TYPE)
            .set_metadata(Some(metadata.clone()))
            .body(body);

        if let Some(storage_class) = &self.config.storage_class {
            request = request.storage_class(storage_class.as_str().into());
        }

        if let Some(sse) = &self.config.server_side_encryption {
            match sse {
                S3ServerSideEncryption::Aes256 => {
                    request = request
                        .server_side_encryption(aws_sdk_s3::types::ServerSideEncryption::Aes256);
                }
                S3ServerSideEncryption::Kms { key_id } => {
                    request = request
                        .server_side_encryption(aws_sdk_s3::types::ServerSideEncryption::AwsKms)
                        .ssekms_key_id(key_id);
                }
            }
        }

        request.send().await.map_err(|e| {
            error!(error = %e, key, "Failed to upload archive to S3");
            StorageError::S3(e.to_string())
        })?;

        info!(key, bucket = %self.config.bucket, bytes, "Archive uploaded to S3");
        Ok(StoredObject {
            key: key.to_string(),
            location: self.location(key),
            bytes,
        })
    }

    #[instrument(skip(self), fields(bucket = %self.config.bucket))]
    async fn metadata(&self, key: &str) -> StorageResult<Option<ObjectMetadata>> {
        match self
            .client
            .head_object()
            .bucket(&self.config.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => Ok(Some(output.metadata().cloned().unwrap_or_default())),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(None),
            Err(e) => Err(StorageError::S3(e.to_string())),
        }
    }

    fn location(&self, key: &str) -> String {
        format!("s3://{}/{}", self.config.bucket, key)
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }
}

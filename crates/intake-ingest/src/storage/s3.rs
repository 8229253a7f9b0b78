//! S3 API backend, used for MinIO, AWS and Oracle Object Storage

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Credentials, Region},
    primitives::ByteStream,
    Client,
};
use std::path::Path;
use tracing::{debug, info, instrument};

use super::{calculate_sha256, object_key, ArtifactStore, StorageBackend, StorageConfig, UploadedArtifact};

#[derive(Clone)]
pub struct S3ArtifactStore {
    client: Client,
    bucket: String,
    backend: StorageBackend,
}

impl S3ArtifactStore {
    pub async fn new(config: StorageConfig) -> Result<Self> {
        debug!(backend = %config.backend, bucket = %config.bucket, "Initializing S3 storage");

        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared).force_path_style(config.path_style);

        if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
            builder = builder.credentials_provider(Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "intake-storage",
            ));
        }

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(builder.build());

        info!(backend = %config.backend, bucket = %config.bucket, "Storage client initialized");

        Ok(Self {
            client,
            bucket: config.bucket,
            backend: config.backend,
        })
    }
}

#[async_trait]
impl ArtifactStore for S3ArtifactStore {
    fn backend(&self) -> StorageBackend {
        self.backend
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn upload(&self, local_path: &Path, dest_prefix: &str) -> Result<UploadedArtifact> {
        let key = object_key(local_path, dest_prefix)?;
        let data = tokio::fs::read(local_path)
            .await
            .with_context(|| format!("Failed to read artifact {}", local_path.display()))?;
        let checksum = calculate_sha256(&data);
        let size = data.len() as i64;

        debug!("Uploading {} bytes to s3://{}/{}", size, self.bucket, key);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type("text/csv")
            .body(ByteStream::from(data))
            .send()
            .await
            .with_context(|| format!("Failed to upload to {} storage: {}", self.backend, key))?;

        info!("Successfully uploaded to s3://{}/{}", self.bucket, key);

        Ok(UploadedArtifact {
            key,
            checksum,
            size,
        })
    }
}

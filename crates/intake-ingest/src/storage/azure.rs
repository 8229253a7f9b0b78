//! Azure Blob Storage backend

use anyhow::{Context, Result};
use async_trait::async_trait;
use object_store::azure::MicrosoftAzureBuilder;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload, RetryConfig};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use super::{calculate_sha256, object_key, ArtifactStore, StorageBackend, StorageConfig, UploadedArtifact};

pub struct AzureArtifactStore {
    store: Arc<dyn ObjectStore>,
    container: String,
}

impl AzureArtifactStore {
    /// Account name and credentials come from the standard `AZURE_STORAGE_*` variables.
    pub fn new(config: &StorageConfig) -> Result<Self> {
        let store = MicrosoftAzureBuilder::from_env()
            .with_container_name(&config.bucket)
            .with_retry(RetryConfig::default())
            .build()
            .context("Failed to configure Azure storage")?;

        info!(container = %config.bucket, "Azure storage client initialized");

        Ok(Self {
            store: Arc::new(store),
            container: config.bucket.clone(),
        })
    }
}

#[async_trait]
impl ArtifactStore for AzureArtifactStore {
    fn backend(&self) -> StorageBackend {
        StorageBackend::Azure
    }

    #[instrument(skip(self), fields(container = %self.container))]
    async fn upload(&self, local_path: &Path, dest_prefix: &str) -> Result<UploadedArtifact> {
        let key = object_key(local_path, dest_prefix)?;
        let data = tokio::fs::read(local_path)
            .await
            .with_context(|| format!("Failed to read artifact {}", local_path.display()))?;
        let checksum = calculate_sha256(&data);
        let size = data.len() as i64;

        debug!("Uploading {} bytes to azure://{}/{}", size, self.container, key);

        self.store
            .put(&ObjectPath::from(key.as_str()), PutPayload::from(data))
            .await
            .with_context(|| format!("Failed to upload to azure storage: {}", key))?;

        info!("Successfully uploaded to azure://{}/{}", self.container, key);

        Ok(UploadedArtifact {
            key,
            checksum,
            size,
        })
    }
}

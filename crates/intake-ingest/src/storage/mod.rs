//! Object storage for dimension artifacts
//!
//! The backend is chosen once from configuration and hidden behind
//! [`ArtifactStore`]. MinIO (`local`), AWS and Oracle all speak the S3 API;
//! Azure goes through `object_store`.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

pub mod azure;
pub mod config;
pub mod s3;

pub use config::StorageConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Local,
    #[default]
    Aws,
    Azure,
    Oracle,
}

impl StorageBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageBackend::Local => "local",
            StorageBackend::Aws => "aws",
            StorageBackend::Azure => "azure",
            StorageBackend::Oracle => "oracle",
        }
    }

    /// Environment variable naming the bucket or container of this backend
    pub fn bucket_var(&self) -> &'static str {
        match self {
            StorageBackend::Local => "MINIO_BUCKET",
            StorageBackend::Aws => "AWS_BUCKET",
            StorageBackend::Azure => "AZURE_CONTAINER",
            StorageBackend::Oracle => "ORACLE_BUCKET",
        }
    }
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(StorageBackend::Local),
            "aws" => Ok(StorageBackend::Aws),
            "azure" => Ok(StorageBackend::Azure),
            "oracle" => Ok(StorageBackend::Oracle),
            other => Err(anyhow::anyhow!(
                "unknown storage type '{}', expected local, aws, azure or oracle",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedArtifact {
    pub key: String,
    pub checksum: String,
    pub size: i64,
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    fn backend(&self) -> StorageBackend;

    /// Upload the file at `local_path` under `dest_prefix`, keeping its file name.
    async fn upload(&self, local_path: &Path, dest_prefix: &str) -> Result<UploadedArtifact>;
}

/// Build the store selected by `config.backend`.
pub async fn build_artifact_store(config: StorageConfig) -> Result<Arc<dyn ArtifactStore>> {
    let store: Arc<dyn ArtifactStore> = match config.backend {
        StorageBackend::Azure => Arc::new(azure::AzureArtifactStore::new(&config)?),
        _ => Arc::new(s3::S3ArtifactStore::new(config).await?),
    };
    Ok(store)
}

/// Object key for `local_path` under `dest_prefix`.
pub fn object_key(local_path: &Path, dest_prefix: &str) -> Result<String> {
    let file_name = local_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow::anyhow!("artifact path has no file name: {}", local_path.display()))?;

    let prefix = dest_prefix.trim_start_matches('/');
    if prefix.is_empty() || prefix.ends_with('/') {
        Ok(format!("{}{}", prefix, file_name))
    } else {
        Ok(format!("{}/{}", prefix, file_name))
    }
}

pub(crate) fn calculate_sha256(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_object_key() {
        let path = PathBuf::from("./error-files/district_7_errors.csv");
        assert_eq!(
            object_key(&path, "ingestion_error/district/2024-03-01/").unwrap(),
            "ingestion_error/district/2024-03-01/district_7_errors.csv"
        );
        assert_eq!(
            object_key(&path, "/process_input/dimensions/2024-03-01").unwrap(),
            "process_input/dimensions/2024-03-01/district_7_errors.csv"
        );
        assert!(object_key(&PathBuf::from("/"), "x/").is_err());
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!("LOCAL".parse::<StorageBackend>().unwrap(), StorageBackend::Local);
        assert_eq!("oracle".parse::<StorageBackend>().unwrap(), StorageBackend::Oracle);
        assert!("gcs".parse::<StorageBackend>().is_err());
        assert_eq!(StorageBackend::Azure.bucket_var(), "AZURE_CONTAINER");
    }

    #[test]
    fn test_calculate_sha256() {
        let data = b"Hello, World!";
        assert_eq!(
            calculate_sha256(data),
            "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f"
        );
    }
}

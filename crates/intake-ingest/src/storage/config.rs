use serde::{Deserialize, Serialize};
use std::env;

use super::StorageBackend;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Bucket, or container for Azure
    pub bucket: String,
    pub endpoint: Option<String>,
    pub region: String,
    pub access_key: Option<String>,
    #[serde(skip_serializing)]
    pub secret_key: Option<String>,
    pub path_style: bool,
}

impl StorageConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Resolve the configuration of the backend named by `STORAGE_TYPE`.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let backend: StorageBackend = get("STORAGE_TYPE")
            .map(|v| v.parse::<StorageBackend>())
            .transpose()?
            .unwrap_or_default();

        let bucket_var = backend.bucket_var();
        let bucket = get(bucket_var)
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("{} must be set for {} storage", bucket_var, backend))?;

        let region = get("AWS_REGION").unwrap_or_else(|| "us-east-1".to_string());

        let config = match backend {
            StorageBackend::Local => Self {
                backend,
                bucket,
                endpoint: Some(
                    get("MINIO_ENDPOINT").unwrap_or_else(|| "http://localhost:9000".to_string()),
                ),
                region,
                access_key: get("MINIO_ACCESS_KEY").or_else(|| Some("minioadmin".to_string())),
                secret_key: get("MINIO_SECRET_KEY").or_else(|| Some("minioadmin".to_string())),
                path_style: true,
            },
            StorageBackend::Aws => Self {
                backend,
                bucket,
                endpoint: None,
                region,
                access_key: get("AWS_ACCESS_KEY_ID"),
                secret_key: get("AWS_SECRET_ACCESS_KEY"),
                path_style: false,
            },
            StorageBackend::Oracle => Self {
                backend,
                bucket,
                endpoint: Some(get("ORACLE_ENDPOINT").ok_or_else(|| {
                    anyhow::anyhow!("ORACLE_ENDPOINT must be set for oracle storage")
                })?),
                region: get("ORACLE_REGION").unwrap_or(region),
                access_key: get("ORACLE_ACCESS_KEY"),
                secret_key: get("ORACLE_SECRET_KEY"),
                path_style: true,
            },
            // Account and key are read by the Azure builder itself
            StorageBackend::Azure => Self {
                backend,
                bucket,
                endpoint: None,
                region,
                access_key: None,
                secret_key: None,
                path_style: false,
            },
        };

        Ok(config)
    }

    pub fn for_minio(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            backend: StorageBackend::Local,
            bucket: bucket.into(),
            endpoint: Some(endpoint.into()),
            region: "us-east-1".to_string(),
            access_key: Some("minioadmin".to_string()),
            secret_key: Some("minioadmin".to_string()),
            path_style: true,
        }
    }
}

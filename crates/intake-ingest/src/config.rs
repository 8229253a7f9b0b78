//! Pipeline configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::reader::CoercionRule;

/// Default downstream ingestion API base URL.
pub const DEFAULT_INGESTION_API_URL: &str = "http://localhost:3000";

/// Default number of records that fills a batch.
pub const DEFAULT_BATCH_LIMIT: usize = 1000;

/// Default downstream request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

pub const DEFAULT_ERROR_FILES_DIR: &str = "./error-files";

pub const DEFAULT_INPUT_FILES_DIR: &str = "./input-files";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub api: ApiConfig,
    pub batch_limit: usize,
    #[serde(skip)]
    pub coercion_rule: CoercionRule,
    pub artifacts: ArtifactDirs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactDirs {
    pub error_dir: PathBuf,
    pub input_dir: PathBuf,
}

impl IngestConfig {
    /// Load configuration from `.env`, the environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let coercion_rule = match get("COERCION_RULE") {
            Some(raw) => raw.parse::<CoercionRule>().map_err(|e| anyhow::anyhow!(e))?,
            None => CoercionRule::default(),
        };

        let config = IngestConfig {
            api: ApiConfig {
                base_url: get("INGESTION_API_URL")
                    .or_else(|| get("URL"))
                    .unwrap_or_else(|| DEFAULT_INGESTION_API_URL.to_string()),
                timeout_secs: get("REQUEST_TIMEOUT_SECS")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            },
            batch_limit: get("BATCH_LIMIT")
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_BATCH_LIMIT),
            coercion_rule,
            artifacts: ArtifactDirs {
                error_dir: get("ERROR_FILES_DIR")
                    .unwrap_or_else(|| DEFAULT_ERROR_FILES_DIR.to_string())
                    .into(),
                input_dir: get("INPUT_FILES_DIR")
                    .unwrap_or_else(|| DEFAULT_INPUT_FILES_DIR.to_string())
                    .into(),
            },
        };

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.batch_limit == 0 {
            anyhow::bail!("BATCH_LIMIT must be greater than 0");
        }

        if self.api.base_url.trim().is_empty() {
            anyhow::bail!("Ingestion API URL cannot be empty");
        }

        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://") {
            anyhow::bail!("Ingestion API URL must be http(s): {}", self.api.base_url);
        }

        if self.api.timeout_secs == 0 {
            anyhow::bail!("REQUEST_TIMEOUT_SECS must be greater than 0");
        }

        Ok(())
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                base_url: DEFAULT_INGESTION_API_URL.to_string(),
                timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            },
            batch_limit: DEFAULT_BATCH_LIMIT,
            coercion_rule: CoercionRule::default(),
            artifacts: ArtifactDirs {
                error_dir: DEFAULT_ERROR_FILES_DIR.into(),
                input_dir: DEFAULT_INPUT_FILES_DIR.into(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = IngestConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.batch_limit, 1000);
        assert_eq!(config.api.base_url, "http://localhost:3000");
        assert_eq!(config.api.timeout(), Duration::from_secs(60));
        assert_eq!(config.coercion_rule, CoercionRule::ExcludeIdentifiers);
        assert_eq!(config.artifacts.error_dir, PathBuf::from("./error-files"));
    }

    #[test]
    fn test_url_alias_and_overrides() {
        let config = IngestConfig::from_lookup(lookup(&[
            ("URL", "http://ingest:3001"),
            ("BATCH_LIMIT", "250"),
            ("COERCION_RULE", "all"),
        ]))
        .unwrap();
        assert_eq!(config.api.base_url, "http://ingest:3001");
        assert_eq!(config.batch_limit, 250);
        assert_eq!(config.coercion_rule, CoercionRule::All);

        let preferred = IngestConfig::from_lookup(lookup(&[
            ("URL", "http://old:1"),
            ("INGESTION_API_URL", "http://new:2"),
        ]))
        .unwrap();
        assert_eq!(preferred.api.base_url, "http://new:2");
    }

    #[test]
    fn test_validation() {
        assert!(IngestConfig::from_lookup(lookup(&[("BATCH_LIMIT", "0")])).is_err());
        assert!(IngestConfig::from_lookup(lookup(&[("URL", "ingest:3000")])).is_err());
        assert!(IngestConfig::from_lookup(lookup(&[("COERCION_RULE", "never")])).is_err());
    }
}

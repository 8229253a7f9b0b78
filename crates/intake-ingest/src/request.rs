//! Upload request validation
//!
//! A CSV import names its ingestion kind and target. Both are checked before
//! the uploaded file is opened or a tracker row is created, so a rejected
//! request has no side effects.

use intake_common::IngestionType;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Body accompanying a CSV upload.
///
/// Fields are optional so that a body missing a key still deserializes and
/// is rejected by [`CsvImportRequest::validate`] with a precise error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CsvImportRequest {
    pub ingestion_type: Option<String>,
    pub ingestion_name: Option<String>,
}

/// A request that passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRequest {
    pub ingestion_type: IngestionType,
    pub ingestion_name: String,
}

/// A file already received and placed on local disk by the upload layer.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub path: PathBuf,
    pub original_name: String,
    pub size_bytes: u64,
}

impl UploadedFile {
    /// Describe a file on disk, taking its name and size from the filesystem.
    pub fn from_path(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let size_bytes = std::fs::metadata(&path)?.len();
        let original_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            path,
            original_name,
            size_bytes,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("ingestion_type is required")]
    TypeRequired,
    #[error("ingestion_type must be one of event, dataset, dimension; got '{0}'")]
    TypeInvalid(String),
    #[error("ingestion_name is required")]
    NameRequired,
    #[error("ingestion_name cannot be empty")]
    NameEmpty,
}

impl CsvImportRequest {
    pub fn new(ingestion_type: impl Into<String>, ingestion_name: impl Into<String>) -> Self {
        Self {
            ingestion_type: Some(ingestion_type.into()),
            ingestion_name: Some(ingestion_name.into()),
        }
    }

    pub fn validate(&self) -> Result<ValidatedRequest, RequestError> {
        let raw_type = self
            .ingestion_type
            .as_deref()
            .ok_or(RequestError::TypeRequired)?;
        let ingestion_type = raw_type
            .parse::<IngestionType>()
            .map_err(|_| RequestError::TypeInvalid(raw_type.to_string()))?;

        let name = self
            .ingestion_name
            .as_deref()
            .ok_or(RequestError::NameRequired)?;
        if name.trim().is_empty() {
            return Err(RequestError::NameEmpty);
        }

        Ok(ValidatedRequest {
            ingestion_type,
            ingestion_name: name.to_string(),
        })
    }
}

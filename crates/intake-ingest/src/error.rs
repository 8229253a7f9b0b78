//! Error taxonomy for the ingestion pipeline

use thiserror::Error;

use crate::artifact::ArtifactError;
use crate::dispatch::DispatchFailure;
use crate::reader::ReadError;
use crate::request::RequestError;

pub type IngestResult<T> = std::result::Result<T, IngestError>;

#[derive(Error, Debug)]
pub enum IngestError {
    /// The upload request was malformed; nothing was read or persisted.
    #[error("Invalid ingestion request: {0}")]
    RequestSchema(#[from] RequestError),

    #[error("File tracker was not created: {0}")]
    TrackerCreation(String),

    #[error("Failed to read uploaded file: {0}")]
    StreamIo(#[from] ReadError),

    #[error("Dispatch of batch {batch} failed{}: {failure}", final_suffix(.is_final))]
    Dispatch {
        batch: u64,
        is_final: bool,
        failure: DispatchFailure,
    },

    #[error("Storage upload failed: {0}")]
    StorageUpload(String),

    #[error("Dimension name is missing")]
    DimensionNameMissing,

    #[error("No dimension found with name '{0}'")]
    DimensionNotFound(String),

    #[error("Dimension array is required and cannot be empty")]
    EmptyChunk,

    #[error("No grammar found for the given id {0}")]
    SchemaNotFound(i64),

    #[error("File tracker {0} does not exist")]
    TrackerNotFound(i64),

    #[error("Database error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Artifact error: {0}")]
    Artifact(#[from] ArtifactError),
}

fn final_suffix(is_final: &bool) -> &'static str {
    if *is_final {
        " (final batch)"
    } else {
        ""
    }
}

impl IngestError {
    /// Errors the caller caused, reported as a 400-style rejection.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            IngestError::RequestSchema(_)
                | IngestError::DimensionNameMissing
                | IngestError::DimensionNotFound(_)
                | IngestError::EmptyChunk
                | IngestError::SchemaNotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors() {
        assert!(IngestError::RequestSchema(RequestError::NameRequired).is_client_error());
        assert!(IngestError::EmptyChunk.is_client_error());
        assert!(!IngestError::TrackerCreation("0 rows".into()).is_client_error());
        assert!(!IngestError::StorageUpload("denied".into()).is_client_error());
    }

    #[test]
    fn test_dispatch_display_marks_final_batch() {
        let failure = DispatchFailure {
            status: Some(502),
            message: "bad gateway".to_string(),
            valid_record_count: 0,
            invalid_record_count: 0,
        };
        let err = IngestError::Dispatch {
            batch: 3,
            is_final: true,
            failure,
        };
        let text = err.to_string();
        assert!(text.contains("batch 3"));
        assert!(text.contains("final batch"));
        assert!(text.contains("bad gateway"));
    }
}

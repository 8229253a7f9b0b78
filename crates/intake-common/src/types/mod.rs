//! Domain types shared by the ingestion crates

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::IntakeError;

/// The kind of data carried by an upload.
///
/// The kind decides both the shape of the downstream request body and which
/// flow consumes the batches: `event` and `dataset` go to the downstream
/// ingestion API, `dimension` is validated in-process against its schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestionType {
    Event,
    Dataset,
    Dimension,
}

impl IngestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestionType::Event => "event",
            IngestionType::Dataset => "dataset",
            IngestionType::Dimension => "dimension",
        }
    }

    /// Key under which the ingestion name travels, e.g. `event_name`
    pub fn name_key(&self) -> String {
        format!("{}_name", self.as_str())
    }
}

impl FromStr for IngestionType {
    type Err = IntakeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "event" => Ok(IngestionType::Event),
            "dataset" => Ok(IngestionType::Dataset),
            "dimension" => Ok(IngestionType::Dimension),
            other => Err(IntakeError::InvalidIngestionType(other.to_string())),
        }
    }
}

impl std::fmt::Display for IngestionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a file tracker row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackerStatus {
    Tracked,
    Processing,
    Uploaded,
    Error,
}

impl TrackerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerStatus::Tracked => "Tracked",
            TrackerStatus::Processing => "Processing",
            TrackerStatus::Uploaded => "Uploaded",
            TrackerStatus::Error => "Error",
        }
    }

    /// Uploaded and Error are final; a tracker never leaves them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TrackerStatus::Uploaded | TrackerStatus::Error)
    }
}

impl FromStr for TrackerStatus {
    type Err = IntakeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Tracked" => Ok(TrackerStatus::Tracked),
            "Processing" => Ok(TrackerStatus::Processing),
            "Uploaded" => Ok(TrackerStatus::Uploaded),
            "Error" => Ok(TrackerStatus::Error),
            other => Err(IntakeError::InvalidStatus(other.to_string())),
        }
    }
}

impl std::fmt::Display for TrackerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_ingestion_type_parse() {
        assert_eq!("event".parse::<IngestionType>().unwrap(), IngestionType::Event);
        assert_eq!("dataset".parse::<IngestionType>().unwrap(), IngestionType::Dataset);
        assert_eq!("dimension".parse::<IngestionType>().unwrap(), IngestionType::Dimension);
        assert!("Event".parse::<IngestionType>().is_err());
        assert!("".parse::<IngestionType>().is_err());
    }

    #[test]
    fn test_parse_errors_carry_input() {
        assert!(matches!(
            "batch".parse::<IngestionType>(),
            Err(IntakeError::InvalidIngestionType(ref s)) if s == "batch"
        ));
        assert!(matches!(
            "Done".parse::<TrackerStatus>(),
            Err(IntakeError::InvalidStatus(ref s)) if s == "Done"
        ));
    }

    #[test]
    fn test_name_key() {
        assert_eq!(IngestionType::Event.name_key(), "event_name");
        assert_eq!(IngestionType::Dataset.name_key(), "dataset_name");
    }

    #[test]
    fn test_ingestion_type_serde() {
        let json = serde_json::to_string(&IngestionType::Dimension).unwrap();
        assert_eq!(json, "\"dimension\"");
    }

    #[test]
    fn test_tracker_status_terminal() {
        assert!(!TrackerStatus::Tracked.is_terminal());
        assert!(!TrackerStatus::Processing.is_terminal());
        assert!(TrackerStatus::Uploaded.is_terminal());
        assert!(TrackerStatus::Error.is_terminal());
    }

    #[test]
    fn test_tracker_status_round_trip_names() {
        for status in [
            TrackerStatus::Tracked,
            TrackerStatus::Processing,
            TrackerStatus::Uploaded,
            TrackerStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<TrackerStatus>().unwrap(), status);
        }
        assert!("done".parse::<TrackerStatus>().is_err());
    }
}

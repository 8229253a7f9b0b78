//! Error types shared across intake crates

use thiserror::Error;

/// Errors raised by the shared layer
#[derive(Error, Debug)]
pub enum IntakeError {
    #[error("Unknown ingestion type '{0}': expected one of event, dataset, dimension")]
    InvalidIngestionType(String),

    #[error("Unknown tracker status '{0}'")]
    InvalidStatus(String),
}

//! Intake Common Library
//!
//! Shared types, logging bootstrap, and error handling for the intake workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`IntakeError`] for shared-type parsing
//! - **Logging**: `tracing` subscriber setup driven by environment variables
//! - **Types**: ingestion kinds and file tracker statuses shared by every crate
//!
//! # Example
//!
//! ```no_run
//! use intake_common::types::IngestionType;
//!
//! let kind: IngestionType = "dataset".parse().unwrap();
//! assert_eq!(kind.as_str(), "dataset");
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::IntakeError;
pub use types::{IngestionType, TrackerStatus};

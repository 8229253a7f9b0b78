//! Intake Ingest Library
//!
//! Streams CSV uploads through bounded batches. Event and dataset files are
//! forwarded to the downstream ingestion API; dimension files are validated
//! against their schema and written to object storage as CSV artifacts.
//! Every file's progress lives on a durable tracker row.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use intake_ingest::{
//!     CsvImportRequest, HttpDispatcher, IngestionApiClient, IngestionPipeline,
//!     MemoryTrackerStore, UploadedFile,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pipeline = IngestionPipeline::new(Arc::new(MemoryTrackerStore::new()), 1000);
//!     let client = IngestionApiClient::new("http://localhost:3000", Duration::from_secs(60))?;
//!     let mut dispatcher = HttpDispatcher::new(client);
//!
//!     let request = CsvImportRequest::new("event", "student_attendance");
//!     let file = UploadedFile::from_path("./uploads/attendance.csv")?;
//!     let outcome = pipeline.run(&request, file, &mut dispatcher).await?;
//!     println!("{} rows in {} batches", outcome.rows_read, outcome.batches);
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod artifact;
pub mod batch;
pub mod config;
pub mod db;
pub mod dimension;
pub mod dispatch;
pub mod error;
pub mod partition;
pub mod pipeline;
pub mod preview;
pub mod reader;
pub mod request;
pub mod schema;
pub mod storage;
pub mod tracker;

pub use batch::{BatchAccumulator, BatchConsumer, BatchContext, BatchReport, IngestionBatch, RecordTotals};
pub use config::IngestConfig;
pub use dimension::{DimensionChunk, DimensionChunkReport, DimensionConsumer, DimensionIngestor};
pub use dispatch::{DispatchFailure, HttpDispatcher, IngestionApiClient};
pub use error::{IngestError, IngestResult};
pub use pipeline::{AcceptedUpload, IngestionPipeline, PipelineOutcome, PipelineState};
pub use preview::{AnnotatedRow, DimensionPreview};
pub use reader::{CoercionRule, NormalizedRecord, Normalizer, RowReader};
pub use request::{CsvImportRequest, UploadedFile};
pub use schema::{DimensionSchema, JsonSchemaValidator, SchemaCatalog, SchemaValidator};
pub use tracker::{FileTracker, MemoryTrackerStore, PgTrackerStore, TrackerStore};

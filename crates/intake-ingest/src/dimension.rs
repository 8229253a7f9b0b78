//! Dimension chunk flow
//!
//! A caller hands records over in chunks, all carrying the same tracker pid,
//! and marks the last one with `is_end`. Each chunk is validated, appended to
//! the local artifacts and counted on the tracker. The end of the file uploads
//! the artifacts and settles the tracker. Nothing here calls the downstream
//! API.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::artifact::ArtifactSink;
use crate::batch::{BatchConsumer, BatchContext, BatchReport, IngestionBatch};
use crate::error::{IngestError, IngestResult};
use crate::partition::partition;
use crate::reader::NormalizedRecord;
use crate::schema::{coerce_by_schema, DimensionSchema, SchemaCatalog, SchemaValidator};
use crate::storage::{ArtifactStore, UploadedArtifact};
use crate::tracker::{TerminalStatus, TrackerStore};

pub const DIMENSION_ADDED: &str = "Dimension added successfully";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DimensionChunk {
    pub dimension_name: String,
    #[serde(rename = "dimension")]
    pub records: Vec<NormalizedRecord>,
    pub file_tracker_pid: Option<i64>,
    #[serde(default, rename = "isEnd")]
    pub is_end: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionChunkReport {
    pub message: String,
    pub valid_count: u64,
    pub invalid_count: u64,
}

/// Storage prefix for rejected records of `dimension` uploaded on `date`.
pub fn error_prefix(dimension: &str, date: &str) -> String {
    format!("ingestion_error/{}/{}/", dimension, date)
}

/// Storage prefix for accepted dimension data uploaded on `date`.
pub fn valid_prefix(date: &str) -> String {
    format!("process_input/dimensions/{}/", date)
}

pub struct DimensionIngestor {
    catalog: Arc<dyn SchemaCatalog>,
    validator: Arc<dyn SchemaValidator>,
    tracker: Arc<dyn TrackerStore>,
    sink: ArtifactSink,
    store: Arc<dyn ArtifactStore>,
}

impl DimensionIngestor {
    pub fn new(
        catalog: Arc<dyn SchemaCatalog>,
        validator: Arc<dyn SchemaValidator>,
        tracker: Arc<dyn TrackerStore>,
        sink: ArtifactSink,
        store: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            catalog,
            validator,
            tracker,
            sink,
            store,
        }
    }

    /// Look up the schema of `name`.
    pub async fn resolve_schema(&self, name: &str) -> IngestResult<DimensionSchema> {
        if name.trim().is_empty() {
            return Err(IngestError::DimensionNameMissing);
        }
        self.catalog
            .dimension_by_name(name)
            .await?
            .ok_or_else(|| IngestError::DimensionNotFound(name.to_string()))
    }

    pub async fn ingest_chunk(&self, chunk: DimensionChunk) -> IngestResult<DimensionChunkReport> {
        let schema = self.resolve_schema(&chunk.dimension_name).await?;
        self.ingest_with_schema(&schema, chunk).await
    }

    /// [`ingest_chunk`](Self::ingest_chunk) with the schema already resolved.
    #[instrument(
        skip(self, schema, chunk),
        fields(dimension = %chunk.dimension_name, pid = ?chunk.file_tracker_pid, records = chunk.records.len())
    )]
    pub async fn ingest_with_schema(
        &self,
        schema: &DimensionSchema,
        chunk: DimensionChunk,
    ) -> IngestResult<DimensionChunkReport> {
        let DimensionChunk {
            dimension_name,
            records,
            file_tracker_pid,
            is_end,
        } = chunk;

        if records.is_empty() {
            return Err(IngestError::EmptyChunk);
        }

        let split = partition(schema, self.validator.as_ref(), records);
        let (valid_count, invalid_count) = (split.valid_count(), split.invalid_count());
        let paths = self.sink.paths(&dimension_name, file_tracker_pid);
        self.sink.append_records(&paths.errors, split.invalid).await?;
        self.sink.append_records(&paths.valid, split.valid).await?;

        if let Some(pid) = file_tracker_pid {
            self.tracker.add_counts(pid, valid_count, invalid_count).await?;
            self.tracker.increment_total_chunks(pid).await?;
        }

        debug!(
            valid = valid_count,
            invalid = invalid_count,
            is_end,
            "Dimension chunk partitioned"
        );

        if is_end {
            self.finalize(&dimension_name, file_tracker_pid).await?;
        }

        Ok(DimensionChunkReport {
            message: DIMENSION_ADDED.to_string(),
            valid_count,
            invalid_count,
        })
    }

    /// Upload every artifact of the file, then remove the local copies and
    /// mark the tracker Uploaded.
    ///
    /// On an upload failure the tracker moves to Error and the staged
    /// artifacts are discarded; the file has to be uploaded again.
    pub async fn finalize(
        &self,
        dimension: &str,
        pid: Option<i64>,
    ) -> IngestResult<Vec<UploadedArtifact>> {
        let paths = self.sink.paths(dimension, pid);
        let date = Utc::now().format("%Y-%m-%d").to_string();
        let mut pending: Vec<(PathBuf, String)> = Vec::with_capacity(2);
        for (path, prefix) in [
            (paths.errors.clone(), error_prefix(dimension, &date)),
            (paths.valid.clone(), valid_prefix(&date)),
        ] {
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                pending.push((path, prefix));
            }
        }

        let mut uploaded = Vec::with_capacity(pending.len());
        for (path, prefix) in &pending {
            match self.store.upload(path, prefix).await {
                Ok(artifact) => uploaded.push(artifact),
                Err(e) => {
                    let message = format!("{:#}", e);
                    self.discard(dimension, pid).await;
                    if let Some(pid) = pid {
                        self.tracker
                            .finish(pid, TerminalStatus::Error, Some(&message))
                            .await?;
                    }
                    return Err(IngestError::StorageUpload(message));
                },
            }
        }

        if let Err(e) = self.sink.remove_all(&paths).await {
            warn!(error = %e, "Failed to remove uploaded artifacts");
        }

        if let Some(pid) = pid {
            self.tracker.finish(pid, TerminalStatus::Uploaded, None).await?;
        }

        info!(
            dimension,
            pid = ?pid,
            backend = %self.store.backend(),
            artifacts = uploaded.len(),
            "Dimension artifacts uploaded"
        );
        Ok(uploaded)
    }

    /// Delete whatever was staged for `pid`. Failure is logged.
    pub async fn discard(&self, dimension: &str, pid: Option<i64>) {
        let paths = self.sink.paths(dimension, pid);
        match self.sink.remove_all(&paths).await {
            Ok(()) => debug!(dimension, pid = ?pid, "Discarded staged artifacts"),
            Err(e) => warn!(dimension, pid = ?pid, error = %e, "Failed to discard staged artifacts"),
        }
    }
}

/// Drives a [`DimensionIngestor`] from the file pipeline, one batch per chunk.
pub struct DimensionConsumer {
    ingestor: Arc<DimensionIngestor>,
    schema: Option<DimensionSchema>,
    finalized: bool,
}

impl DimensionConsumer {
    pub fn new(ingestor: Arc<DimensionIngestor>) -> Self {
        Self {
            ingestor,
            schema: None,
            finalized: false,
        }
    }

    async fn schema(&mut self, name: &str) -> IngestResult<&DimensionSchema> {
        if self.schema.is_none() {
            self.schema = Some(self.ingestor.resolve_schema(name).await?);
        }
        self.schema
            .as_ref()
            .ok_or_else(|| IngestError::DimensionNotFound(name.to_string()))
    }
}

#[async_trait]
impl BatchConsumer for DimensionConsumer {
    async fn consume(
        &mut self,
        ctx: &BatchContext,
        batch: IngestionBatch,
    ) -> IngestResult<BatchReport> {
        let is_end = batch.is_final;
        let schema = self.schema(&ctx.ingestion_name).await?.clone();

        // CSV cells only carry the generic coercion; align them with the schema
        let mut records = batch.records;
        for record in &mut records {
            coerce_by_schema(record, &schema);
        }

        let report = self
            .ingestor
            .ingest_with_schema(
                &schema,
                DimensionChunk {
                    dimension_name: ctx.ingestion_name.clone(),
                    records,
                    file_tracker_pid: Some(ctx.pid),
                    is_end,
                },
            )
            .await?;

        if is_end {
            self.finalized = true;
        }

        Ok(BatchReport {
            message: report.message,
            valid_record_count: report.valid_count,
            invalid_record_count: report.invalid_count,
        })
    }

    async fn complete(&mut self, ctx: &BatchContext) -> IngestResult<()> {
        if !self.finalized {
            self.ingestor
                .finalize(&ctx.ingestion_name, Some(ctx.pid))
                .await?;
            self.finalized = true;
        }
        Ok(())
    }

    async fn abort(&mut self, ctx: &BatchContext) -> IngestResult<()> {
        self.ingestor
            .discard(&ctx.ingestion_name, Some(ctx.pid))
            .await;
        Ok(())
    }

    fn persists_progress(&self) -> bool {
        true
    }
}

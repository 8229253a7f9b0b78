//! End-to-end driver for one uploaded file
//!
//! ```text
//! Idle -> Reading -> (BatchFull -> Paused -> Dispatching -> Resumed -> Reading)*
//!      -> EndOfStream -> Flushing -> Finalizing -> Done
//! ```
//!
//! `Error` is entered from `Reading` on a read fault, from `Dispatching` when a
//! non-final batch fails, and from `Flushing` or `Finalizing` when the last
//! batch or the consumer's completion fails. The reader is only polled while
//! no batch is in flight, so batches reach the consumer in file order and
//! nothing more than `batch_limit + 1` records is buffered.

use intake_common::TrackerStatus;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::batch::{BatchAccumulator, BatchConsumer, BatchContext, RecordTotals};
use crate::error::{IngestError, IngestResult};
use crate::reader::{Normalizer, RowReader};
use crate::request::{CsvImportRequest, UploadedFile, ValidatedRequest};
use crate::tracker::{NewFileTracker, TerminalStatus, TrackerStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    Idle,
    Reading,
    BatchFull,
    Paused,
    Dispatching,
    Resumed,
    EndOfStream,
    Flushing,
    Finalizing,
    Done,
    Error,
}

/// Current state of one run, logging every transition.
#[derive(Debug)]
struct StateLog {
    pid: i64,
    current: PipelineState,
}

impl StateLog {
    fn new(pid: i64) -> Self {
        Self {
            pid,
            current: PipelineState::Idle,
        }
    }

    fn to(&mut self, next: PipelineState) {
        debug!(pid = self.pid, from = ?self.current, to = ?next, "Pipeline state transition");
        self.current = next;
    }
}

/// An upload whose request passed validation and which has a tracker.
#[derive(Debug, Clone)]
pub struct AcceptedUpload {
    pub pid: i64,
    pub request: ValidatedRequest,
    pub file: UploadedFile,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    pub pid: i64,
    pub rows_read: u64,
    pub batches: u64,
    pub totals: RecordTotals,
    pub status: TrackerStatus,
    pub temp_file_removed: bool,
}

struct RunSummary {
    rows_read: u64,
    batches: u64,
    totals: RecordTotals,
}

struct RunFailure {
    error: IngestError,
    /// Counts to persist before the tracker moves to Error
    aggregate: Option<RecordTotals>,
}

impl RunFailure {
    fn abort(error: impl Into<IngestError>) -> Self {
        Self {
            error: error.into(),
            aggregate: None,
        }
    }
}

pub struct IngestionPipeline {
    tracker: Arc<dyn TrackerStore>,
    batch_limit: usize,
    normalizer: Normalizer,
}

impl IngestionPipeline {
    pub fn new(tracker: Arc<dyn TrackerStore>, batch_limit: usize) -> Self {
        Self {
            tracker,
            batch_limit,
            normalizer: Normalizer::default(),
        }
    }

    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn tracker(&self) -> &Arc<dyn TrackerStore> {
        &self.tracker
    }

    /// Validate the request and create the file's tracker.
    ///
    /// A rejected request leaves no trace: the file is not opened and no
    /// tracker exists. If the tracker cannot be created the file is removed.
    #[instrument(skip(self, request, file), fields(file = %file.original_name))]
    pub async fn accept(
        &self,
        request: &CsvImportRequest,
        file: UploadedFile,
    ) -> IngestResult<AcceptedUpload> {
        let request = request.validate()?;

        let created = self
            .tracker
            .create(NewFileTracker {
                file_name: file.original_name.clone(),
                ingestion_type: request.ingestion_type,
                ingestion_name: request.ingestion_name.clone(),
                size_bytes: file.size_bytes,
            })
            .await;

        match created {
            Ok(pid) => {
                info!(
                    pid,
                    ingestion_type = %request.ingestion_type,
                    ingestion_name = %request.ingestion_name,
                    size_bytes = file.size_bytes,
                    "Upload accepted"
                );
                Ok(AcceptedUpload { pid, request, file })
            },
            Err(e) => {
                remove_temp_file(&file.path).await;
                Err(match e {
                    IngestError::TrackerCreation(_) => e,
                    other => IngestError::TrackerCreation(other.to_string()),
                })
            },
        }
    }

    /// Stream the accepted file through `consumer` and settle its tracker.
    #[instrument(skip(self, upload, consumer), fields(pid = upload.pid))]
    pub async fn process<C>(
        &self,
        upload: AcceptedUpload,
        consumer: &mut C,
    ) -> IngestResult<PipelineOutcome>
    where
        C: BatchConsumer + ?Sized,
    {
        let AcceptedUpload { pid, request, file } = upload;
        let ctx = BatchContext {
            pid,
            ingestion_type: request.ingestion_type,
            ingestion_name: request.ingestion_name,
        };
        let mut state = StateLog::new(pid);

        let result = self.drive(&ctx, &file.path, consumer, &mut state).await;
        let persists_progress = consumer.persists_progress();

        match result {
            Ok(summary) => {
                if let Err(error) = self.settle_success(pid, &summary, persists_progress).await {
                    state.to(PipelineState::Error);
                    abort_consumer(consumer, &ctx).await;
                    self.settle_failure(pid, &error, None, persists_progress).await;
                    remove_temp_file(&file.path).await;
                    return Err(error);
                }
                let temp_file_removed = remove_temp_file(&file.path).await;
                state.to(PipelineState::Done);

                info!(
                    pid,
                    rows = summary.rows_read,
                    batches = summary.batches,
                    valid = summary.totals.valid,
                    invalid = summary.totals.invalid,
                    "File ingested"
                );

                Ok(PipelineOutcome {
                    pid,
                    rows_read: summary.rows_read,
                    batches: summary.batches,
                    totals: summary.totals,
                    status: TrackerStatus::Uploaded,
                    temp_file_removed,
                })
            },
            Err(failure) => {
                state.to(PipelineState::Error);
                abort_consumer(consumer, &ctx).await;
                self.settle_failure(pid, &failure.error, failure.aggregate, persists_progress)
                    .await;
                remove_temp_file(&file.path).await;
                Err(failure.error)
            },
        }
    }

    /// [`accept`](Self::accept) followed by [`process`](Self::process).
    pub async fn run<C>(
        &self,
        request: &CsvImportRequest,
        file: UploadedFile,
        consumer: &mut C,
    ) -> IngestResult<PipelineOutcome>
    where
        C: BatchConsumer + ?Sized,
    {
        let upload = self.accept(request, file).await?;
        self.process(upload, consumer).await
    }

    async fn drive<C>(
        &self,
        ctx: &BatchContext,
        path: &Path,
        consumer: &mut C,
        state: &mut StateLog,
    ) -> Result<RunSummary, RunFailure>
    where
        C: BatchConsumer + ?Sized,
    {
        self.tracker
            .mark_processing(ctx.pid)
            .await
            .map_err(RunFailure::abort)?;

        let mut reader = RowReader::open(path).await.map_err(RunFailure::abort)?;
        let headers = reader.headers().to_vec();
        let mut accumulator = BatchAccumulator::new(self.batch_limit);
        let mut totals = RecordTotals::default();
        let mut batches = 0u64;

        state.to(PipelineState::Reading);
        while let Some(row) = reader.next_row().await.map_err(RunFailure::abort)? {
            let record = self.normalizer.normalize(&headers, &row);
            let Some(batch) = accumulator.push(record) else {
                continue;
            };

            state.to(PipelineState::BatchFull);
            state.to(PipelineState::Paused);
            state.to(PipelineState::Dispatching);

            let report = consumer.consume(ctx, batch).await.map_err(RunFailure::abort)?;
            self.record_batch(ctx.pid, consumer.persists_progress())
                .await
                .map_err(RunFailure::abort)?;
            totals.add(report.valid_record_count, report.invalid_record_count);
            batches += 1;

            state.to(PipelineState::Resumed);
            state.to(PipelineState::Reading);
        }

        state.to(PipelineState::EndOfStream);
        state.to(PipelineState::Flushing);

        if let Some(batch) = accumulator.finish() {
            match consumer.consume(ctx, batch).await {
                Ok(report) => {
                    self.record_batch(ctx.pid, consumer.persists_progress())
                        .await
                        .map_err(RunFailure::abort)?;
                    totals.add(report.valid_record_count, report.invalid_record_count);
                    batches += 1;
                },
                Err(error) => {
                    let mut aggregate = totals;
                    if let IngestError::Dispatch { failure, .. } = &error {
                        aggregate.add(failure.valid_record_count, failure.invalid_record_count);
                    }
                    return Err(RunFailure {
                        error,
                        aggregate: Some(aggregate),
                    });
                },
            }
        }

        state.to(PipelineState::Finalizing);
        consumer.complete(ctx).await.map_err(RunFailure::abort)?;

        Ok(RunSummary {
            rows_read: reader.rows_read(),
            batches,
            totals,
        })
    }

    /// Count a consumed batch unless the consumer tracks chunks itself.
    async fn record_batch(&self, pid: i64, persists_progress: bool) -> IngestResult<()> {
        if !persists_progress {
            self.tracker.increment_total_chunks(pid).await?;
        }
        Ok(())
    }

    async fn settle_success(
        &self,
        pid: i64,
        summary: &RunSummary,
        persists_progress: bool,
    ) -> IngestResult<()> {
        if !persists_progress {
            self.tracker
                .add_counts(pid, summary.totals.valid, summary.totals.invalid)
                .await?;
        }
        if !self.tracker.finish(pid, TerminalStatus::Uploaded, None).await? {
            debug!(pid, "Tracker already terminal");
        }
        Ok(())
    }

    /// Best effort: the original error is what the caller sees.
    async fn settle_failure(
        &self,
        pid: i64,
        error: &IngestError,
        aggregate: Option<RecordTotals>,
        persists_progress: bool,
    ) {
        if let (Some(totals), false) = (aggregate, persists_progress) {
            if let Err(e) = self.tracker.add_counts(pid, totals.valid, totals.invalid).await {
                error!(pid, error = %e, "Failed to record counts of failed file");
            }
        }

        let message = error.to_string();
        match self
            .tracker
            .finish(pid, TerminalStatus::Error, Some(&message))
            .await
        {
            Ok(_) => warn!(pid, error = %message, "File ingestion failed"),
            Err(e) => error!(pid, error = %e, "Failed to mark tracker as errored"),
        }
    }
}

/// Let `consumer` drop what it staged for a failed run. Failure is logged.
async fn abort_consumer<C>(consumer: &mut C, ctx: &BatchContext)
where
    C: BatchConsumer + ?Sized,
{
    if let Err(e) = consumer.abort(ctx).await {
        warn!(pid = ctx.pid, error = %e, "Consumer cleanup after failure failed");
    }
}

/// Delete the uploaded temp file. Failure is logged and reported as `false`.
pub async fn remove_temp_file(path: &Path) -> bool {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            debug!(path = %path.display(), "Removed temp file");
            true
        },
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to remove temp file");
            false
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{BatchReport, IngestionBatch};
    use crate::dispatch::DispatchFailure;
    use crate::tracker::MemoryTrackerStore;
    use async_trait::async_trait;
    use std::io::Write;

    /// Accepts every batch and remembers their sizes.
    #[derive(Default)]
    struct Recording {
        sizes: Vec<(usize, bool)>,
        fail_on: Option<u64>,
    }

    #[async_trait]
    impl BatchConsumer for Recording {
        async fn consume(
            &mut self,
            _ctx: &BatchContext,
            batch: IngestionBatch,
        ) -> IngestResult<BatchReport> {
            if self.fail_on == Some(batch.sequence) {
                return Err(IngestError::Dispatch {
                    batch: batch.sequence,
                    is_final: batch.is_final,
                    failure: DispatchFailure {
                        status: Some(500),
                        message: "boom".into(),
                        valid_record_count: 0,
                        invalid_record_count: 1,
                    },
                });
            }
            self.sizes.push((batch.len(), batch.is_final));
            Ok(BatchReport {
                message: "ok".into(),
                valid_record_count: batch.len() as u64,
                invalid_record_count: 0,
            })
        }
    }

    fn csv_file(rows: usize) -> UploadedFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "school_id,students").unwrap();
        for n in 0..rows {
            writeln!(file, "{},{}", n, n * 2).unwrap();
        }
        let (_, path) = file.keep().unwrap();
        UploadedFile::from_path(path).unwrap()
    }

    #[tokio::test]
    async fn test_batches_flow_in_order_and_file_is_removed() {
        let tracker = Arc::new(MemoryTrackerStore::new());
        let pipeline = IngestionPipeline::new(tracker.clone(), 2);
        let file = csv_file(7);
        let path = file.path.clone();

        let mut consumer = Recording::default();
        let outcome = pipeline
            .run(&CsvImportRequest::new("event", "attendance"), file, &mut consumer)
            .await
            .unwrap();

        assert_eq!(consumer.sizes, [(3, false), (3, false), (1, true)]);
        assert_eq!(outcome.rows_read, 7);
        assert_eq!(outcome.batches, 3);
        assert!(outcome.temp_file_removed);
        assert!(!path.exists());

        let row = tracker.get(outcome.pid).await.unwrap().unwrap();
        assert_eq!(row.status, TrackerStatus::Uploaded);
        assert_eq!(row.valid_record_count, 7);
        assert_eq!(row.total_chunks, 3);
    }

    #[tokio::test]
    async fn test_final_batch_failure_aggregates_counts() {
        let tracker = Arc::new(MemoryTrackerStore::new());
        let pipeline = IngestionPipeline::new(tracker.clone(), 2);
        let file = csv_file(4);

        let mut consumer = Recording {
            fail_on: Some(2),
            ..Recording::default()
        };
        let upload = pipeline
            .accept(&CsvImportRequest::new("dataset", "enrolment"), file)
            .await
            .unwrap();
        let pid = upload.pid;
        let err = pipeline.process(upload, &mut consumer).await.unwrap_err();

        assert!(matches!(err, IngestError::Dispatch { is_final: true, .. }));
        let row = tracker.get(pid).await.unwrap().unwrap();
        assert_eq!(row.status, TrackerStatus::Error);
        assert_eq!(row.valid_record_count, 3);
        assert_eq!(row.error_data_count, 1);
        assert!(row.error_message.unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn test_empty_file_completes_without_batches() {
        let tracker = Arc::new(MemoryTrackerStore::new());
        let pipeline = IngestionPipeline::new(tracker.clone(), 10);
        let mut consumer = Recording::default();

        let outcome = pipeline
            .run(&CsvImportRequest::new("event", "attendance"), csv_file(0), &mut consumer)
            .await
            .unwrap();

        assert_eq!(outcome.batches, 0);
        assert!(consumer.sizes.is_empty());
        assert_eq!(outcome.status, TrackerStatus::Uploaded);
    }

    #[tokio::test]
    async fn test_ragged_row_fails_file() {
        let tracker = Arc::new(MemoryTrackerStore::new());
        let pipeline = IngestionPipeline::new(tracker.clone(), 10);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "a,b\n1,2\n3").unwrap();
        let (_, path) = file.keep().unwrap();
        let upload = UploadedFile::from_path(&path).unwrap();

        let err = pipeline
            .run(&CsvImportRequest::new("event", "x"), upload, &mut Recording::default())
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::StreamIo(_)));
        assert!(!path.exists());
        let row = tracker.get(1).await.unwrap().unwrap();
        assert_eq!(row.status, TrackerStatus::Error);
    }
}

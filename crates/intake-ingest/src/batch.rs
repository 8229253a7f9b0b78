//! Bounded batch accumulation and the consumer seam
//!
//! The accumulator hands out a batch as soon as its counter strictly exceeds
//! the limit, so a batch carries at most `limit + 1` records. The pipeline
//! awaits the consumer before pulling another row, which bounds the records
//! held in memory independently of file size.

use async_trait::async_trait;
use intake_common::IngestionType;
use serde::{Deserialize, Serialize};

use crate::error::IngestResult;
use crate::reader::NormalizedRecord;

/// An ordered group of records handed to a consumer exactly once.
#[derive(Debug)]
pub struct IngestionBatch {
    /// 1-based position of this batch within the file
    pub sequence: u64,
    pub records: Vec<NormalizedRecord>,
    /// Set on the end-of-stream flush
    pub is_final: bool,
}

impl IngestionBatch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug)]
pub struct BatchAccumulator {
    limit: usize,
    counter: usize,
    records: Vec<NormalizedRecord>,
    next_sequence: u64,
}

impl BatchAccumulator {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            counter: 0,
            records: Vec::with_capacity(limit.saturating_add(1).min(16_384)),
            next_sequence: 1,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Records appended since the last flush.
    pub fn pending(&self) -> usize {
        self.records.len()
    }

    /// Append a record. Returns the full batch once the counter passes the limit.
    pub fn push(&mut self, record: NormalizedRecord) -> Option<IngestionBatch> {
        self.records.push(record);
        self.counter += 1;

        if self.counter > self.limit {
            self.counter = 0;
            Some(self.take(false))
        } else {
            None
        }
    }

    /// Flush whatever remains at end of stream, marked final.
    pub fn finish(&mut self) -> Option<IngestionBatch> {
        self.counter = 0;
        if self.records.is_empty() {
            None
        } else {
            Some(self.take(true))
        }
    }

    fn take(&mut self, is_final: bool) -> IngestionBatch {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        IngestionBatch {
            sequence,
            records: std::mem::take(&mut self.records),
            is_final,
        }
    }
}

/// Per-batch counts reported by whoever consumed the batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub valid_record_count: u64,
    #[serde(default)]
    pub invalid_record_count: u64,
}

/// Summed valid/invalid counts across batches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordTotals {
    pub valid: u64,
    pub invalid: u64,
}

impl RecordTotals {
    pub fn add(&mut self, valid: u64, invalid: u64) {
        self.valid += valid;
        self.invalid += invalid;
    }

    pub fn processed(&self) -> u64 {
        self.valid + self.invalid
    }

    pub fn from_reports<'a>(reports: impl IntoIterator<Item = &'a BatchReport>) -> Self {
        let mut totals = Self::default();
        for report in reports {
            totals.add(report.valid_record_count, report.invalid_record_count);
        }
        totals
    }
}

/// What a consumer knows about the file a batch came from.
#[derive(Debug, Clone)]
pub struct BatchContext {
    pub pid: i64,
    pub ingestion_type: IngestionType,
    pub ingestion_name: String,
}

/// Receives every batch of a file, in order, one at a time.
#[async_trait]
pub trait BatchConsumer: Send {
    async fn consume(&mut self, ctx: &BatchContext, batch: IngestionBatch)
        -> IngestResult<BatchReport>;

    /// Called once after the last batch was consumed successfully.
    async fn complete(&mut self, _ctx: &BatchContext) -> IngestResult<()> {
        Ok(())
    }

    /// Called once when the run failed, before the tracker moves to Error.
    async fn abort(&mut self, _ctx: &BatchContext) -> IngestResult<()> {
        Ok(())
    }

    /// True when the consumer writes its own counts to the tracker.
    fn persists_progress(&self) -> bool {
        false
    }
}

//! Durable per-file progress tracking
//!
//! Counters only ever grow, and every increment happens inside the store
//! (`count = count + delta`). Chunks of the same file can therefore be
//! recorded from any number of callers without losing updates. The terminal
//! transition is guarded so a tracker reaches Uploaded or Error exactly once.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use intake_common::{IngestionType, TrackerStatus};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, instrument};

use crate::error::{IngestError, IngestResult};

/// Values known when an upload is accepted
#[derive(Debug, Clone)]
pub struct NewFileTracker {
    pub file_name: String,
    pub ingestion_type: IngestionType,
    pub ingestion_name: String,
    pub size_bytes: u64,
}

/// Lifecycle record of one upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileTracker {
    pub pid: i64,
    pub file_name: String,
    pub ingestion_type: IngestionType,
    pub ingestion_name: String,
    pub size_bytes: i64,
    pub status: TrackerStatus,
    /// Records accepted
    pub valid_record_count: i64,
    /// Records rejected
    pub error_data_count: i64,
    /// Records seen, accepted or not
    pub processed_data_count: i64,
    pub total_chunks: i64,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Where a tracker can end up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalStatus {
    Uploaded,
    Error,
}

impl From<TerminalStatus> for TrackerStatus {
    fn from(status: TerminalStatus) -> Self {
        match status {
            TerminalStatus::Uploaded => TrackerStatus::Uploaded,
            TerminalStatus::Error => TrackerStatus::Error,
        }
    }
}

#[async_trait]
pub trait TrackerStore: Send + Sync {
    /// Insert a tracker in status Tracked and return its pid.
    async fn create(&self, tracker: NewFileTracker) -> IngestResult<i64>;

    async fn mark_processing(&self, pid: i64) -> IngestResult<()>;

    /// Atomically add `valid`/`invalid` to the counters of `pid`.
    async fn add_counts(&self, pid: i64, valid: u64, invalid: u64) -> IngestResult<()>;

    async fn increment_total_chunks(&self, pid: i64) -> IngestResult<()>;

    /// Move `pid` to a terminal status unless it already has one.
    ///
    /// A message is appended to any earlier one. Returns whether the status
    /// changed.
    async fn finish(
        &self,
        pid: i64,
        status: TerminalStatus,
        message: Option<&str>,
    ) -> IngestResult<bool>;

    async fn get(&self, pid: i64) -> IngestResult<Option<FileTracker>>;
}

fn append_message(existing: Option<String>, message: Option<&str>) -> Option<String> {
    match (existing, message) {
        (Some(old), Some(new)) => Some(format!("{}; {}", old, new)),
        (None, Some(new)) => Some(new.to_string()),
        (old, None) => old,
    }
}

// ============================================================================
// Postgres
// ============================================================================

const TRACKER_COLUMNS: &str = "pid, file_name, ingestion_type, ingestion_name, file_size, status, \
     valid_record_count, error_data_count, processed_data_count, total_chunks, error_message, \
     created_at, updated_at";

#[derive(Clone)]
pub struct PgTrackerStore {
    pool: PgPool,
}

impl PgTrackerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn decode(row: &sqlx::postgres::PgRow) -> IngestResult<FileTracker> {
        let ingestion_type: String = row.try_get("ingestion_type")?;
        let status: String = row.try_get("status")?;
        let invalid = |e: intake_common::IntakeError| sqlx::Error::Decode(Box::new(e));

        Ok(FileTracker {
            pid: row.try_get("pid")?,
            file_name: row.try_get("file_name")?,
            ingestion_type: ingestion_type.parse().map_err(invalid)?,
            ingestion_name: row.try_get("ingestion_name")?,
            size_bytes: row.try_get("file_size")?,
            status: status.parse().map_err(invalid)?,
            valid_record_count: row.try_get("valid_record_count")?,
            error_data_count: row.try_get("error_data_count")?,
            processed_data_count: row.try_get("processed_data_count")?,
            total_chunks: row.try_get("total_chunks")?,
            error_message: row.try_get("error_message")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn ensure_updated(pid: i64, rows_affected: u64) -> IngestResult<()> {
        if rows_affected == 0 {
            return Err(IngestError::TrackerNotFound(pid));
        }
        Ok(())
    }
}

#[async_trait]
impl TrackerStore for PgTrackerStore {
    #[instrument(skip(self, tracker), fields(file = %tracker.file_name))]
    async fn create(&self, tracker: NewFileTracker) -> IngestResult<i64> {
        let rows = sqlx::query(
            r#"
            INSERT INTO file_tracker (file_name, ingestion_type, ingestion_name, file_size, status)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING pid
            "#,
        )
        .bind(&tracker.file_name)
        .bind(tracker.ingestion_type.as_str())
        .bind(&tracker.ingestion_name)
        .bind(i64::try_from(tracker.size_bytes).unwrap_or(i64::MAX))
        .bind(TrackerStatus::Tracked.as_str())
        .fetch_all(&self.pool)
        .await?;

        match rows.as_slice() {
            [row] => Ok(row.try_get("pid")?),
            other => Err(IngestError::TrackerCreation(format!(
                "expected exactly one row, got {}",
                other.len()
            ))),
        }
    }

    async fn mark_processing(&self, pid: i64) -> IngestResult<()> {
        let result = sqlx::query(
            "UPDATE file_tracker SET status = $2, updated_at = NOW() WHERE pid = $1 AND status = $3",
        )
        .bind(pid)
        .bind(TrackerStatus::Processing.as_str())
        .bind(TrackerStatus::Tracked.as_str())
        .execute(&self.pool)
        .await?;

        debug!(pid, changed = result.rows_affected(), "Tracker marked processing");
        Ok(())
    }

    async fn add_counts(&self, pid: i64, valid: u64, invalid: u64) -> IngestResult<()> {
        let valid = i64::try_from(valid).unwrap_or(i64::MAX);
        let invalid = i64::try_from(invalid).unwrap_or(i64::MAX);

        let result = sqlx::query(
            r#"
            UPDATE file_tracker
            SET valid_record_count = valid_record_count + $2,
                error_data_count = error_data_count + $3,
                processed_data_count = processed_data_count + $2 + $3,
                updated_at = NOW()
            WHERE pid = $1
            "#,
        )
        .bind(pid)
        .bind(valid)
        .bind(invalid)
        .execute(&self.pool)
        .await?;

        Self::ensure_updated(pid, result.rows_affected())
    }

    async fn increment_total_chunks(&self, pid: i64) -> IngestResult<()> {
        let result = sqlx::query(
            "UPDATE file_tracker SET total_chunks = total_chunks + 1, updated_at = NOW() WHERE pid = $1",
        )
        .bind(pid)
        .execute(&self.pool)
        .await?;

        Self::ensure_updated(pid, result.rows_affected())
    }

    async fn finish(
        &self,
        pid: i64,
        status: TerminalStatus,
        message: Option<&str>,
    ) -> IngestResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE file_tracker
            SET status = $2,
                error_message = CASE
                    WHEN $3::text IS NULL THEN error_message
                    WHEN error_message IS NULL THEN $3::text
                    ELSE error_message || '; ' || $3::text
                END,
                updated_at = NOW()
            WHERE pid = $1 AND status NOT IN ('Uploaded', 'Error')
            "#,
        )
        .bind(pid)
        .bind(TrackerStatus::from(status).as_str())
        .bind(message)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get(&self, pid: i64) -> IngestResult<Option<FileTracker>> {
        let row = sqlx::query(&format!("SELECT {} FROM file_tracker WHERE pid = $1", TRACKER_COLUMNS))
            .bind(pid)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::decode).transpose()
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Tracker store held in process memory.
///
/// Used for dry runs, where no database is configured, and in tests.
#[derive(Default)]
pub struct MemoryTrackerStore {
    inner: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    next_pid: i64,
    trackers: HashMap<i64, FileTracker>,
}

impl MemoryTrackerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_tracker<T>(
        &self,
        pid: i64,
        f: impl FnOnce(&mut FileTracker) -> T,
    ) -> IngestResult<T> {
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let tracker = state
            .trackers
            .get_mut(&pid)
            .ok_or(IngestError::TrackerNotFound(pid))?;
        let out = f(tracker);
        tracker.updated_at = Utc::now();
        Ok(out)
    }

    /// Number of trackers ever created
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TrackerStore for MemoryTrackerStore {
    async fn create(&self, tracker: NewFileTracker) -> IngestResult<i64> {
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        state.next_pid += 1;
        let pid = state.next_pid;
        let now = Utc::now();

        state.trackers.insert(
            pid,
            FileTracker {
                pid,
                file_name: tracker.file_name,
                ingestion_type: tracker.ingestion_type,
                ingestion_name: tracker.ingestion_name,
                size_bytes: i64::try_from(tracker.size_bytes).unwrap_or(i64::MAX),
                status: TrackerStatus::Tracked,
                valid_record_count: 0,
                error_data_count: 0,
                processed_data_count: 0,
                total_chunks: 0,
                error_message: None,
                created_at: now,
                updated_at: now,
            },
        );

        Ok(pid)
    }

    async fn mark_processing(&self, pid: i64) -> IngestResult<()> {
        self.with_tracker(pid, |t| {
            if t.status == TrackerStatus::Tracked {
                t.status = TrackerStatus::Processing;
            }
        })
    }

    async fn add_counts(&self, pid: i64, valid: u64, invalid: u64) -> IngestResult<()> {
        let valid = i64::try_from(valid).unwrap_or(i64::MAX);
        let invalid = i64::try_from(invalid).unwrap_or(i64::MAX);
        self.with_tracker(pid, |t| {
            t.valid_record_count += valid;
            t.error_data_count += invalid;
            t.processed_data_count += valid + invalid;
        })
    }

    async fn increment_total_chunks(&self, pid: i64) -> IngestResult<()> {
        self.with_tracker(pid, |t| t.total_chunks += 1)
    }

    async fn finish(
        &self,
        pid: i64,
        status: TerminalStatus,
        message: Option<&str>,
    ) -> IngestResult<bool> {
        self.with_tracker(pid, |t| {
            if t.status.is_terminal() {
                return false;
            }
            t.status = status.into();
            t.error_message = append_message(t.error_message.take(), message);
            true
        })
    }

    async fn get(&self, pid: i64) -> IngestResult<Option<FileTracker>> {
        let state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(state.trackers.get(&pid).cloned())
    }
}

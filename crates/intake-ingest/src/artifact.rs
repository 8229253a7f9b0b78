//! Local CSV artifacts of the dimension flow
//!
//! Chunks of one file are appended to the same two artifacts. The first
//! chunk decides the header; later chunks are written in that column order,
//! with absent columns left empty. Artifacts of a tracked file are staged
//! under its pid so two files of one dimension never share a local file.

use serde_json::Value;
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::partition::ERROR_DESCRIPTION;
use crate::reader::NormalizedRecord;

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("artifact I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("artifact CSV on {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("artifact writer task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ArtifactError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn csv(path: &Path, source: csv::Error) -> Self {
        Self::Csv {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Artifact locations for one dimension upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub errors: PathBuf,
    /// Named `<dimension>-dimension.data.csv`, inside a pid directory when tracked
    pub valid: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ArtifactSink {
    error_dir: PathBuf,
    input_dir: PathBuf,
}

impl ArtifactSink {
    pub fn new(error_dir: impl Into<PathBuf>, input_dir: impl Into<PathBuf>) -> Self {
        Self {
            error_dir: error_dir.into(),
            input_dir: input_dir.into(),
        }
    }

    pub fn paths(&self, dimension: &str, pid: Option<i64>) -> ArtifactPaths {
        let valid_name = format!("{}-dimension.data.csv", dimension);
        match pid {
            Some(pid) => ArtifactPaths {
                errors: self.error_dir.join(format!("{}_{}_errors.csv", dimension, pid)),
                valid: self.input_dir.join(pid.to_string()).join(valid_name),
            },
            None => ArtifactPaths {
                errors: self.error_dir.join(format!("{}_errors.csv", dimension)),
                valid: self.input_dir.join(valid_name),
            },
        }
    }

    /// Append `records` to the CSV at `path`, creating it with a header first.
    ///
    /// The write runs on the blocking pool. Returns the number of rows written.
    pub async fn append_records(
        &self,
        path: &Path,
        records: Vec<NormalizedRecord>,
    ) -> Result<usize, ArtifactError> {
        if records.is_empty() {
            return Ok(0);
        }
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || write_rows(&path, &records)).await?
    }

    /// Remove an artifact. A file that is already gone is not an error.
    pub async fn remove(&self, path: &Path) -> Result<(), ArtifactError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ArtifactError::io(path, e)),
        }
    }

    /// Remove both artifacts and the pid staging directory they lived in.
    pub async fn remove_all(&self, paths: &ArtifactPaths) -> Result<(), ArtifactError> {
        self.remove(&paths.errors).await?;
        self.remove(&paths.valid).await?;

        if let Some(dir) = paths.valid.parent().filter(|d| *d != self.input_dir.as_path()) {
            if let Err(e) = tokio::fs::remove_dir(dir).await {
                debug!(dir = %dir.display(), error = %e, "Staging directory left in place");
            }
        }
        Ok(())
    }
}

fn write_rows(path: &Path, records: &[NormalizedRecord]) -> Result<usize, ArtifactError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ArtifactError::io(parent, e))?;
    }

    let existing = existing_header(path)?;
    let is_new = existing.is_none();
    let header = existing.unwrap_or_else(|| header_for(records));

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| ArtifactError::io(path, e))?;
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);

    if is_new {
        writer
            .write_record(&header)
            .map_err(|e| ArtifactError::csv(path, e))?;
    }

    let mut dropped = 0usize;
    for record in records {
        dropped += record.keys().filter(|k| !header.contains(*k)).count();
        let row = header
            .iter()
            .map(|column| record.get(column).map(cell_value).unwrap_or_default());
        writer
            .write_record(row)
            .map_err(|e| ArtifactError::csv(path, e))?;
    }
    writer.flush().map_err(|e| ArtifactError::io(path, e))?;

    debug!(
        path = %path.display(),
        rows = records.len(),
        new_file = is_new,
        dropped_cells = dropped,
        "Appended artifact rows"
    );
    Ok(records.len())
}

fn existing_header(path: &Path) -> Result<Option<Vec<String>>, ArtifactError> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.len() > 0 => {},
        Ok(_) => return Ok(None),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(ArtifactError::io(path, e)),
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| ArtifactError::csv(path, e))?;
    let header = reader
        .headers()
        .map_err(|e| ArtifactError::csv(path, e))?
        .iter()
        .map(str::to_string)
        .collect();
    Ok(Some(header))
}

/// Union of the columns of `records` in first-seen order, `error_description` last.
fn header_for(records: &[NormalizedRecord]) -> Vec<String> {
    let mut header: Vec<String> = Vec::new();
    let mut has_description = false;
    for column in records.iter().flat_map(|r| r.keys()) {
        if column == ERROR_DESCRIPTION {
            has_description = true;
        } else if !header.contains(column) {
            header.push(column.clone());
        }
    }
    if has_description {
        header.push(ERROR_DESCRIPTION.to_string());
    }
    header
}

/// Text of one CSV cell
pub fn cell_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

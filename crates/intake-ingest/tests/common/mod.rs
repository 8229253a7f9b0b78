//! Shared helpers for intake-ingest integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use intake_ingest::storage::{object_key, ArtifactStore, StorageBackend, UploadedArtifact};
use intake_ingest::UploadedFile;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Write a CSV with `header` and `rows` into `dir` and describe it as an upload.
pub fn write_csv(dir: &Path, name: &str, header: &str, rows: &[String]) -> UploadedFile {
    let path = dir.join(name);
    let mut file = std::fs::File::create(&path).expect("create csv");
    writeln!(file, "{}", header).expect("write header");
    for row in rows {
        writeln!(file, "{}", row).expect("write row");
    }
    UploadedFile::from_path(path).expect("stat csv")
}

/// `n` rows of `school_id,students`
pub fn school_rows(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("{},{}", 1000 + i, i % 50)).collect()
}

/// One object the recording store received
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub key: String,
    pub local_path: PathBuf,
    pub contents: String,
}

/// Artifact store that keeps uploads in memory, optionally failing them all.
#[derive(Default)]
pub struct RecordingStore {
    pub objects: Mutex<Vec<StoredObject>>,
    pub fail: bool,
}

impl RecordingStore {
    pub fn failing() -> Self {
        Self {
            objects: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn objects(&self) -> Vec<StoredObject> {
        self.objects.lock().expect("lock").clone()
    }
}

#[async_trait]
impl ArtifactStore for RecordingStore {
    fn backend(&self) -> StorageBackend {
        StorageBackend::Local
    }

    async fn upload(&self, local_path: &Path, dest_prefix: &str) -> anyhow::Result<UploadedArtifact> {
        if self.fail {
            anyhow::bail!("bucket unavailable");
        }
        let key = object_key(local_path, dest_prefix)?;
        let contents = std::fs::read_to_string(local_path)?;
        let size = contents.len() as i64;
        self.objects.lock().expect("lock").push(StoredObject {
            key: key.clone(),
            local_path: local_path.to_path_buf(),
            contents,
        });
        Ok(UploadedArtifact {
            key,
            checksum: String::new(),
            size,
        })
    }
}

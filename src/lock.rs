//! Per-project exclusive lock around an ingestion run.
//!
//! Two runs on the same project would interleave manifest writes, so the
//! load → classify → persist window holds an advisory lock on
//! `output/.ingest.lock`. A second run blocks until the first finishes.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::time::Instant;

use crate::error::IngestError;

pub struct IngestLock {
    file: File,
}

impl Drop for IngestLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

impl IngestLock {
    pub fn acquire(path: &Path) -> Result<Self, IngestError> {
        let lock_err = |source| IngestError::Lock {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(lock_err)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(lock_err)?;

        let start = Instant::now();
        file.lock_exclusive().map_err(lock_err)?;
        tracing::debug!(
            path = %path.display(),
            wait_ms = start.elapsed().as_millis() as u64,
            "acquired ingest lock"
        );
        Ok(IngestLock { file })
    }
}

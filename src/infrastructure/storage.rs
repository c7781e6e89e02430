//! Reading stores
//!
//! [`JsonlReadingStore`] appends one JSON object per line to a file. A
//! failed append remembers where the file ended so `rollback` can cut the
//! partial line off again.

use crate::domain::storage::{ReadingStore, StorageError, StoredReading};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct PendingWrite {
    // File length before the failed append
    restore_len: Option<u64>,
}

/// Append-only JSON-lines store
#[derive(Debug)]
pub struct JsonlReadingStore {
    path: PathBuf,
    pending: Mutex<PendingWrite>,
}

impl JsonlReadingStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pending: Mutex::new(PendingWrite::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every stored row back
    pub fn load_all(&self) -> Result<Vec<StoredReading>, StorageError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(StorageError::from))
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, PendingWrite> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn append(&self, line: &[u8], start_len: &mut Option<u64>) -> Result<(), StorageError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        *start_len = Some(file.metadata()?.len());
        file.write_all(line)?;
        file.sync_data()?;
        Ok(())
    }
}

impl ReadingStore for JsonlReadingStore {
    fn save_reading(&self, reading: &StoredReading) -> Result<(), StorageError> {
        let mut line = serde_json::to_vec(reading)?;
        line.push(b'\n');

        // Serialize appends so a rollback never cuts another writer's row
        let mut pending = self.lock();
        let mut start_len = None;
        match self.append(&line, &mut start_len) {
            Ok(()) => {
                pending.restore_len = None;
                debug!("Stored reading in {}", self.path.display());
                Ok(())
            }
            Err(e) => {
                pending.restore_len = start_len;
                Err(e)
            }
        }
    }

    fn rollback(&self) -> Result<(), StorageError> {
        let mut pending = self.lock();
        let Some(len) = pending.restore_len.take() else {
            return Ok(());
        };

        let file = OpenOptions::new().write(true).open(&self.path)?;
        if file.metadata()?.len() > len {
            warn!("Truncating partial row in {}", self.path.display());
            file.set_len(len)?;
        }
        Ok(())
    }
}

/// In-memory store, handy for dry runs
#[derive(Debug, Default)]
pub struct MemoryReadingStore {
    rows: Mutex<Vec<StoredReading>>,
}

impl MemoryReadingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> Vec<StoredReading> {
        self.rows
            .lock()
            .map(|rows| rows.clone())
            .unwrap_or_default()
    }
}

impl ReadingStore for MemoryReadingStore {
    fn save_reading(&self, reading: &StoredReading) -> Result<(), StorageError> {
        self.rows
            .lock()
            .map_err(|_| StorageError::Unavailable("lock poisoned".to_string()))?
            .push(reading.clone());
        Ok(())
    }

    fn rollback(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

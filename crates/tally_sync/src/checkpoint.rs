//! Persisted sync state.

use crate::error::{SyncError, SyncResult};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tally_protocol::{RecordId, Timestamp};

/// Per-account sync progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCheckpoint {
    /// Highest `updatedAt` reconciled in both directions; the pull cursor.
    pub last_sync_version: Timestamp,
    /// Highest `updatedAt` the remote has confirmed receiving; the push cursor.
    pub push_watermark: Timestamp,
    /// Ids the remote refused, retried on every push until accepted.
    #[serde(default)]
    pub pending_rejects: Vec<RecordId>,
}

/// Durable home of the [`SyncCheckpoint`].
pub trait CheckpointStore: Send + Sync {
    /// Loads the checkpoint, or the default one if none was saved.
    fn load(&self) -> SyncResult<SyncCheckpoint>;

    /// Replaces the saved checkpoint.
    fn save(&self, checkpoint: &SyncCheckpoint) -> SyncResult<()>;
}

/// Checkpoint kept in memory.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    checkpoint: RwLock<SyncCheckpoint>,
}

impl MemoryCheckpointStore {
    /// Creates a store holding the default checkpoint.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding `checkpoint`.
    pub fn with_checkpoint(checkpoint: SyncCheckpoint) -> Self {
        Self {
            checkpoint: RwLock::new(checkpoint),
        }
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn load(&self) -> SyncResult<SyncCheckpoint> {
        Ok(self.checkpoint.read().clone())
    }

    fn save(&self, checkpoint: &SyncCheckpoint) -> SyncResult<()> {
        *self.checkpoint.write() = checkpoint.clone();
        Ok(())
    }
}

/// Checkpoint stored as a JSON file.
///
/// Saves write a sibling temporary file and rename it into place, so a crash
/// leaves either the old or the new checkpoint.
#[derive(Debug)]
pub struct FileCheckpointStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileCheckpointStore {
    /// Creates a store at `path`; the file is created on first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Returns the checkpoint path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self) -> SyncResult<SyncCheckpoint> {
        match fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                SyncError::Checkpoint(format!("{}: {}", self.path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SyncCheckpoint::default()),
            Err(e) => Err(SyncError::Checkpoint(format!("{}: {}", self.path.display(), e))),
        }
    }

    fn save(&self, checkpoint: &SyncCheckpoint) -> SyncResult<()> {
        let _guard = self.write_lock.lock();
        let tmp = self.path.with_extension("tmp");
        let write = || -> std::io::Result<()> {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            let bytes = serde_json::to_vec_pretty(checkpoint)?;
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            fs::rename(&tmp, &self.path)
        };
        write().map_err(|e| SyncError::Checkpoint(format!("{}: {}", self.path.display(), e)))
    }
}

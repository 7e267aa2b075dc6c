//! Append-only record of sync attempts.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tally_protocol::Timestamp;
use tracing::warn;

/// Which step of the pipeline an entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncDirection {
    /// Version probe.
    Probe,
    /// Pull and merge.
    Pull,
    /// Push.
    Push,
}

/// How a step ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncOutcome {
    /// Completed.
    Ok,
    /// Completed, but some records were skipped or rejected.
    Partial,
    /// Failed.
    Error,
}

/// One immutable log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncLogEntry {
    /// When the entry was written (epoch millis).
    pub timestamp: Timestamp,
    /// Pipeline step.
    pub direction: SyncDirection,
    /// Result of the step.
    pub outcome: SyncOutcome,
    /// Records involved.
    pub record_count: u64,
    /// Diagnostic detail: ids, versions, reasons.
    pub message: String,
}

impl SyncLogEntry {
    /// Creates an entry.
    pub fn new(
        timestamp: Timestamp,
        direction: SyncDirection,
        outcome: SyncOutcome,
        record_count: u64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            direction,
            outcome,
            record_count,
            message: message.into(),
        }
    }
}

/// Destination for sync log entries.
///
/// Appending never fails the sync; implementations report their own I/O
/// problems through `tracing`.
pub trait SyncLog: Send + Sync {
    /// Appends an entry.
    fn append(&self, entry: &SyncLogEntry);

    /// Returns up to `limit` most recent entries, oldest first.
    fn recent(&self, limit: usize) -> Vec<SyncLogEntry>;
}

/// In-memory log keeping the newest `capacity` entries.
#[derive(Debug)]
pub struct MemorySyncLog {
    entries: RwLock<VecDeque<SyncLogEntry>>,
    capacity: usize,
}

impl MemorySyncLog {
    /// Default number of entries kept.
    pub const DEFAULT_CAPACITY: usize = 500;

    /// Creates a log keeping at most `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    /// Returns every entry held, oldest first.
    pub fn entries(&self) -> Vec<SyncLogEntry> {
        self.entries.read().iter().cloned().collect()
    }
}

impl Default for MemorySyncLog {
    fn default() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }
}

impl SyncLog for MemorySyncLog {
    fn append(&self, entry: &SyncLogEntry) {
        let mut entries = self.entries.write();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry.clone());
    }

    fn recent(&self, limit: usize) -> Vec<SyncLogEntry> {
        let entries = self.entries.read();
        let skip = entries.len().saturating_sub(limit);
        entries.iter().skip(skip).cloned().collect()
    }
}

/// JSON-lines log file. Rotation is left to the host.
#[derive(Debug)]
pub struct JsonlSyncLog {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl JsonlSyncLog {
    /// Creates a log appending to `path`; the file is opened lazily.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: Mutex::new(None),
        }
    }

    /// Returns the log path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads every entry in the file, skipping unreadable lines.
    pub fn read_all(&self) -> std::io::Result<Vec<SyncLogEntry>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            match serde_json::from_str(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(path = %self.path.display(), error = %e, "skipping unreadable log line"),
            }
        }
        Ok(entries)
    }

    fn write_line(&self, entry: &SyncLogEntry) -> std::io::Result<()> {
        let mut file = self.file.lock();
        if file.is_none() {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            *file = Some(OpenOptions::new().create(true).append(true).open(&self.path)?);
        }
        if let Some(file) = file.as_mut() {
            let mut line = serde_json::to_vec(entry)?;
            line.push(b'\n');
            file.write_all(&line)?;
        }
        Ok(())
    }
}

impl SyncLog for JsonlSyncLog {
    fn append(&self, entry: &SyncLogEntry) {
        if let Err(e) = self.write_line(entry) {
            warn!(path = %self.path.display(), error = %e, "failed to append sync log entry");
        }
    }

    fn recent(&self, limit: usize) -> Vec<SyncLogEntry> {
        match self.read_all() {
            Ok(mut entries) => {
                let skip = entries.len().saturating_sub(limit);
                entries.drain(..skip);
                entries
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read sync log");
                Vec::new()
            }
        }
    }
}

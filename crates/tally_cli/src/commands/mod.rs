//! CLI command implementations.

pub mod compact;
pub mod inspect;
pub mod log;
pub mod status;
pub mod sync;
pub mod watch;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tally_protocol::LedgerRecord;
use tally_store::{FileStore, RecordStore};
use tally_sync::{
    FileCheckpointStore, HttpRemote, JsonlSyncLog, RemoteEndpoint, ReqwestClient, SyncConfig,
    SyncEngine,
};

/// Result type shared by the commands.
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Engine over the local data directory and the configured HTTP remote.
pub type LocalEngine =
    SyncEngine<FileStore<LedgerRecord>, HttpRemote<ReqwestClient, LedgerRecord>>;

/// Layout of the `--data` directory.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Wraps `root`; nothing is created until a store is opened.
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Returns the directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Record snapshot and change log.
    pub fn records_path(&self) -> PathBuf {
        self.root.join("records.jsonl")
    }

    /// Persisted sync checkpoint.
    pub fn checkpoint_path(&self) -> PathBuf {
        self.root.join("checkpoint.json")
    }

    /// JSON-lines sync log.
    pub fn log_path(&self) -> PathBuf {
        self.root.join("sync-log.jsonl")
    }

    /// Opens the local record store, creating the directory if needed.
    pub fn open_store(&self) -> CliResult<Arc<FileStore<LedgerRecord>>> {
        Ok(Arc::new(FileStore::open_with_create_dirs(
            &self.records_path(),
        )?))
    }

    /// Points an engine's checkpoint and log at this directory.
    pub fn attach<S, E>(&self, engine: SyncEngine<S, E>) -> SyncEngine<S, E>
    where
        S: RecordStore,
        E: RemoteEndpoint<Record = S::Record>,
    {
        engine
            .with_checkpoint_store(Arc::new(FileCheckpointStore::new(self.checkpoint_path())))
            .with_log(Arc::new(JsonlSyncLog::new(self.log_path())))
    }

    /// Opens the engine the commands run against.
    pub fn open_engine(&self, config: SyncConfig) -> CliResult<LocalEngine> {
        let store = self.open_store()?;
        let remote = HttpRemote::from_config(&config)?;
        Ok(self.attach(SyncEngine::new(config, store, remote)))
    }
}

/// Reads the sync configuration, or the defaults when no path is given.
pub fn load_config(path: Option<&Path>) -> CliResult<SyncConfig> {
    let Some(path) = path else {
        return Ok(SyncConfig::default());
    };
    let json = fs::read_to_string(path)
        .map_err(|e| format!("cannot read config {}: {e}", path.display()))?;
    let config = SyncConfig::from_json(&json)
        .map_err(|e| format!("invalid config {}: {e}", path.display()))?;
    if config.endpoint_url.is_empty() {
        return Err(format!("config {} has no endpointUrl", path.display()).into());
    }
    Ok(config)
}

/// Formats epoch milliseconds as `seconds.millis` for text output.
pub fn format_millis(millis: i64) -> String {
    if millis <= 0 {
        return "never".to_string();
    }
    format!("{}.{:03}", millis / 1000, millis % 1000)
}

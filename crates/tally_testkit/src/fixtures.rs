//! Test fixtures: an in-process cloud and simulated devices.
//!
//! Devices talk to the cloud over the real HTTP remote, with a loopback
//! client standing in for the network, so every request is encoded, routed
//! and decoded exactly as in production.

use std::path::PathBuf;
use std::sync::Arc;
use tally_protocol::{LedgerRecord, RecordId, SyncableRecord, Timestamp, Transaction};
use tally_server::{ServerConfig, SyncServer};
use tally_store::{FileStore, LocalWriter, ManualClock, MemoryStore, RecordStore};
use tally_sync::{
    Credentials, HttpRemote, HttpResponse, LoopbackClient, LoopbackServer, SyncAttempt,
    SyncConfig, SyncCycleResult, SyncEngine, SyncResult, SyncTrigger,
};
use tempfile::TempDir;

/// Base URL devices are configured with.
pub const LOOPBACK_URL: &str = "loopback://tally";

/// Adapts a [`SyncServer`] to the loopback transport.
#[derive(Debug, Clone)]
pub struct ServerLink(pub Arc<SyncServer<LedgerRecord>>);

impl LoopbackServer for ServerLink {
    fn handle_post(&self, path: &str, body: &[u8], bearer: Option<&str>) -> HttpResponse {
        let response = self.0.handle_post(path, body, bearer);
        HttpResponse::new(response.status, response.body)
    }
}

/// The remote a simulated device syncs through.
pub type DeviceRemote = HttpRemote<LoopbackClient<ServerLink>, LedgerRecord>;

/// The engine a simulated device runs.
pub type DeviceEngine = SyncEngine<MemoryStore<LedgerRecord>, DeviceRemote>;

/// An in-process sync server that devices connect to.
#[derive(Debug, Clone)]
pub struct Cloud {
    server: Arc<SyncServer<LedgerRecord>>,
    account: String,
}

impl Cloud {
    /// Opens a cloud without authentication.
    pub fn open() -> Self {
        Self {
            server: Arc::new(SyncServer::new(ServerConfig::default())),
            account: ServerConfig::DEFAULT_ACCOUNT.to_string(),
        }
    }

    /// Opens a cloud that requires tokens signed with `secret`.
    ///
    /// Devices created with [`Cloud::device`] get a valid token for `account`.
    pub fn with_auth(secret: &[u8], account: &str) -> Self {
        Self {
            server: Arc::new(SyncServer::new(ServerConfig::new().with_auth(secret.to_vec()))),
            account: account.to_string(),
        }
    }

    /// Returns the server.
    pub fn server(&self) -> &Arc<SyncServer<LedgerRecord>> {
        &self.server
    }

    /// Returns the account devices sync into.
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Issues credentials for this cloud's account.
    ///
    /// Open clouds accept anything, so a placeholder token is returned.
    pub fn credentials(&self) -> Credentials {
        match self.server.issue_token(&self.account) {
            Ok(token) => Credentials::new(token),
            Err(_) => Credentials::new("open"),
        }
    }

    /// Creates a device whose clock starts at `start_ms`.
    pub fn device(&self, name: &str, start_ms: Timestamp) -> Device {
        self.device_with_credentials(name, start_ms, self.credentials())
    }

    /// Creates a device that presents `credentials`.
    pub fn device_with_credentials(
        &self,
        name: &str,
        start_ms: Timestamp,
        credentials: Credentials,
    ) -> Device {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(start_ms));
        let writer = LocalWriter::new(Arc::clone(&store), Arc::clone(&clock));

        let config = SyncConfig::new(LOOPBACK_URL)
            .with_cloud_sync(true)
            .with_credentials(credentials);
        let remote = HttpRemote::new(
            LOOPBACK_URL,
            LoopbackClient::new(ServerLink(Arc::clone(&self.server))),
        );
        let engine =
            SyncEngine::new(config, Arc::clone(&store), remote).with_clock(clock.clone());

        Device {
            name: name.to_string(),
            store,
            clock,
            writer,
            engine,
        }
    }

    /// Returns the account's records sorted by id.
    pub fn records(&self) -> Vec<LedgerRecord> {
        sorted_by_id(self.server.store(&self.account).changed_since(0))
    }
}

/// A simulated device with its own store, clock and sync engine.
pub struct Device {
    name: String,
    store: Arc<MemoryStore<LedgerRecord>>,
    clock: Arc<ManualClock>,
    writer: LocalWriter<MemoryStore<LedgerRecord>, Arc<ManualClock>>,
    engine: DeviceEngine,
}

impl Device {
    /// Returns the device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the local store.
    pub fn store(&self) -> &Arc<MemoryStore<LedgerRecord>> {
        &self.store
    }

    /// Returns the sync engine.
    pub fn engine(&self) -> &DeviceEngine {
        &self.engine
    }

    /// Returns the device clock.
    pub fn clock(&self) -> &Arc<ManualClock> {
        &self.clock
    }

    /// Moves the device clock forward.
    pub fn advance(&self, millis: i64) {
        self.clock.advance(millis);
    }

    /// Writes a record locally. The clock ticks one millisecond afterwards.
    pub fn write(&self, record: LedgerRecord) -> LedgerRecord {
        let stored = self.writer.write(record).expect("local write failed");
        self.clock.advance(1);
        stored
    }

    /// Deletes a record locally, returning the tombstone.
    pub fn delete(&self, id: &str) -> LedgerRecord {
        let tombstone = self
            .writer
            .delete(&RecordId::from(id))
            .expect("local delete failed");
        self.clock.advance(1);
        tombstone
    }

    /// Deletes a record if it exists locally.
    pub fn try_delete(&self, id: &RecordId) -> Option<LedgerRecord> {
        let tombstone = self.writer.delete(id).ok()?;
        self.clock.advance(1);
        Some(tombstone)
    }

    /// Runs one sync for `trigger`.
    pub fn try_sync(&self, trigger: SyncTrigger) -> SyncResult<SyncAttempt> {
        self.engine.sync(trigger)
    }

    /// Runs an incremental sync and returns its result.
    pub fn sync(&self) -> SyncCycleResult {
        self.completed(SyncTrigger::Timer)
    }

    /// Runs a full sync and returns its result.
    pub fn sync_full(&self) -> SyncCycleResult {
        self.completed(SyncTrigger::Manual)
    }

    /// Runs the automatic full calibration and returns its result.
    pub fn calibrate(&self) -> SyncCycleResult {
        self.completed(SyncTrigger::Calibration)
    }

    fn completed(&self, trigger: SyncTrigger) -> SyncCycleResult {
        match self.try_sync(trigger) {
            Ok(SyncAttempt::Completed(result)) => result,
            Ok(other) => panic!("{}: sync did not run: {other:?}", self.name),
            Err(e) => panic!("{}: sync failed: {e}", self.name),
        }
    }

    /// Returns local records, tombstones included, sorted by id.
    pub fn records(&self) -> Vec<LedgerRecord> {
        sorted_by_id(self.store.get_all().expect("store read failed"))
    }

    /// Returns the live (non-deleted) record stored under `id`.
    pub fn live(&self, id: &str) -> Option<LedgerRecord> {
        self.store
            .get(&RecordId::from(id))
            .expect("store read failed")
            .filter(|r| !r.is_deleted())
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("records", &self.store.len().unwrap_or(0))
            .finish_non_exhaustive()
    }
}

/// A file-backed store in a temporary directory.
pub struct TempLedger {
    /// The store.
    pub store: Arc<FileStore<LedgerRecord>>,
    dir: TempDir,
}

impl TempLedger {
    /// Creates an empty ledger store.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let store = FileStore::open_with_create_dirs(&dir.path().join("records.jsonl"))
            .expect("Failed to open file store");
        Self {
            store: Arc::new(store),
            dir,
        }
    }

    /// Returns the temporary directory.
    pub fn dir(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    /// Drops the open store and opens the same file again.
    pub fn reopen(&mut self) {
        let path = self.store.path().to_path_buf();
        self.store = Arc::new(FileStore::open(&path).expect("Failed to reopen file store"));
    }
}

impl Default for TempLedger {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds an unstamped transaction in the `household` ledger.
pub fn transaction(id: &str, amount: i64) -> LedgerRecord {
    LedgerRecord::from(Transaction {
        id: RecordId::from(id),
        ledger_id: RecordId::from("household"),
        amount,
        ..Default::default()
    })
}

/// Asserts that every device holds exactly the cloud's records.
///
/// Tombstones count: a device that still holds a live copy of a record the
/// cloud has deleted is not converged.
pub fn assert_converged(cloud: &Cloud, devices: &[&Device]) {
    let expected = cloud.records();
    for device in devices {
        assert_eq!(
            device.records(),
            expected,
            "device {} diverged from the cloud",
            device.name()
        );
    }
}

fn sorted_by_id(mut records: Vec<LedgerRecord>) -> Vec<LedgerRecord> {
    records.sort_by(|a, b| a.id().cmp(b.id()));
    records
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_writes_are_stamped_by_its_clock() {
        let cloud = Cloud::open();
        let phone = cloud.device("phone", 5_000);

        assert_eq!(phone.write(transaction("a", 1)).updated_at(), 5_000);
        assert_eq!(phone.write(transaction("b", 2)).updated_at(), 5_001);
        assert!(phone.delete("a").is_deleted());
        assert!(phone.live("a").is_none());
        assert!(phone.try_delete(&RecordId::from("missing")).is_none());
    }

    #[test]
    fn secured_cloud_accepts_its_devices() {
        let cloud = Cloud::with_auth(b"cloud-secret", "alice");
        let phone = cloud.device("phone", 1_000);
        phone.write(transaction("rent", -90_000));

        let result = phone.sync();
        assert_eq!(result.accepted, 1);
        assert_eq!(cloud.server().accounts(), vec!["alice".to_string()]);
        assert_converged(&cloud, &[&phone]);
    }

    #[test]
    fn temp_ledger_survives_reopen() {
        let mut ledger = TempLedger::new();
        ledger.store.upsert(LedgerRecord::from(Transaction {
            id: RecordId::from("t1"),
            updated_at: 10,
            ..Default::default()
        }))
        .unwrap();

        ledger.reopen();
        assert_eq!(ledger.store.len().unwrap(), 1);
        assert!(ledger.dir().exists());
    }
}

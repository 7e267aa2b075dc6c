//! In-memory record store.

use crate::error::StoreResult;
use crate::traits::{check_upsert, next_timestamp, scan_order, validate, RecordStore, UpsertOutcome};
use parking_lot::RwLock;
use std::collections::HashMap;
use tally_protocol::{RecordId, SyncableRecord, Timestamp};

/// An in-memory record store.
///
/// This store keeps all records in a hash map and is suitable for:
/// - Unit tests
/// - Integration tests simulating several devices
/// - Ephemeral devices that don't need persistence
///
/// # Example
///
/// ```rust
/// use tally_protocol::{LedgerRecord, RecordId, Transaction};
/// use tally_store::{MemoryStore, RecordStore, UpsertOutcome};
///
/// let store = MemoryStore::new();
/// let record = LedgerRecord::from(Transaction {
///     id: RecordId::from("1"),
///     updated_at: 100,
///     ..Default::default()
/// });
/// assert_eq!(store.upsert(record.clone()).unwrap(), UpsertOutcome::Written);
/// assert_eq!(store.upsert(record).unwrap(), UpsertOutcome::Unchanged);
/// ```
#[derive(Debug)]
pub struct MemoryStore<R> {
    records: RwLock<HashMap<RecordId, R>>,
}

impl<R: SyncableRecord> MemoryStore<R> {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a store pre-populated with `records`, bypassing validation.
    ///
    /// Later records with the same id replace earlier ones.
    #[must_use]
    pub fn with_records(records: impl IntoIterator<Item = R>) -> Self {
        let map = records
            .into_iter()
            .map(|r| (r.id().clone(), r))
            .collect();
        Self {
            records: RwLock::new(map),
        }
    }

    /// Returns a copy of all records keyed by id.
    ///
    /// Useful for comparing the state of two stores in tests.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<RecordId, R> {
        self.records.read().clone()
    }
}

impl<R: SyncableRecord> Default for MemoryStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: SyncableRecord> RecordStore for MemoryStore<R> {
    type Record = R;

    fn get(&self, id: &RecordId) -> StoreResult<Option<R>> {
        Ok(self.records.read().get(id).cloned())
    }

    fn get_changed_since(&self, version: Timestamp) -> StoreResult<Vec<R>> {
        let mut changed: Vec<R> = self
            .records
            .read()
            .values()
            .filter(|r| r.updated_at() > version)
            .cloned()
            .collect();
        changed.sort_by(scan_order);
        Ok(changed)
    }

    fn upsert(&self, record: R) -> StoreResult<UpsertOutcome> {
        let mut records = self.records.write();
        let outcome = check_upsert(records.get(record.id()), &record)?;
        if outcome == UpsertOutcome::Written {
            records.insert(record.id().clone(), record);
        }
        Ok(outcome)
    }

    fn write_local(&self, mut record: R, now: Timestamp) -> StoreResult<R> {
        let mut records = self.records.write();
        let previous = records.get(record.id()).map(SyncableRecord::updated_at);
        record.set_updated_at(next_timestamp(now, previous));
        validate(&record)?;
        records.insert(record.id().clone(), record.clone());
        Ok(record)
    }

    fn remove_tombstones(&self, up_to: Timestamp) -> StoreResult<usize> {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|_, r| !(r.is_deleted() && r.updated_at() <= up_to));
        Ok(before - records.len())
    }

    fn len(&self) -> StoreResult<usize> {
        Ok(self.records.read().len())
    }
}

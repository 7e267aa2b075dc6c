//! Server-side record storage.

use parking_lot::RwLock;
use std::collections::HashMap;
use tally_protocol::{decide, MergeDecision, PushResult, RecordId, SyncableRecord, Timestamp};
use tracing::debug;

/// Records held for one account, keyed by id.
///
/// Pushes go through the same merge rule the clients use, so the order in
/// which devices push does not affect the final state.
#[derive(Debug)]
pub struct RemoteStore<R> {
    records: RwLock<HashMap<RecordId, R>>,
}

impl<R: SyncableRecord> RemoteStore<R> {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a store holding `records`; later duplicates follow the merge rule.
    pub fn with_records(records: impl IntoIterator<Item = R>) -> Self {
        let store = Self::new();
        store.apply(records.into_iter().collect());
        store
    }

    /// Returns the maximum `updatedAt` across all records, or 0.
    pub fn version(&self) -> Timestamp {
        self.records
            .read()
            .values()
            .map(SyncableRecord::updated_at)
            .max()
            .unwrap_or(0)
    }

    /// Returns records with `updatedAt > since`, or all of them if `since <= 0`.
    ///
    /// Ordered by `(updatedAt, id)`.
    pub fn changed_since(&self, since: Timestamp) -> Vec<R> {
        let mut records: Vec<R> = self
            .records
            .read()
            .values()
            .filter(|r| since <= 0 || r.updated_at() > since)
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            a.updated_at()
                .cmp(&b.updated_at())
                .then_with(|| a.id().cmp(b.id()))
        });
        records
    }

    /// Upserts a batch under the last-writer-wins rule.
    ///
    /// Malformed records (empty id, negative timestamp) are rejected. A record
    /// that loses against the stored version is still counted as accepted.
    pub fn apply(&self, batch: Vec<R>) -> PushResult {
        let mut result = PushResult::default();
        let mut records = self.records.write();
        for incoming in batch {
            if incoming.id().is_empty() || incoming.updated_at() < 0 {
                debug!(id = %incoming.id(), updated_at = incoming.updated_at(), "rejecting malformed record");
                result.rejected_ids.push(incoming.id().clone());
                continue;
            }
            match decide(records.get(incoming.id()), &incoming) {
                MergeDecision::Insert | MergeDecision::Replace => {
                    records.insert(incoming.id().clone(), incoming);
                }
                MergeDecision::KeepExisting => {}
            }
            result.accepted_count += 1;
        }
        result
    }

    /// Returns the record stored under `id`.
    pub fn get(&self, id: &RecordId) -> Option<R> {
        self.records.read().get(id).cloned()
    }

    /// Returns the number of records, tombstones included.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl<R: SyncableRecord> Default for RemoteStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

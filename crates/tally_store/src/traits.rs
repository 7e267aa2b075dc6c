//! Record store trait definition.

use crate::error::{StoreError, StoreResult};
use tally_protocol::{RecordId, SyncableRecord, Timestamp};

/// What an upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The record was inserted or overwritten.
    Written,
    /// The exact same version was already stored; nothing changed.
    Unchanged,
}

/// A versioned local record store.
///
/// # Invariants
///
/// - `upsert` only moves a record forward: an incoming `updated_at` must be
///   strictly greater than the stored one
/// - Re-applying the exact stored version is an idempotent no-op
/// - Tombstones are returned by every read until `remove_tombstones`
/// - Every successful write is visible to subsequent reads immediately
///
/// # Implementors
///
/// - [`crate::MemoryStore`] - For testing
/// - [`crate::FileStore`] - For persistent storage
pub trait RecordStore: Send + Sync {
    /// The record type held by this store.
    type Record: SyncableRecord;

    /// Reads a single record, tombstones included.
    fn get(&self, id: &RecordId) -> StoreResult<Option<Self::Record>>;

    /// Returns every record with `updated_at > version`, tombstones included.
    ///
    /// Results are ordered by `(updated_at, id)`, so the scan is stable and
    /// can be restarted from the last timestamp seen.
    fn get_changed_since(&self, version: Timestamp) -> StoreResult<Vec<Self::Record>>;

    /// Returns every record, tombstones included, ordered by `(updated_at, id)`.
    fn get_all(&self) -> StoreResult<Vec<Self::Record>> {
        self.get_changed_since(Timestamp::MIN)
    }

    /// Inserts or overwrites a record by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NonIncreasing`] if the stored version is newer,
    /// or carries the same timestamp with different content, and
    /// [`StoreError::Invalid`] for malformed records.
    fn upsert(&self, record: Self::Record) -> StoreResult<UpsertOutcome>;

    /// Stamps a local edit and stores it atomically.
    ///
    /// The stored `updated_at` becomes `max(now, previous + 1)`, so two writes
    /// to the same id never share a timestamp. Returns the stored version.
    fn write_local(&self, record: Self::Record, now: Timestamp) -> StoreResult<Self::Record>;

    /// Physically removes tombstones with `updated_at <= up_to`.
    ///
    /// This is a maintenance operation; the sync path never calls it.
    /// Returns the number of records removed.
    fn remove_tombstones(&self, up_to: Timestamp) -> StoreResult<usize>;

    /// Returns the number of stored records, tombstones included.
    fn len(&self) -> StoreResult<usize>;

    /// Returns true if the store holds no records.
    fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Returns the highest `updated_at` in the store, or 0 when empty.
    fn max_version(&self) -> StoreResult<Timestamp> {
        Ok(self
            .get_all()?
            .iter()
            .map(SyncableRecord::updated_at)
            .max()
            .unwrap_or(0))
    }
}

/// Computes the timestamp for a local edit of a record last stamped `previous`.
pub fn next_timestamp(now: Timestamp, previous: Option<Timestamp>) -> Timestamp {
    match previous {
        Some(prev) => now.max(prev.saturating_add(1)),
        None => now,
    }
}

/// Rejects records no store should hold.
pub(crate) fn validate<R: SyncableRecord>(record: &R) -> StoreResult<()> {
    if record.id().is_empty() {
        return Err(StoreError::Invalid {
            id: record.id().clone(),
            reason: "empty id".into(),
        });
    }
    if record.updated_at() < 0 {
        return Err(StoreError::Invalid {
            id: record.id().clone(),
            reason: format!("negative updatedAt {}", record.updated_at()),
        });
    }
    Ok(())
}

/// Applies the upsert rule against the currently stored version.
pub(crate) fn check_upsert<R: SyncableRecord>(
    existing: Option<&R>,
    incoming: &R,
) -> StoreResult<UpsertOutcome> {
    validate(incoming)?;
    match existing {
        None => Ok(UpsertOutcome::Written),
        Some(current) if incoming.updated_at() > current.updated_at() => Ok(UpsertOutcome::Written),
        Some(current) if current == incoming => Ok(UpsertOutcome::Unchanged),
        Some(current) => Err(StoreError::NonIncreasing {
            id: incoming.id().clone(),
            stored: current.updated_at(),
            incoming: incoming.updated_at(),
        }),
    }
}

/// Orders records for stable scans.
pub(crate) fn scan_order<R: SyncableRecord>(a: &R, b: &R) -> std::cmp::Ordering {
    a.updated_at()
        .cmp(&b.updated_at())
        .then_with(|| a.id().cmp(b.id()))
}

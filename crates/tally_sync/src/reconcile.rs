//! Merging remote batches into the local store and choosing what to push.
//!
//! The merge decision is [`tally_protocol::decide`], a pure function of the
//! two timestamps. Applying a batch twice, or in any order, ends in the same
//! store state.

use std::collections::{HashMap, HashSet};
use tally_protocol::{decide, Conflict, RecordId, SyncableRecord, Timestamp};
use tally_store::{RecordStore, StoreError, StoreResult};
use tracing::{debug, warn};

/// A record the store refused during a merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidRecord {
    /// The offending record.
    pub id: RecordId,
    /// Why it was refused.
    pub reason: String,
}

/// What merging one pulled batch did.
#[derive(Debug, Clone, Default)]
pub struct MergeReport {
    /// Records in the batch.
    pub received: usize,
    /// Remote versions written locally, by id.
    pub adopted: HashMap<RecordId, Timestamp>,
    /// Newest version the remote holds for every valid id in the batch.
    pub remote_versions: HashMap<RecordId, Timestamp>,
    /// Remote versions identical to what is stored.
    pub unchanged: usize,
    /// Remote versions discarded because local is the same age or newer.
    pub ignored: Vec<Conflict>,
    /// Records skipped as malformed.
    pub invalid: Vec<InvalidRecord>,
    /// Highest `updatedAt` among valid records in the batch, or 0.
    pub max_updated_at: Timestamp,
}

impl MergeReport {
    /// Number of remote versions written locally.
    pub fn applied(&self) -> usize {
        self.adopted.len()
    }

    /// Returns true if the remote already holds `record` or something newer.
    ///
    /// Pushing such a record cannot change the remote, so it is left out of
    /// the push set. This covers records adopted in the same cycle.
    pub fn remote_has<R: SyncableRecord>(&self, record: &R) -> bool {
        self.remote_versions
            .get(record.id())
            .is_some_and(|remote| *remote >= record.updated_at())
    }
}

/// Merges a batch of remote records into `store`.
///
/// Malformed records are skipped and reported; every other store error
/// aborts the merge. Records already merged stay merged.
///
/// # Errors
///
/// Returns the first non-validation store error.
pub fn merge_batch<S: RecordStore>(store: &S, batch: Vec<S::Record>) -> StoreResult<MergeReport> {
    let mut report = MergeReport {
        received: batch.len(),
        ..MergeReport::default()
    };

    for incoming in batch {
        if incoming.id().is_empty() || incoming.updated_at() < 0 {
            report.invalid.push(InvalidRecord {
                id: incoming.id().clone(),
                reason: format!("malformed record (updatedAt {})", incoming.updated_at()),
            });
            continue;
        }
        report.max_updated_at = report.max_updated_at.max(incoming.updated_at());
        let seen = report
            .remote_versions
            .entry(incoming.id().clone())
            .or_insert(incoming.updated_at());
        *seen = (*seen).max(incoming.updated_at());

        let existing = store.get(incoming.id())?;
        if !decide(existing.as_ref(), &incoming).applies() {
            match existing {
                Some(local) if local == incoming => report.unchanged += 1,
                Some(local) => {
                    debug!(id = %incoming.id(), local = local.updated_at(), remote = incoming.updated_at(), "remote version ignored");
                    report.ignored.push(Conflict::ignored(&local, &incoming));
                }
                None => {}
            }
            continue;
        }

        let id = incoming.id().clone();
        let updated_at = incoming.updated_at();
        match store.upsert(incoming.clone()) {
            Ok(_) => {
                report.adopted.insert(id, updated_at);
            }
            // A local edit landed between the read and the write; local wins.
            Err(StoreError::NonIncreasing { .. }) => {
                if let Some(local) = store.get(&id)? {
                    report.ignored.push(Conflict::ignored(&local, &incoming));
                }
            }
            Err(e) if e.is_validation() => {
                warn!(%id, error = %e, "skipping invalid remote record");
                report.invalid.push(InvalidRecord {
                    id,
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(e),
        }
    }

    Ok(report)
}

/// Selects the local records to push.
///
/// The set is every record with `updatedAt > watermark`, plus the current
/// version of every id the remote rejected earlier, minus anything the
/// remote was just seen to hold at the same or a newer version. Tombstones
/// are pushed like any other record. Pass `Timestamp::MIN` as the watermark
/// for a full push.
///
/// # Errors
///
/// Returns any store read error.
pub fn push_candidates<S: RecordStore>(
    store: &S,
    watermark: Timestamp,
    retry_ids: &[RecordId],
    merged: &MergeReport,
) -> StoreResult<Vec<S::Record>> {
    let mut candidates = store.get_changed_since(watermark)?;
    let mut seen: HashSet<RecordId> = candidates.iter().map(|r| r.id().clone()).collect();

    for id in retry_ids {
        if seen.insert(id.clone()) {
            if let Some(record) = store.get(id)? {
                candidates.push(record);
            }
        }
    }

    candidates.retain(|r| !merged.remote_has(r));
    candidates.sort_by(|a, b| {
        a.updated_at()
            .cmp(&b.updated_at())
            .then_with(|| a.id().cmp(b.id()))
    });
    Ok(candidates)
}

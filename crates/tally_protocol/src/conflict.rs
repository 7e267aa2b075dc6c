//! Conflict detection and resolution.
//!
//! Both the client reconciler and the remote endpoint call [`decide`], so the
//! two sides always converge on the same winner regardless of push/pull order.

use crate::record::{RecordId, SyncableRecord, Timestamp};

/// Outcome of comparing an incoming version against the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDecision {
    /// No stored version exists; the incoming version is inserted.
    Insert,
    /// The incoming version is strictly newer and replaces the stored one.
    Replace,
    /// The stored version is the same age or newer; the incoming one is dropped.
    KeepExisting,
}

impl MergeDecision {
    /// Returns true if the incoming version must be written.
    pub fn applies(&self) -> bool {
        matches!(self, MergeDecision::Insert | MergeDecision::Replace)
    }
}

/// Decides whether `incoming` supersedes `existing`.
///
/// The decision looks at timestamps only. Deletion carries no extra weight:
/// a tombstone wins exactly when its timestamp is strictly greater, and a
/// stored tombstone is only superseded by a strictly newer write. Ties keep
/// the stored version.
pub fn decide<R: SyncableRecord>(existing: Option<&R>, incoming: &R) -> MergeDecision {
    match existing {
        None => MergeDecision::Insert,
        Some(current) if incoming.updated_at() > current.updated_at() => MergeDecision::Replace,
        Some(_) => MergeDecision::KeepExisting,
    }
}

/// A remote version that lost against the local one, kept for the sync log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    /// Record ID.
    pub id: RecordId,
    /// Timestamp of the version that was kept.
    pub local_updated_at: Timestamp,
    /// Timestamp of the version that was offered.
    pub remote_updated_at: Timestamp,
    /// Whether the kept version is a tombstone.
    pub local_deleted: bool,
    /// Whether the offered version is a tombstone.
    pub remote_deleted: bool,
}

impl Conflict {
    /// Records that `remote` lost against `local`.
    pub fn ignored<R: SyncableRecord>(local: &R, remote: &R) -> Self {
        Self {
            id: local.id().clone(),
            local_updated_at: local.updated_at(),
            remote_updated_at: remote.updated_at(),
            local_deleted: local.is_deleted(),
            remote_deleted: remote.is_deleted(),
        }
    }

    /// Returns true if both versions carry the same timestamp.
    pub fn is_tie(&self) -> bool {
        self.local_updated_at == self.remote_updated_at
    }

    /// Returns true if exactly one side is a tombstone.
    pub fn is_update_delete_conflict(&self) -> bool {
        self.local_deleted != self.remote_deleted
    }

    /// Short human-readable reason for the log.
    pub fn describe(&self) -> String {
        if self.is_tie() {
            format!(
                "remote version of {} discarded: same timestamp {} as local",
                self.id, self.remote_updated_at
            )
        } else {
            format!(
                "remote version of {} discarded: {} is older than local {}",
                self.id, self.remote_updated_at, self.local_updated_at
            )
        }
    }
}

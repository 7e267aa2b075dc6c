//! # Tally Sync Protocol
//!
//! Record model and wire protocol shared by Tally clients and remotes.
//!
//! This crate provides:
//! - [`SyncableRecord`], the capability every synchronized record exposes
//! - [`LedgerRecord`] and its kinds (transactions, ledgers, categories)
//! - The last-writer-wins merge rule ([`decide`]) used by both sides
//! - Protocol messages (probe, pull, push) with JSON encoding
//!
//! This is a pure protocol crate with no I/O operations.
//!
//! ## Merge rule
//!
//! Conflict resolution is whole-record and decided by `updated_at` alone:
//! an incoming version replaces the stored one only when its timestamp is
//! strictly greater. Tombstones travel like any other version, so a delete
//! can only be undone by a strictly newer write.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod error;
mod messages;
mod record;

pub use conflict::{decide, Conflict, MergeDecision};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    ErrorResponse, ProbeRequest, ProbeResponse, PullRequest, PullResponse, PushRequest,
    PushResult, WireMessage, PROBE_PATH, PROTOCOL_VERSION, PULL_PATH, PUSH_PATH,
};
pub use record::{
    Category, CategoryDirection, Ledger, LedgerRecord, RecordId, RecordKind, SyncableRecord,
    Timestamp, Transaction,
};

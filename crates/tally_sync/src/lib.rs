//! # Tally Sync
//!
//! Sync orchestrator for Tally devices.
//!
//! This crate provides:
//! - Endpoint client (probe, pull, push) over HTTP or a loopback server
//! - Last-writer-wins reconciliation with tombstones
//! - Sync state machine with incremental and full cycles
//! - Trigger coalescing, auth backoff and cancellation
//! - Persisted checkpoint and sync log
//! - Auto-sync runner driven by mutations and a timer
//!
//! ## Architecture
//!
//! Each cycle runs **probe, pull, merge, push** in that order:
//! 1. Ask the remote for its version; skip the pull if nothing is new
//! 2. Pull records changed since `lastSyncVersion` (everything on a full sync)
//! 3. Merge them into the local store; ties keep the local version
//! 4. Push local records above the push watermark, plus earlier rejections
//!
//! ## Key Invariants
//!
//! - At most one cycle runs at a time per engine
//! - A failed pull never leads to a push in the same cycle
//! - Watermarks only move forward, and only after a successful cycle
//! - Merging the same batch twice changes nothing

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod checkpoint;
mod config;
mod endpoint;
mod error;
mod http;
mod log;
mod reconcile;
mod scheduler;
mod state;

pub use checkpoint::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore, SyncCheckpoint};
pub use config::{Credentials, RetryConfig, SyncConfig};
pub use endpoint::{MockCall, MockEndpoint, MockFailure, RemoteEndpoint};
pub use error::{ErrorKind, SyncError, SyncResult};
pub use http::{HttpClient, HttpRemote, HttpResponse, LoopbackClient, LoopbackServer, ReqwestClient};
pub use log::{JsonlSyncLog, MemorySyncLog, SyncDirection, SyncLog, SyncLogEntry, SyncOutcome};
pub use reconcile::{merge_batch, push_candidates, InvalidRecord, MergeReport};
pub use scheduler::{spawn_auto_sync, SyncHandle};
pub use state::{
    SkipReason, SyncAttempt, SyncCycleResult, SyncEngine, SyncMode, SyncPhase, SyncStats,
    SyncStatus, SyncTrigger,
};

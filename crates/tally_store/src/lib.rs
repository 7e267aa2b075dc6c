//! # Tally Store
//!
//! Versioned local record store for Tally.
//!
//! Every record carries a monotonically increasing `updated_at` and an
//! `is_deleted` tombstone flag. The store answers "what changed since
//! version X" and refuses writes that would move a record backwards in time.
//!
//! ## Design Principles
//!
//! - Reads and writes are synchronous and never touch the network
//! - A successful upsert is visible to every later read in the process
//! - Tombstones are kept until explicit compaction
//! - Stores are `Send + Sync` and share one instance across threads
//!
//! ## Available Stores
//!
//! - [`MemoryStore`] - For tests and ephemeral devices
//! - [`FileStore`] - Append-only JSON-lines log with compaction
//!
//! ## Example
//!
//! ```rust
//! use tally_protocol::{Ledger, LedgerRecord, RecordId};
//! use tally_store::{LocalWriter, ManualClock, MemoryStore, RecordStore};
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryStore::<LedgerRecord>::new());
//! let writer = LocalWriter::new(Arc::clone(&store), ManualClock::new(1_000));
//!
//! let ledger = LedgerRecord::from(Ledger {
//!     id: RecordId::from("household"),
//!     name: "Household".into(),
//!     currency: "EUR".into(),
//!     ..Default::default()
//! });
//! let stored = writer.write(ledger).unwrap();
//! assert_eq!(store.get_changed_since(0).unwrap(), vec![stored]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod error;
mod file;
mod memory;
mod traits;
mod writer;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{StoreError, StoreResult};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use traits::{next_timestamp, RecordStore, UpsertOutcome};
pub use writer::{LocalWriter, MutationListener};

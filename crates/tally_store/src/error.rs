//! Error types for store operations.

use std::io;
use tally_protocol::{RecordId, Timestamp};
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The record is malformed.
    #[error("invalid record {id}: {reason}")]
    Invalid {
        /// The offending record.
        id: RecordId,
        /// What is wrong with it.
        reason: String,
    },

    /// The write does not move the record forward in time.
    #[error("non-increasing updatedAt for {id}: stored {stored}, incoming {incoming}")]
    NonIncreasing {
        /// The offending record.
        id: RecordId,
        /// Timestamp currently stored.
        stored: Timestamp,
        /// Timestamp of the rejected write.
        incoming: Timestamp,
    },

    /// The record does not exist.
    #[error("record not found: {0}")]
    NotFound(RecordId),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A record could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The store file is corrupted.
    #[error("store corrupted: {0}")]
    Corrupted(String),
}

impl StoreError {
    /// Returns true if the error concerns a single record rather than the store.
    ///
    /// Such errors skip the record; the rest of a batch can continue.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            StoreError::Invalid { .. } | StoreError::NonIncreasing { .. }
        )
    }

    /// Returns the record the error refers to, if any.
    pub fn record_id(&self) -> Option<&RecordId> {
        match self {
            StoreError::Invalid { id, .. }
            | StoreError::NonIncreasing { id, .. }
            | StoreError::NotFound(id) => Some(id),
            _ => None,
        }
    }
}

//! Error types for the sync engine.

use tally_protocol::ProtocolError;
use tally_store::StoreError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("network error: {0}")]
    Network(String),

    /// A network call did not complete in time.
    #[error("operation timed out")]
    Timeout,

    /// The remote answered with an unexpected HTTP status.
    #[error("remote returned {status}: {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Error message from the body, if any.
        message: String,
    },

    /// The remote refused our credentials.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Malformed message or incompatible protocol version.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Local store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Sync state could not be read or written.
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,
}

/// Coarse classification used for scheduling and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Transient; retry on the next trigger.
    Network,
    /// Not transient until credentials change.
    Auth,
    /// A single malformed record.
    Validation,
    /// The remote speaks something we do not understand.
    Protocol,
    /// Local storage failure.
    Local,
    /// The attempt was abandoned.
    Cancelled,
}

impl SyncError {
    /// Classifies this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Network(_) | SyncError::Timeout => ErrorKind::Network,
            SyncError::Server { status, .. } if *status >= 500 => ErrorKind::Network,
            SyncError::Server { .. } | SyncError::Protocol(_) => ErrorKind::Protocol,
            SyncError::Auth(_) => ErrorKind::Auth,
            SyncError::Store(e) if e.is_validation() => ErrorKind::Validation,
            SyncError::Store(_) | SyncError::Checkpoint(_) => ErrorKind::Local,
            SyncError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Network
    }
}

//! Error types for the sync server.

use tally_protocol::ProtocolError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Missing, malformed or expired credentials.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// No handler for the requested path.
    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(String),

    /// Push batch over the configured limit.
    #[error("batch too large: {size} > {max}")]
    BatchTooLarge {
        /// Records in the request.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Request body over the configured limit.
    #[error("request body too large: {size} bytes > {max}")]
    BodyTooLarge {
        /// Body size in bytes.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Protocol version mismatch.
    #[error("protocol version mismatch: server={server}, client={client}")]
    ProtocolMismatch {
        /// Server protocol version.
        server: u16,
        /// Client protocol version.
        client: u16,
    },

    /// Message encoding failed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        !self.is_server_error()
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        match self {
            ServerError::Internal(_) => true,
            ServerError::Protocol(e) => matches!(e, ProtocolError::Encode { .. }),
            _ => false,
        }
    }

    /// HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::NotAuthorized(_) => 401,
            ServerError::UnknownEndpoint(_) => 404,
            ServerError::BatchTooLarge { .. } | ServerError::BodyTooLarge { .. } => 413,
            ServerError::ProtocolMismatch { .. } => 409,
            ServerError::InvalidRequest(_) => 400,
            ServerError::Protocol(_) if self.is_client_error() => 400,
            ServerError::Protocol(_) | ServerError::Internal(_) => 500,
        }
    }
}

//! Error types for protocol encoding.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding or decoding protocol messages.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// A message could not be serialized.
    #[error("failed to encode {message}: {source}")]
    Encode {
        /// Message type name.
        message: &'static str,
        /// Underlying serializer error.
        source: serde_json::Error,
    },

    /// A message body could not be parsed.
    #[error("failed to decode {message}: {source}")]
    Decode {
        /// Message type name.
        message: &'static str,
        /// Underlying parser error.
        source: serde_json::Error,
    },

    /// The peer speaks a protocol version this build does not understand.
    #[error("protocol version mismatch: local={local}, remote={remote}")]
    VersionMismatch {
        /// Local protocol version.
        local: u16,
        /// Remote protocol version.
        remote: u16,
    },
}

//! Protocol messages for sync.
//!
//! Every message is a JSON object. Records travel in their own JSON shape
//! (camelCase fields, integer timestamps), so a remote can store them as
//! documents keyed by `id` without understanding the payload.

use crate::error::{ProtocolError, ProtocolResult};
use crate::record::{RecordId, Timestamp};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Current protocol version.
pub const PROTOCOL_VERSION: u16 = 1;

/// Endpoint path for version probes.
pub const PROBE_PATH: &str = "/sync/probe";
/// Endpoint path for pulls.
pub const PULL_PATH: &str = "/sync/pull";
/// Endpoint path for pushes.
pub const PUSH_PATH: &str = "/sync/push";

/// JSON encoding shared by all protocol messages.
pub trait WireMessage: Serialize + DeserializeOwned {
    /// Message name used in error reports.
    const NAME: &'static str;

    /// Encodes to JSON bytes.
    fn encode(&self) -> ProtocolResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|source| ProtocolError::Encode {
            message: Self::NAME,
            source,
        })
    }

    /// Decodes from JSON bytes.
    fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        serde_json::from_slice(bytes).map_err(|source| ProtocolError::Decode {
            message: Self::NAME,
            source,
        })
    }
}

/// Asks the remote for its current version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeRequest {
    /// Client protocol version.
    pub protocol_version: u16,
}

impl ProbeRequest {
    /// Creates a probe for the current protocol version.
    pub fn new() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
        }
    }
}

impl Default for ProbeRequest {
    fn default() -> Self {
        Self::new()
    }
}

/// Remote version report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResponse {
    /// Server protocol version.
    pub protocol_version: u16,
    /// Maximum `updatedAt` across all records visible to the account.
    pub version: Timestamp,
}

impl ProbeResponse {
    /// Creates a probe response for the current protocol version.
    pub fn new(version: Timestamp) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            version,
        }
    }

    /// Fails if the server speaks another protocol version.
    pub fn check_version(&self) -> ProtocolResult<()> {
        if self.protocol_version == PROTOCOL_VERSION {
            Ok(())
        } else {
            Err(ProtocolError::VersionMismatch {
                local: PROTOCOL_VERSION,
                remote: self.protocol_version,
            })
        }
    }
}

/// Requests records changed after `since`.
///
/// `since == 0` asks for the full dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    /// Exclusive lower bound on `updatedAt`.
    pub since: Timestamp,
}

impl PullRequest {
    /// Creates a pull request.
    pub fn new(since: Timestamp) -> Self {
        Self { since }
    }

    /// Returns true if this is a full-dataset pull.
    pub fn is_full(&self) -> bool {
        self.since <= 0
    }
}

/// Records returned by a pull, tombstones included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(bound(deserialize = "R: DeserializeOwned"))]
pub struct PullResponse<R> {
    /// Matching records.
    pub records: Vec<R>,
    /// Remote version at the time of the pull.
    pub version: Timestamp,
}

impl<R> PullResponse<R> {
    /// Creates a pull response.
    pub fn new(records: Vec<R>, version: Timestamp) -> Self {
        Self { records, version }
    }
}

/// Local records offered to the remote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(bound(deserialize = "R: DeserializeOwned"))]
pub struct PushRequest<R> {
    /// Records to upsert.
    pub records: Vec<R>,
}

impl<R> PushRequest<R> {
    /// Creates a push request.
    pub fn new(records: Vec<R>) -> Self {
        Self { records }
    }
}

/// Remote verdict on a push.
///
/// A record that loses the timestamp comparison on the remote still counts
/// as accepted: the remote already holds an equal or newer version. Only
/// records the remote cannot store at all are rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResult {
    /// Number of records the remote accepted.
    pub accepted_count: u64,
    /// Records the remote refused.
    #[serde(default)]
    pub rejected_ids: Vec<RecordId>,
}

impl PushResult {
    /// Creates a result where every record was accepted.
    pub fn accepted(count: u64) -> Self {
        Self {
            accepted_count: count,
            rejected_ids: Vec::new(),
        }
    }

    /// Returns true if nothing was rejected.
    pub fn is_complete(&self) -> bool {
        self.rejected_ids.is_empty()
    }
}

/// Error body returned by a remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error message.
    pub error: String,
}

impl ErrorResponse {
    /// Creates an error body.
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

impl WireMessage for ProbeRequest {
    const NAME: &'static str = "ProbeRequest";
}

impl WireMessage for ProbeResponse {
    const NAME: &'static str = "ProbeResponse";
}

impl WireMessage for PullRequest {
    const NAME: &'static str = "PullRequest";
}

impl<R: Serialize + DeserializeOwned> WireMessage for PullResponse<R> {
    const NAME: &'static str = "PullResponse";
}

impl<R: Serialize + DeserializeOwned> WireMessage for PushRequest<R> {
    const NAME: &'static str = "PushRequest";
}

impl WireMessage for PushResult {
    const NAME: &'static str = "PushResult";
}

impl WireMessage for ErrorResponse {
    const NAME: &'static str = "ErrorResponse";
}

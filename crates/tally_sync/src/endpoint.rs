//! Remote endpoint abstraction.

use crate::config::Credentials;
use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use tally_protocol::{decide, PushResult, RecordId, SyncableRecord, Timestamp};

/// Client for the remote record store.
///
/// Every call is a suspension point of the sync pipeline and must be bounded
/// by a timeout. Implementations attach credentials to each call themselves.
///
/// # Implementors
///
/// - [`crate::HttpRemote`] - JSON over HTTP
/// - [`MockEndpoint`] - Scripted, for tests
pub trait RemoteEndpoint: Send + Sync {
    /// The record type exchanged with the remote.
    type Record: SyncableRecord;

    /// Returns the maximum `updatedAt` across all records visible to the account.
    fn probe_version(&self) -> SyncResult<Timestamp>;

    /// Returns every record with `updatedAt > since`, tombstones included.
    ///
    /// `since == 0` returns the full dataset.
    fn pull(&self, since: Timestamp) -> SyncResult<Vec<Self::Record>>;

    /// Upserts records on the remote under the last-writer-wins rule.
    fn push(&self, records: Vec<Self::Record>) -> SyncResult<PushResult>;

    /// Replaces the credentials used for subsequent calls.
    fn set_credentials(&self, _credentials: Option<Credentials>) {}
}

/// Which remote call a [`MockEndpoint`] hook or failure applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockCall {
    /// `probe_version`.
    Probe,
    /// `pull`.
    Pull,
    /// `push`.
    Push,
}

/// Failure a [`MockEndpoint`] can be told to produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockFailure {
    /// Connection-level failure.
    Network,
    /// Request timed out.
    Timeout,
    /// Credentials refused.
    Auth,
}

impl MockFailure {
    fn to_error(&self, call: MockCall) -> SyncError {
        match self {
            MockFailure::Network => SyncError::Network(format!("mock {call:?} failed")),
            MockFailure::Timeout => SyncError::Timeout,
            MockFailure::Auth => SyncError::Auth("mock credentials rejected".into()),
        }
    }
}

type Hook = Box<dyn Fn(MockCall) + Send + Sync>;

/// An in-memory remote for testing.
///
/// Holds a record set and applies the same merge rule a real remote does.
/// Failures, forced rejections and a per-call hook can be scripted.
pub struct MockEndpoint<R> {
    records: Mutex<Vec<R>>,
    failure: Mutex<Option<(MockCall, MockFailure)>>,
    reject: Mutex<Vec<RecordId>>,
    hook: Mutex<Option<Hook>>,
    calls: Mutex<Vec<MockCall>>,
    pulls: Mutex<Vec<Timestamp>>,
    pushes: Mutex<Vec<Vec<R>>>,
    credentials: Mutex<Option<Credentials>>,
}

impl<R: SyncableRecord> MockEndpoint<R> {
    /// Creates an empty mock remote.
    pub fn new() -> Self {
        Self::with_records(Vec::new())
    }

    /// Creates a mock remote holding `records`.
    pub fn with_records(records: Vec<R>) -> Self {
        Self {
            records: Mutex::new(records),
            failure: Mutex::new(None),
            reject: Mutex::new(Vec::new()),
            hook: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            pulls: Mutex::new(Vec::new()),
            pushes: Mutex::new(Vec::new()),
            credentials: Mutex::new(None),
        }
    }

    /// Makes `call` fail with `failure` until cleared.
    pub fn fail_on(&self, call: MockCall, failure: MockFailure) {
        *self.failure.lock() = Some((call, failure));
    }

    /// Clears any scripted failure.
    pub fn clear_failure(&self) {
        *self.failure.lock() = None;
    }

    /// Makes every push reject the given ids.
    pub fn reject_ids(&self, ids: Vec<RecordId>) {
        *self.reject.lock() = ids;
    }

    /// Runs `hook` at the start of every call, before any scripted failure.
    pub fn set_hook(&self, hook: impl Fn(MockCall) + Send + Sync + 'static) {
        *self.hook.lock() = Some(Box::new(hook));
    }

    /// Returns the current remote record set.
    pub fn records(&self) -> Vec<R> {
        self.records.lock().clone()
    }

    /// Returns every call made so far, in order.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    /// Returns the `since` argument of every pull.
    pub fn pulls(&self) -> Vec<Timestamp> {
        self.pulls.lock().clone()
    }

    /// Returns the batches received by push.
    pub fn pushes(&self) -> Vec<Vec<R>> {
        self.pushes.lock().clone()
    }

    /// Returns the credentials last set.
    pub fn credentials(&self) -> Option<Credentials> {
        self.credentials.lock().clone()
    }

    fn enter(&self, call: MockCall) -> SyncResult<()> {
        if let Some(hook) = self.hook.lock().as_ref() {
            hook(call);
        }
        self.calls.lock().push(call);
        match &*self.failure.lock() {
            Some((failing, failure)) if *failing == call => Err(failure.to_error(call)),
            _ => Ok(()),
        }
    }
}

impl<R: SyncableRecord> Default for MockEndpoint<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: SyncableRecord> RemoteEndpoint for MockEndpoint<R> {
    type Record = R;

    fn probe_version(&self) -> SyncResult<Timestamp> {
        self.enter(MockCall::Probe)?;
        Ok(self
            .records
            .lock()
            .iter()
            .map(SyncableRecord::updated_at)
            .max()
            .unwrap_or(0))
    }

    fn pull(&self, since: Timestamp) -> SyncResult<Vec<R>> {
        self.enter(MockCall::Pull)?;
        self.pulls.lock().push(since);
        let mut records: Vec<R> = self
            .records
            .lock()
            .iter()
            .filter(|r| since <= 0 || r.updated_at() > since)
            .cloned()
            .collect();
        records.sort_by_key(SyncableRecord::updated_at);
        Ok(records)
    }

    fn push(&self, batch: Vec<R>) -> SyncResult<PushResult> {
        self.enter(MockCall::Push)?;
        self.pushes.lock().push(batch.clone());

        let reject = self.reject.lock().clone();
        let mut records = self.records.lock();
        let mut result = PushResult::default();
        for incoming in batch {
            if reject.contains(incoming.id()) {
                result.rejected_ids.push(incoming.id().clone());
                continue;
            }
            let position = records.iter().position(|r| r.id() == incoming.id());
            let existing = position.map(|i| &records[i]);
            if decide(existing, &incoming).applies() {
                match position {
                    Some(i) => records[i] = incoming,
                    None => records.push(incoming),
                }
            }
            result.accepted_count += 1;
        }
        Ok(result)
    }

    fn set_credentials(&self, credentials: Option<Credentials>) {
        *self.credentials.lock() = credentials;
    }
}

impl<R> std::fmt::Debug for MockEndpoint<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockEndpoint").finish_non_exhaustive()
    }
}

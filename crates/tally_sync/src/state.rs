//! Sync engine state machine.

use crate::checkpoint::{CheckpointStore, MemoryCheckpointStore, SyncCheckpoint};
use crate::config::{Credentials, SyncConfig};
use crate::endpoint::RemoteEndpoint;
use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::log::{MemorySyncLog, SyncDirection, SyncLog, SyncLogEntry, SyncOutcome};
use crate::reconcile::{merge_batch, push_candidates, InvalidRecord, MergeReport};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tally_protocol::{Conflict, PushResult, RecordId, SyncableRecord, Timestamp};
use tally_store::{Clock, RecordStore, SystemClock};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

/// Where the pipeline currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// No sync in flight.
    Idle,
    /// Asking the remote for its version.
    Probing,
    /// Pulling remote changes.
    Pulling,
    /// Merging pulled records into the local store.
    Merging,
    /// Pushing local changes.
    Pushing,
    /// A failure is being recorded; returns to `Idle` right after.
    Error,
}

impl SyncPhase {
    /// Returns true if a sync attempt is in flight.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncPhase::Probing | SyncPhase::Pulling | SyncPhase::Merging | SyncPhase::Pushing
        )
    }

    fn direction(&self) -> SyncDirection {
        match self {
            SyncPhase::Pulling | SyncPhase::Merging => SyncDirection::Pull,
            SyncPhase::Pushing => SyncDirection::Push,
            SyncPhase::Idle | SyncPhase::Probing | SyncPhase::Error => SyncDirection::Probe,
        }
    }
}

/// Aggregate status shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    /// Nothing in flight; the last attempt succeeded or none was made.
    Idle,
    /// A sync is in flight.
    Syncing,
    /// The last attempt failed.
    Error {
        /// Cause of the failure.
        message: String,
    },
}

impl SyncStatus {
    /// Returns `idle`, `syncing` or `error`.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Error { .. } => "error",
        }
    }
}

/// How much of the dataset a cycle reconciles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Only records changed since the watermarks.
    Incremental,
    /// The complete dataset in both directions.
    Full,
}

/// What asked for a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// A local edit (after debouncing).
    Mutation,
    /// The periodic timer.
    Timer,
    /// The runner's periodic full reconcile.
    ///
    /// Incremental pulls miss remote records stamped at or below
    /// `lastSyncVersion`, which happens whenever another device pushes an
    /// edit older than one this device already synced.
    Calibration,
    /// The user.
    Manual,
}

impl SyncTrigger {
    /// Automatic triggers obey the enable switch and auth backoff.
    pub fn is_automatic(&self) -> bool {
        !matches!(self, SyncTrigger::Manual)
    }

    /// Manual syncs and calibrations reconcile the full dataset.
    pub fn mode(&self) -> SyncMode {
        match self {
            SyncTrigger::Manual | SyncTrigger::Calibration => SyncMode::Full,
            SyncTrigger::Mutation | SyncTrigger::Timer => SyncMode::Incremental,
        }
    }
}

/// Why an automatic trigger did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Cloud sync is off or credentials are missing.
    Disabled,
    /// The remote refused our credentials recently.
    AuthBackoff,
}

/// What a call to [`SyncEngine::sync`] did.
#[derive(Debug, Clone)]
pub enum SyncAttempt {
    /// A cycle ran to completion.
    Completed(SyncCycleResult),
    /// Another sync was in flight; it will run once more when done.
    Coalesced,
    /// The trigger was not allowed to start a sync.
    Skipped(SkipReason),
}

impl SyncAttempt {
    /// Returns the cycle result if one ran.
    pub fn completed(&self) -> Option<&SyncCycleResult> {
        match self {
            SyncAttempt::Completed(result) => Some(result),
            _ => None,
        }
    }
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Total number of sync cycles completed.
    pub cycles_completed: u64,
    /// Records received from pulls.
    pub records_pulled: u64,
    /// Remote versions written locally.
    pub records_applied: u64,
    /// Records sent in pushes.
    pub records_pushed: u64,
    /// Records the remote refused.
    pub records_rejected: u64,
    /// Remote versions discarded by the merge rule.
    pub conflicts_ignored: u64,
    /// Failed cycles.
    pub failures: u64,
    /// Retries made by [`SyncEngine::sync_with_retry`].
    pub retries: u64,
    /// Clock time of the last successful cycle.
    pub last_sync_at: Option<Timestamp>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Result of a sync cycle.
#[derive(Debug, Clone)]
pub struct SyncCycleResult {
    /// Mode the cycle ran in.
    pub mode: SyncMode,
    /// False when the probe showed nothing new and the pull was skipped.
    pub pulled_remote: bool,
    /// Records received from the remote.
    pub pulled: u64,
    /// Remote versions written locally.
    pub applied: u64,
    /// Remote versions discarded by the merge rule.
    pub ignored: Vec<Conflict>,
    /// Remote records skipped as malformed.
    pub invalid: Vec<InvalidRecord>,
    /// Records sent to the remote.
    pub pushed: u64,
    /// Records the remote accepted.
    pub accepted: u64,
    /// Records the remote refused; retried next cycle.
    pub rejected: Vec<RecordId>,
    /// `lastSyncVersion` after the cycle.
    pub version: Timestamp,
    /// Duration of the sync cycle.
    pub duration: Duration,
}

impl SyncCycleResult {
    /// Returns true if any record was skipped or rejected.
    pub fn is_partial(&self) -> bool {
        !self.invalid.is_empty() || !self.rejected.is_empty()
    }
}

#[derive(Debug, Default)]
struct Lane {
    running: bool,
    rerun: Option<SyncMode>,
}

/// Holds the single sync lane; releases it on drop.
struct LaneClaim<'a> {
    lane: &'a Mutex<Lane>,
    held: bool,
}

impl LaneClaim<'_> {
    /// Releases the lane unless a rerun was requested, atomically.
    fn next_rerun(&mut self) -> Option<SyncMode> {
        let mut lane = self.lane.lock();
        let rerun = lane.rerun.take();
        if rerun.is_none() {
            lane.running = false;
            self.held = false;
        }
        rerun
    }
}

impl Drop for LaneClaim<'_> {
    fn drop(&mut self) {
        if self.held {
            let mut lane = self.lane.lock();
            lane.running = false;
            lane.rerun = None;
        }
    }
}

/// The sync engine reconciles a local store with a remote endpoint.
///
/// One engine serves one account. At most one cycle runs at a time; triggers
/// that arrive meanwhile are coalesced into a single rerun.
pub struct SyncEngine<S: RecordStore, E: RemoteEndpoint<Record = S::Record>> {
    config: RwLock<SyncConfig>,
    store: Arc<S>,
    remote: E,
    checkpoints: Arc<dyn CheckpointStore>,
    log: Arc<dyn SyncLog>,
    clock: Arc<dyn Clock>,
    lane: Mutex<Lane>,
    phase: RwLock<SyncPhase>,
    status: watch::Sender<SyncStatus>,
    entries: broadcast::Sender<SyncLogEntry>,
    stats: RwLock<SyncStats>,
    cancelled: AtomicBool,
    auth_blocked_until: Mutex<Option<Timestamp>>,
}

impl<S: RecordStore, E: RemoteEndpoint<Record = S::Record>> SyncEngine<S, E> {
    /// Creates a new sync engine with in-memory checkpoint and log.
    pub fn new(config: SyncConfig, store: Arc<S>, remote: E) -> Self {
        remote.set_credentials(config.credentials.clone());
        let (status, _) = watch::channel(SyncStatus::Idle);
        let (entries, _) = broadcast::channel(256);
        Self {
            config: RwLock::new(config),
            store,
            remote,
            checkpoints: Arc::new(MemoryCheckpointStore::new()),
            log: Arc::new(MemorySyncLog::default()),
            clock: Arc::new(SystemClock),
            lane: Mutex::new(Lane::default()),
            phase: RwLock::new(SyncPhase::Idle),
            status,
            entries,
            stats: RwLock::new(SyncStats::default()),
            cancelled: AtomicBool::new(false),
            auth_blocked_until: Mutex::new(None),
        }
    }

    /// Uses `checkpoints` to persist sync progress.
    #[must_use]
    pub fn with_checkpoint_store(mut self, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = checkpoints;
        self
    }

    /// Writes log entries to `log`.
    #[must_use]
    pub fn with_log(mut self, log: Arc<dyn SyncLog>) -> Self {
        self.log = log;
        self
    }

    /// Stamps log entries and measures auth backoff with `clock`.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the local store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Returns the remote endpoint.
    pub fn remote(&self) -> &E {
        &self.remote
    }

    /// Returns the sync log.
    pub fn log(&self) -> &Arc<dyn SyncLog> {
        &self.log
    }

    /// Returns a copy of the configuration.
    pub fn config(&self) -> SyncConfig {
        self.config.read().clone()
    }

    /// Turns automatic sync on or off.
    pub fn set_cloud_sync_enabled(&self, enabled: bool) {
        self.config.write().cloud_sync_enabled = enabled;
    }

    /// Replaces the credentials and lifts any auth backoff.
    pub fn update_credentials(&self, credentials: Option<Credentials>) {
        self.config.write().credentials = credentials.clone();
        self.remote.set_credentials(credentials);
        *self.auth_blocked_until.lock() = None;
    }

    /// Gets the current phase.
    pub fn phase(&self) -> SyncPhase {
        *self.phase.read()
    }

    /// Gets the current status.
    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    /// Subscribes to status changes.
    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// Subscribes to new log entries.
    pub fn subscribe_log(&self) -> broadcast::Receiver<SyncLogEntry> {
        self.entries.subscribe()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Loads the persisted checkpoint.
    pub fn checkpoint(&self) -> SyncResult<SyncCheckpoint> {
        self.checkpoints.load()
    }

    /// Cancels the sync in flight at its next suspension point.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns true while automatic syncs are paused after an auth failure.
    pub fn auth_backoff_active(&self) -> bool {
        match *self.auth_blocked_until.lock() {
            Some(until) => self.clock.now_millis() < until,
            None => false,
        }
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_phase(&self, phase: SyncPhase) {
        *self.phase.write() = phase;
    }

    /// Handles a trigger.
    ///
    /// Automatic triggers are skipped while sync is disabled or in auth
    /// backoff. If a cycle is already in flight the trigger is coalesced and
    /// the running caller performs one more cycle when done; a manual
    /// trigger upgrades that rerun to a full one.
    ///
    /// # Errors
    ///
    /// Returns the error of the failed cycle. The failure is already logged
    /// and reflected in [`SyncEngine::status`].
    pub fn sync(&self, trigger: SyncTrigger) -> SyncResult<SyncAttempt> {
        if trigger.is_automatic() {
            if !self.config.read().automatic_enabled() {
                debug!(?trigger, "automatic sync disabled");
                return Ok(SyncAttempt::Skipped(SkipReason::Disabled));
            }
            if self.auth_backoff_active() {
                debug!(?trigger, "automatic sync paused after auth failure");
                return Ok(SyncAttempt::Skipped(SkipReason::AuthBackoff));
            }
        }

        let mode = trigger.mode();
        {
            let mut lane = self.lane.lock();
            if lane.running {
                let rerun = match (lane.rerun, mode) {
                    (Some(SyncMode::Full), _) | (_, SyncMode::Full) => SyncMode::Full,
                    _ => SyncMode::Incremental,
                };
                lane.rerun = Some(rerun);
                debug!(?trigger, ?rerun, "sync in flight; coalesced");
                return Ok(SyncAttempt::Coalesced);
            }
            lane.running = true;
        }
        let claim = LaneClaim {
            lane: &self.lane,
            held: true,
        };
        self.drive(claim, mode).map(SyncAttempt::Completed)
    }

    /// Runs cycles on a claimed lane until no rerun is pending.
    fn drive(&self, mut claim: LaneClaim<'_>, mut mode: SyncMode) -> SyncResult<SyncCycleResult> {
        self.cancelled.store(false, Ordering::SeqCst);
        loop {
            let result = self.run_cycle(mode)?;
            match claim.next_rerun() {
                Some(next) => mode = next,
                None => return Ok(result),
            }
        }
    }

    /// Handles a trigger, retrying transient failures with backoff.
    ///
    /// # Errors
    ///
    /// Returns the last error once attempts are exhausted, or the first
    /// non-retryable error.
    pub fn sync_with_retry(&self, trigger: SyncTrigger) -> SyncResult<SyncAttempt> {
        let retry = self.config.read().retry.clone();
        let mut attempt = 0;

        loop {
            match self.sync(trigger) {
                Err(e) if e.is_retryable() && attempt + 1 < retry.max_attempts => {
                    attempt += 1;
                    let delay = retry.delay_after(attempt);
                    warn!(attempt, ?delay, error = %e, "sync failed; retrying");
                    std::thread::sleep(delay);
                    self.stats.write().retries += 1;
                }
                other => return other,
            }
        }
    }

    /// Returns the newest `updatedAt` a tombstone may carry and still be
    /// compacted.
    ///
    /// # Errors
    ///
    /// Returns store or checkpoint errors.
    pub fn tombstone_horizon(&self) -> SyncResult<Timestamp> {
        let checkpoint = self.checkpoints.load()?;
        let mut up_to = checkpoint
            .last_sync_version
            .min(checkpoint.push_watermark);
        for id in &checkpoint.pending_rejects {
            if let Some(record) = self.store.get(id)? {
                up_to = up_to.min(record.updated_at() - 1);
            }
        }
        Ok(up_to)
    }

    /// Physically removes tombstones both sides are known to hold.
    ///
    /// Only tombstones at or below `lastSyncVersion` and the push watermark,
    /// and older than any pending rejected record, are eligible. Returns
    /// `None` if a sync is in flight. Triggers coalesced while compacting
    /// run before this returns.
    ///
    /// # Errors
    ///
    /// Returns store or checkpoint errors, or the error of a coalesced sync.
    pub fn compact_tombstones(&self) -> SyncResult<Option<usize>> {
        {
            let mut lane = self.lane.lock();
            if lane.running {
                return Ok(None);
            }
            lane.running = true;
        }
        let mut claim = LaneClaim {
            lane: &self.lane,
            held: true,
        };

        let up_to = self.tombstone_horizon()?;
        let removed = self.store.remove_tombstones(up_to)?;
        info!(removed, up_to, "compacted tombstones");

        if let Some(mode) = claim.next_rerun() {
            self.drive(claim, mode)?;
        }
        Ok(Some(removed))
    }

    fn run_cycle(&self, mode: SyncMode) -> SyncResult<SyncCycleResult> {
        let start = Instant::now();
        // A standing error stays visible until a cycle succeeds.
        self.status.send_if_modified(|status| {
            let idle = *status == SyncStatus::Idle;
            if idle {
                *status = SyncStatus::Syncing;
            }
            idle
        });

        let result = self.pipeline(mode, start);
        match &result {
            Ok(cycle) => self.finish_success(cycle),
            Err(e) => self.finish_failure(e),
        }
        self.set_phase(SyncPhase::Idle);
        result
    }

    fn pipeline(&self, mode: SyncMode, start: Instant) -> SyncResult<SyncCycleResult> {
        let mut checkpoint = self.checkpoints.load()?;

        self.check_cancelled()?;
        self.set_phase(SyncPhase::Probing);
        let remote_version = self.remote.probe_version()?;
        self.record(
            SyncDirection::Probe,
            SyncOutcome::Ok,
            0,
            format!(
                "remote version {remote_version}, last sync version {}",
                checkpoint.last_sync_version
            ),
        );

        let pulled_remote = mode == SyncMode::Full || remote_version > checkpoint.last_sync_version;
        let mut pulled = 0;
        let mut merged = MergeReport::default();
        if pulled_remote {
            let since = match mode {
                SyncMode::Full => 0,
                SyncMode::Incremental => checkpoint.last_sync_version,
            };
            self.check_cancelled()?;
            self.set_phase(SyncPhase::Pulling);
            let batch = self.remote.pull(since)?;
            pulled = batch.len() as u64;

            self.set_phase(SyncPhase::Merging);
            merged = merge_batch(&*self.store, batch)?;
            self.report_merge(since, &merged);
        } else {
            debug!(remote_version, "remote unchanged; skipping pull");
        }

        self.check_cancelled()?;
        self.set_phase(SyncPhase::Pushing);
        let watermark = match mode {
            SyncMode::Full => Timestamp::MIN,
            SyncMode::Incremental => checkpoint.push_watermark,
        };
        let candidates =
            push_candidates(&*self.store, watermark, &checkpoint.pending_rejects, &merged)?;
        let pushed = candidates.len() as u64;
        let (push_result, max_accepted) = self.push_batches(&candidates, &mut checkpoint)?;

        checkpoint.last_sync_version = checkpoint
            .last_sync_version
            .max(merged.max_updated_at)
            .max(max_accepted);
        self.checkpoints.save(&checkpoint)?;

        Ok(SyncCycleResult {
            mode,
            pulled_remote,
            pulled,
            applied: merged.applied() as u64,
            ignored: merged.ignored,
            invalid: merged.invalid,
            pushed,
            accepted: push_result.accepted_count,
            rejected: push_result.rejected_ids,
            version: checkpoint.last_sync_version,
            duration: start.elapsed(),
        })
    }

    /// Pushes `candidates` in request-sized batches, oldest first, and
    /// returns the combined result with the newest accepted `updatedAt`.
    ///
    /// The push watermark and pending rejects are saved after every batch
    /// but the last, so a failure part way keeps what the remote already
    /// acknowledged; `lastSyncVersion` is left to the caller. The watermark
    /// never passes a record that has not been sent, and ids rejected by any
    /// batch, or not yet retried, stay pending.
    fn push_batches(
        &self,
        candidates: &[S::Record],
        checkpoint: &mut SyncCheckpoint,
    ) -> SyncResult<(PushResult, Timestamp)> {
        let size = self.config.read().push_batch_size.max(1);
        let mut unsent_retries: Vec<RecordId> = candidates
            .iter()
            .map(|r| r.id().clone())
            .filter(|id| checkpoint.pending_rejects.contains(id))
            .collect();
        let mut total = PushResult::default();
        let mut max_accepted = 0;

        let batches: Vec<&[S::Record]> = candidates.chunks(size).collect();
        for (index, batch) in batches.iter().enumerate() {
            self.check_cancelled()?;
            let result = self.remote.push(batch.to_vec())?;
            self.report_push(batch.len() as u64, &result);

            let rejected: HashSet<&RecordId> = result.rejected_ids.iter().collect();
            max_accepted = batch
                .iter()
                .filter(|r| !rejected.contains(r.id()))
                .map(SyncableRecord::updated_at)
                .fold(max_accepted, Timestamp::max);
            let newest_sent = batch.last().map_or(Timestamp::MIN, SyncableRecord::updated_at);
            let sent_up_to = match batches.get(index + 1).and_then(|next| next.first()) {
                Some(next) => newest_sent.min(next.updated_at() - 1),
                None => newest_sent,
            };

            unsent_retries.retain(|id| !batch.iter().any(|r| r.id() == id));
            total.accepted_count += result.accepted_count;
            total.rejected_ids.extend(result.rejected_ids);

            checkpoint.push_watermark = checkpoint.push_watermark.max(sent_up_to);
            checkpoint.pending_rejects = total
                .rejected_ids
                .iter()
                .chain(&unsent_retries)
                .cloned()
                .collect();
            if index + 1 < batches.len() {
                self.checkpoints.save(checkpoint)?;
            }
        }

        if batches.is_empty() {
            checkpoint.pending_rejects.clear();
        }
        Ok((total, max_accepted))
    }

    fn report_merge(&self, since: Timestamp, merged: &MergeReport) {
        for conflict in &merged.ignored {
            self.record(SyncDirection::Pull, SyncOutcome::Ok, 1, conflict.describe());
        }

        let mut message = format!(
            "pulled {} since {}: applied {}, unchanged {}, ignored {}",
            merged.received,
            since,
            merged.applied(),
            merged.unchanged,
            merged.ignored.len()
        );
        let outcome = if merged.invalid.is_empty() {
            SyncOutcome::Ok
        } else {
            let skipped: Vec<String> = merged
                .invalid
                .iter()
                .map(|r| format!("{} ({})", r.id, r.reason))
                .collect();
            message.push_str(&format!("; skipped {}", skipped.join(", ")));
            SyncOutcome::Partial
        };
        self.record(SyncDirection::Pull, outcome, merged.received as u64, message);
    }

    fn report_push(&self, pushed: u64, result: &PushResult) {
        if result.is_complete() {
            self.record(
                SyncDirection::Push,
                SyncOutcome::Ok,
                pushed,
                format!("pushed {pushed}, accepted {}", result.accepted_count),
            );
        } else {
            let ids: Vec<&str> = result.rejected_ids.iter().map(RecordId::as_str).collect();
            self.record(
                SyncDirection::Push,
                SyncOutcome::Partial,
                pushed,
                format!(
                    "pushed {pushed}, accepted {}, rejected {}",
                    result.accepted_count,
                    ids.join(", ")
                ),
            );
        }
    }

    fn finish_success(&self, cycle: &SyncCycleResult) {
        *self.auth_blocked_until.lock() = None;
        let now = self.clock.now_millis();
        {
            let mut stats = self.stats.write();
            stats.cycles_completed += 1;
            stats.records_pulled += cycle.pulled;
            stats.records_applied += cycle.applied;
            stats.records_pushed += cycle.pushed;
            stats.records_rejected += cycle.rejected.len() as u64;
            stats.conflicts_ignored += cycle.ignored.len() as u64;
            stats.last_sync_at = Some(now);
            stats.last_error = None;
        }
        self.status.send_if_modified(|status| {
            let changed = *status != SyncStatus::Idle;
            *status = SyncStatus::Idle;
            changed
        });
        info!(
            mode = ?cycle.mode,
            pulled = cycle.pulled,
            applied = cycle.applied,
            pushed = cycle.pushed,
            version = cycle.version,
            elapsed_ms = cycle.duration.as_millis() as u64,
            "sync completed"
        );
    }

    fn finish_failure(&self, error: &SyncError) {
        let direction = self.phase().direction();
        self.set_phase(SyncPhase::Error);
        self.record(direction, SyncOutcome::Error, 0, error.to_string());

        {
            let mut stats = self.stats.write();
            stats.failures += 1;
            stats.last_error = Some(error.to_string());
        }

        match error.kind() {
            ErrorKind::Cancelled => {
                self.status.send_if_modified(|status| {
                    let changed = *status == SyncStatus::Syncing;
                    if changed {
                        *status = SyncStatus::Idle;
                    }
                    changed
                });
                return;
            }
            ErrorKind::Auth => {
                let backoff = self.config.read().auth_backoff;
                let until = self
                    .clock
                    .now_millis()
                    .saturating_add(backoff.as_millis() as Timestamp);
                *self.auth_blocked_until.lock() = Some(until);
            }
            _ => {}
        }

        let failed = SyncStatus::Error {
            message: error.to_string(),
        };
        // Report once: an identical standing error is not re-announced.
        self.status.send_if_modified(|status| {
            if *status == failed {
                false
            } else {
                *status = failed;
                true
            }
        });
    }

    fn record(&self, direction: SyncDirection, outcome: SyncOutcome, count: u64, message: String) {
        let entry = SyncLogEntry::new(self.clock.now_millis(), direction, outcome, count, message);
        match outcome {
            SyncOutcome::Ok => debug!(?direction, count, message = %entry.message, "sync log"),
            SyncOutcome::Partial | SyncOutcome::Error => {
                warn!(?direction, ?outcome, count, message = %entry.message, "sync log")
            }
        }
        self.log.append(&entry);
        let _ = self.entries.send(entry);
    }
}

impl<S: RecordStore, E: RemoteEndpoint<Record = S::Record>> std::fmt::Debug for SyncEngine<S, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("phase", &self.phase())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{MockCall, MockEndpoint, MockFailure};
    use tally_protocol::{LedgerRecord, Transaction};
    use tally_store::{ManualClock, MemoryStore};

    type Engine = SyncEngine<MemoryStore<LedgerRecord>, MockEndpoint<LedgerRecord>>;

    fn txn(id: &str, updated_at: Timestamp, deleted: bool) -> LedgerRecord {
        LedgerRecord::from(Transaction {
            id: RecordId::from(id),
            updated_at,
            is_deleted: deleted,
            amount: 50,
            ..Default::default()
        })
    }

    fn engine(local: Vec<LedgerRecord>, remote: Vec<LedgerRecord>) -> Engine {
        let config = SyncConfig::new("mock://")
            .with_cloud_sync(true)
            .with_credentials(Credentials::new("token"));
        SyncEngine::new(
            config,
            Arc::new(MemoryStore::with_records(local)),
            MockEndpoint::with_records(remote),
        )
        .with_clock(Arc::new(ManualClock::new(10_000)))
    }

    #[test]
    fn trigger_modes() {
        assert_eq!(SyncTrigger::Manual.mode(), SyncMode::Full);
        assert_eq!(SyncTrigger::Timer.mode(), SyncMode::Incremental);
        assert!(SyncTrigger::Mutation.is_automatic());
        assert!(!SyncTrigger::Manual.is_automatic());
        assert!(SyncPhase::Merging.is_active());
        assert!(!SyncPhase::Idle.is_active());
        assert_eq!(SyncStatus::Idle.as_str(), "idle");
    }

    #[test]
    fn initial_state() {
        let engine = engine(Vec::new(), Vec::new());
        assert_eq!(engine.phase(), SyncPhase::Idle);
        assert_eq!(engine.status(), SyncStatus::Idle);
        assert_eq!(engine.stats().cycles_completed, 0);
        assert_eq!(engine.checkpoint().unwrap(), SyncCheckpoint::default());
        assert_eq!(engine.remote().credentials(), Some(Credentials::new("token")));
    }

    #[test]
    fn incremental_cycle_pulls_then_pushes() {
        let engine = engine(vec![txn("local", 120, false)], vec![txn("remote", 100, false)]);

        let attempt = engine.sync(SyncTrigger::Timer).unwrap();
        let result = attempt.completed().unwrap();

        assert_eq!(result.pulled, 1);
        assert_eq!(result.applied, 1);
        assert_eq!(result.pushed, 1);
        assert_eq!(result.version, 120);
        assert_eq!(
            engine.remote().calls(),
            vec![MockCall::Probe, MockCall::Pull, MockCall::Push]
        );
        assert_eq!(engine.checkpoint().unwrap().push_watermark, 120);
        assert_eq!(engine.status(), SyncStatus::Idle);
        assert_eq!(engine.stats().cycles_completed, 1);
    }

    #[test]
    fn unchanged_remote_skips_pull_but_still_pushes() {
        let engine = engine(Vec::new(), Vec::new());
        engine.sync(SyncTrigger::Timer).unwrap();
        engine.store().upsert(txn("new", 50, false)).unwrap();

        let attempt = engine.sync(SyncTrigger::Mutation).unwrap();
        let result = attempt.completed().unwrap();

        assert!(!result.pulled_remote);
        assert_eq!(result.pushed, 1);
        assert_eq!(engine.remote().pulls().len(), 0);
    }

    #[test]
    fn automatic_sync_requires_credentials() {
        let engine = engine(Vec::new(), Vec::new());
        engine.update_credentials(None);

        let attempt = engine.sync(SyncTrigger::Timer).unwrap();
        assert!(matches!(attempt, SyncAttempt::Skipped(SkipReason::Disabled)));
        assert!(engine.remote().calls().is_empty());

        // Manual sync still tries.
        assert!(engine.sync(SyncTrigger::Manual).is_ok());
    }

    #[test]
    fn pull_failure_aborts_without_push() {
        let engine = engine(vec![txn("local", 10, false)], vec![txn("remote", 20, false)]);
        engine.remote().fail_on(MockCall::Pull, MockFailure::Network);

        let err = engine.sync(SyncTrigger::Timer).unwrap_err();
        assert!(err.is_retryable());
        assert!(engine.remote().pushes().is_empty());
        assert_eq!(engine.checkpoint().unwrap(), SyncCheckpoint::default());
        assert_eq!(engine.phase(), SyncPhase::Idle);
        assert!(matches!(engine.status(), SyncStatus::Error { .. }));

        let last = engine.log().recent(1).pop().unwrap();
        assert_eq!(last.direction, SyncDirection::Pull);
        assert_eq!(last.outcome, SyncOutcome::Error);
    }

    #[test]
    fn push_failure_keeps_watermarks() {
        let engine = engine(vec![txn("a", 500, false)], vec![txn("r", 300, false)]);
        engine.remote().fail_on(MockCall::Push, MockFailure::Timeout);

        assert!(matches!(
            engine.sync(SyncTrigger::Timer),
            Err(SyncError::Timeout)
        ));
        // The merge is kept, the watermark is not advanced.
        assert!(engine.store().get(&RecordId::from("r")).unwrap().is_some());
        assert_eq!(engine.checkpoint().unwrap().last_sync_version, 0);

        engine.remote().clear_failure();
        let attempt = engine.sync(SyncTrigger::Timer).unwrap();
        assert_eq!(attempt.completed().unwrap().pushed, 1);
        assert_eq!(engine.checkpoint().unwrap().last_sync_version, 500);
    }

    #[test]
    fn rejected_ids_are_retried() {
        let engine = engine(vec![txn("3", 100, false), txn("4", 110, false)], Vec::new());
        engine.remote().reject_ids(vec![RecordId::from("3")]);

        let first = engine.sync(SyncTrigger::Timer).unwrap();
        let first = first.completed().unwrap();
        assert!(first.is_partial());
        assert_eq!(first.rejected, vec![RecordId::from("3")]);
        assert_eq!(first.version, 110);
        assert_eq!(
            engine.checkpoint().unwrap().pending_rejects,
            vec![RecordId::from("3")]
        );

        engine.remote().reject_ids(Vec::new());
        let second = engine.sync(SyncTrigger::Timer).unwrap();
        let pushed = engine.remote().pushes().pop().unwrap();
        assert_eq!(pushed, vec![txn("3", 100, false)]);
        assert!(!second.completed().unwrap().is_partial());
        assert!(engine.checkpoint().unwrap().pending_rejects.is_empty());
    }

    #[test]
    fn auth_failure_backs_off_automatic_sync() {
        let engine = engine(Vec::new(), Vec::new());
        engine.remote().fail_on(MockCall::Probe, MockFailure::Auth);

        let err = engine.sync(SyncTrigger::Timer).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Auth);
        assert!(engine.auth_backoff_active());

        let attempt = engine.sync(SyncTrigger::Mutation).unwrap();
        assert!(matches!(attempt, SyncAttempt::Skipped(SkipReason::AuthBackoff)));
        assert_eq!(engine.remote().calls().len(), 1);

        engine.remote().clear_failure();
        engine.update_credentials(Some(Credentials::new("fresh")));
        assert!(!engine.auth_backoff_active());
        assert!(engine.sync(SyncTrigger::Timer).unwrap().completed().is_some());
    }

    #[test]
    fn repeated_failure_reported_once() {
        let engine = engine(Vec::new(), Vec::new());
        let mut status = engine.subscribe_status();
        engine.remote().fail_on(MockCall::Probe, MockFailure::Network);

        engine.sync(SyncTrigger::Timer).unwrap_err();
        assert!(status.has_changed().unwrap());
        status.borrow_and_update();

        engine.sync(SyncTrigger::Timer).unwrap_err();
        assert!(!status.has_changed().unwrap());
        assert_eq!(engine.stats().failures, 2);
        assert_eq!(engine.log().recent(10).len(), 2);
    }

    #[test]
    fn cancelled_cycle_leaves_state_valid() {
        let engine = Arc::new(engine(vec![txn("a", 10, false)], vec![txn("b", 20, false)]));
        let handle = Arc::downgrade(&engine);
        engine.remote().set_hook(move |call| {
            if call == MockCall::Pull {
                if let Some(engine) = handle.upgrade() {
                    engine.cancel();
                }
            }
        });

        let err = engine.sync(SyncTrigger::Manual).unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
        assert!(engine.remote().pushes().is_empty());
        assert_eq!(engine.status(), SyncStatus::Idle);
        assert_eq!(engine.checkpoint().unwrap().last_sync_version, 0);
    }

    #[test]
    fn trigger_during_sync_is_coalesced() {
        let engine = Arc::new(engine(vec![txn("a", 10, false)], Vec::new()));
        let handle = Arc::downgrade(&engine);
        let nested = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&nested);
        engine.remote().set_hook(move |call| {
            if call == MockCall::Probe && seen.lock().is_empty() {
                if let Some(engine) = handle.upgrade() {
                    let attempt = engine.sync(SyncTrigger::Manual).unwrap();
                    seen.lock().push(matches!(attempt, SyncAttempt::Coalesced));
                }
            }
        });

        let attempt = engine.sync(SyncTrigger::Timer).unwrap();

        assert_eq!(*nested.lock(), vec![true]);
        // The coalesced manual request ran as a full rerun.
        assert_eq!(attempt.completed().unwrap().mode, SyncMode::Full);
        let probes = engine
            .remote()
            .calls()
            .into_iter()
            .filter(|c| *c == MockCall::Probe)
            .count();
        assert_eq!(probes, 2);
    }

    #[test]
    fn pushes_are_split_into_batches() {
        let local: Vec<_> = (1..=5).map(|i| txn(&format!("r{i}"), i * 10, false)).collect();
        let engine = engine(local, Vec::new());
        engine.config.write().push_batch_size = 2;

        let attempt = engine.sync(SyncTrigger::Timer).unwrap();
        let result = attempt.completed().unwrap();

        assert_eq!(result.pushed, 5);
        assert_eq!(result.accepted, 5);
        let sizes: Vec<usize> = engine.remote().pushes().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(engine.checkpoint().unwrap().push_watermark, 50);
        let push_entries = engine
            .log()
            .recent(10)
            .into_iter()
            .filter(|e| e.direction == SyncDirection::Push)
            .count();
        assert_eq!(push_entries, 3);
    }

    #[test]
    fn failed_batch_keeps_acknowledged_progress() {
        let engine = Arc::new(engine(
            vec![
                txn("a", 10, false),
                txn("b", 20, false),
                txn("c", 20, false),
                txn("d", 30, false),
            ],
            Vec::new(),
        ));
        engine.config.write().push_batch_size = 2;
        let weak = Arc::downgrade(&engine);
        let pushes = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&pushes);
        engine.remote().set_hook(move |call| {
            if call == MockCall::Push {
                let mut n = counter.lock();
                *n += 1;
                if *n == 2 {
                    if let Some(engine) = weak.upgrade() {
                        engine.remote().fail_on(MockCall::Push, MockFailure::Network);
                    }
                }
            }
        });

        assert!(engine.sync(SyncTrigger::Timer).is_err());
        let checkpoint = engine.checkpoint().unwrap();
        // "c" shares its timestamp with the acknowledged "b" but was never sent.
        assert_eq!(checkpoint.push_watermark, 19);
        assert_eq!(checkpoint.last_sync_version, 0);
        assert_eq!(engine.remote().records().len(), 2);

        // The pull shows "b" already arrived, so only "c" and "d" go out.
        engine.remote().clear_failure();
        let attempt = engine.sync(SyncTrigger::Timer).unwrap();
        assert_eq!(attempt.completed().unwrap().pushed, 2);
        assert_eq!(engine.remote().records().len(), 4);
        let checkpoint = engine.checkpoint().unwrap();
        assert_eq!(checkpoint.push_watermark, 30);
        assert_eq!(checkpoint.last_sync_version, 30);
    }

    #[test]
    fn rejects_are_merged_across_batches() {
        let engine = engine(
            vec![
                txn("a", 10, false),
                txn("b", 20, false),
                txn("c", 30, false),
                txn("d", 40, false),
            ],
            Vec::new(),
        );
        engine.config.write().push_batch_size = 2;
        engine
            .remote()
            .reject_ids(vec![RecordId::from("a"), RecordId::from("d")]);

        let attempt = engine.sync(SyncTrigger::Timer).unwrap();
        let result = attempt.completed().unwrap();
        let expected = vec![RecordId::from("a"), RecordId::from("d")];
        assert_eq!(result.rejected, expected);
        assert_eq!(result.accepted, 2);
        let checkpoint = engine.checkpoint().unwrap();
        assert_eq!(checkpoint.pending_rejects, expected);
        assert_eq!(checkpoint.push_watermark, 40);
        assert_eq!(checkpoint.last_sync_version, 30);
    }

    #[test]
    fn failed_cycle_drops_coalesced_rerun() {
        let engine = Arc::new(engine(Vec::new(), vec![txn("r", 20, false)]));
        engine.remote().fail_on(MockCall::Pull, MockFailure::Network);
        let weak = Arc::downgrade(&engine);
        let nested = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&nested);
        engine.remote().set_hook(move |call| {
            if call == MockCall::Probe && seen.lock().is_empty() {
                if let Some(engine) = weak.upgrade() {
                    let attempt = engine.sync(SyncTrigger::Timer).unwrap();
                    seen.lock().push(matches!(attempt, SyncAttempt::Coalesced));
                }
            }
        });

        assert!(engine.sync(SyncTrigger::Timer).is_err());
        assert_eq!(*nested.lock(), vec![true]);
        // The queued request went down with the failed cycle.
        assert_eq!(engine.remote().calls(), vec![MockCall::Probe, MockCall::Pull]);
        {
            let lane = engine.lane.lock();
            assert!(!lane.running);
            assert!(lane.rerun.is_none());
        }

        // The next trigger starts a fresh cycle.
        engine.remote().clear_failure();
        let attempt = engine.sync(SyncTrigger::Timer).unwrap();
        assert_eq!(attempt.completed().unwrap().applied, 1);
    }

    #[test]
    fn compaction_is_refused_during_sync() {
        let engine = Arc::new(engine(vec![txn("old", 10, true)], Vec::new()));
        engine.sync(SyncTrigger::Timer).unwrap();

        let weak = Arc::downgrade(&engine);
        let during = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&during);
        engine.remote().set_hook(move |call| {
            if call == MockCall::Probe && seen.lock().is_empty() {
                if let Some(engine) = weak.upgrade() {
                    let removed = engine.compact_tombstones().unwrap();
                    seen.lock().push(removed);
                }
            }
        });
        engine.sync(SyncTrigger::Timer).unwrap();

        assert_eq!(*during.lock(), vec![None]);
        assert!(engine.store().get(&RecordId::from("old")).unwrap().is_some());
        assert_eq!(engine.compact_tombstones().unwrap(), Some(1));
    }

    #[test]
    fn calibration_is_automatic_and_full() {
        assert_eq!(SyncTrigger::Calibration.mode(), SyncMode::Full);
        assert!(SyncTrigger::Calibration.is_automatic());

        let engine = engine(Vec::new(), vec![txn("r", 5, false)]);
        engine.set_cloud_sync_enabled(false);
        let attempt = engine.sync(SyncTrigger::Calibration).unwrap();
        assert!(matches!(attempt, SyncAttempt::Skipped(SkipReason::Disabled)));
    }

    #[test]
    fn compaction_respects_watermarks() {
        let engine = engine(
            vec![txn("old", 10, true), txn("fresh", 900, true)],
            Vec::new(),
        );
        engine.sync(SyncTrigger::Timer).unwrap();
        engine.store().upsert(txn("late", 950, true)).unwrap();

        assert_eq!(engine.compact_tombstones().unwrap(), Some(2));
        assert!(engine.store().get(&RecordId::from("late")).unwrap().is_some());
    }

    #[test]
    fn log_entries_are_broadcast() {
        let engine = engine(Vec::new(), vec![txn("r", 5, false)]);
        let mut entries = engine.subscribe_log();

        engine.sync(SyncTrigger::Manual).unwrap();

        assert_eq!(entries.try_recv().unwrap().direction, SyncDirection::Probe);
        let pull = entries.try_recv().unwrap();
        assert_eq!(pull.direction, SyncDirection::Pull);
        assert_eq!(pull.record_count, 1);
        assert_eq!(pull.timestamp, 10_000);
    }
}

//! Auto-sync runner: turns mutations and a periodic timer into sync triggers.
//!
//! Mutation triggers are debounced so a burst of edits produces one sync.
//! Timer and manual triggers run immediately, and every
//! `fullSyncEveryTicks`-th timer tick runs a full calibration instead. After
//! retryable failures, mutation and timer triggers are held back following
//! the configured [`RetryConfig`](crate::RetryConfig). Every sync runs on the
//! blocking pool; coalescing of overlapping triggers is left to
//! [`SyncEngine::sync`].

use crate::config::RetryConfig;
use crate::endpoint::RemoteEndpoint;
use crate::state::{SyncAttempt, SyncEngine, SyncMode, SyncTrigger};
use std::sync::Arc;
use std::time::Duration;
use tally_protocol::RecordId;
use tally_store::{MutationListener, RecordStore};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Handle to a running auto-sync task.
///
/// Dropping every handle stops the task once its current sync finishes.
#[derive(Debug)]
pub struct SyncHandle {
    tx: mpsc::UnboundedSender<SyncTrigger>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    /// Sends a trigger to the runner. Returns false if it has stopped.
    pub fn trigger(&self, trigger: SyncTrigger) -> bool {
        self.tx.send(trigger).is_ok()
    }

    /// Requests a manual full sync.
    pub fn request_manual(&self) -> bool {
        self.trigger(SyncTrigger::Manual)
    }

    /// Stops the runner and waits for it to finish.
    pub async fn shutdown(self) {
        let Self { tx, task } = self;
        drop(tx);
        if let Err(e) = task.await {
            warn!(error = %e, "auto-sync task ended abnormally");
        }
    }
}

impl MutationListener for SyncHandle {
    fn on_local_mutation(&self, id: &RecordId) {
        debug!(%id, "local mutation; scheduling sync");
        let _ = self.tx.send(SyncTrigger::Mutation);
    }
}

/// Starts the auto-sync runner on the current tokio runtime.
///
/// The timer period and the debounce window are read from the engine's
/// configuration at start. The first timer tick fires one interval after
/// start, not immediately.
pub fn spawn_auto_sync<S, E>(engine: Arc<SyncEngine<S, E>>) -> SyncHandle
where
    S: RecordStore + 'static,
    E: RemoteEndpoint<Record = S::Record> + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run(engine, rx));
    SyncHandle { tx, task }
}

/// Consecutive retryable failures and the hold they impose.
#[derive(Debug)]
struct Backoff {
    retry: RetryConfig,
    failures: u32,
    until: Option<Instant>,
}

impl Backoff {
    fn new(retry: RetryConfig) -> Self {
        Self {
            retry,
            failures: 0,
            until: None,
        }
    }

    /// Returns the end of the current hold, if one is in force.
    fn holding(&self) -> Option<Instant> {
        self.until.filter(|until| *until > Instant::now())
    }

    fn record(&mut self, outcome: CycleOutcome) {
        match outcome {
            CycleOutcome::Succeeded => {
                self.failures = 0;
                self.until = None;
            }
            CycleOutcome::Retryable => {
                self.failures = self.failures.saturating_add(1);
                let delay = self.retry.delay_after(self.failures);
                debug!(failures = self.failures, ?delay, "holding automatic sync");
                self.until = Some(Instant::now() + delay);
            }
            CycleOutcome::Fatal => self.until = None,
            CycleOutcome::NotRun => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleOutcome {
    Succeeded,
    Retryable,
    Fatal,
    NotRun,
}

async fn run<S, E>(engine: Arc<SyncEngine<S, E>>, mut rx: mpsc::UnboundedReceiver<SyncTrigger>)
where
    S: RecordStore + 'static,
    E: RemoteEndpoint<Record = S::Record> + 'static,
{
    let config = engine.config();
    let period = config.sync_interval.max(Duration::from_millis(1));
    let debounce = config.debounce;
    let full_every = config.full_sync_every;

    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut pending_mutation: Option<Instant> = None;
    let mut backoff = Backoff::new(config.retry);
    let mut ticks: u32 = 0;
    let mut calibration_due = false;

    info!(?period, ?debounce, full_every, "auto-sync started");
    loop {
        let deadline = pending_mutation;
        tokio::select! {
            received = rx.recv() => match received {
                Some(SyncTrigger::Mutation) => {
                    pending_mutation = Some(Instant::now() + debounce);
                }
                Some(trigger) => {
                    pending_mutation = None;
                    let outcome = run_sync(&engine, trigger).await;
                    if outcome == CycleOutcome::Succeeded && trigger.mode() == SyncMode::Full {
                        calibration_due = false;
                    }
                    backoff.record(outcome);
                }
                None => break,
            },
            _ = interval.tick() => {
                ticks = ticks.wrapping_add(1);
                if full_every > 0 && ticks % full_every == 0 {
                    calibration_due = true;
                }
                if let Some(until) = backoff.holding() {
                    debug!(?until, "timer tick held after failures");
                    continue;
                }
                let trigger = if calibration_due {
                    SyncTrigger::Calibration
                } else {
                    SyncTrigger::Timer
                };
                let outcome = run_sync(&engine, trigger).await;
                if outcome == CycleOutcome::Succeeded && calibration_due {
                    calibration_due = false;
                }
                backoff.record(outcome);
            }
            _ = sleep_until(deadline), if deadline.is_some() => {
                if let Some(until) = backoff.holding() {
                    debug!(?until, "mutation sync deferred after failures");
                    pending_mutation = Some(until);
                    continue;
                }
                pending_mutation = None;
                let outcome = run_sync(&engine, SyncTrigger::Mutation).await;
                backoff.record(outcome);
            }
        }
    }
    info!("auto-sync stopped");
}

async fn sleep_until(deadline: Option<Instant>) {
    if let Some(deadline) = deadline {
        time::sleep_until(deadline).await;
    }
}

async fn run_sync<S, E>(engine: &Arc<SyncEngine<S, E>>, trigger: SyncTrigger) -> CycleOutcome
where
    S: RecordStore + 'static,
    E: RemoteEndpoint<Record = S::Record> + 'static,
{
    let engine = Arc::clone(engine);
    let outcome = tokio::task::spawn_blocking(move || engine.sync(trigger)).await;
    match outcome {
        Ok(Ok(SyncAttempt::Completed(result))) => {
            debug!(?trigger, version = result.version, "auto-sync cycle done");
            CycleOutcome::Succeeded
        }
        Ok(Ok(SyncAttempt::Coalesced)) => {
            debug!(?trigger, "auto-sync coalesced");
            CycleOutcome::NotRun
        }
        Ok(Ok(SyncAttempt::Skipped(reason))) => {
            debug!(?trigger, ?reason, "auto-sync skipped");
            CycleOutcome::NotRun
        }
        // Already logged and reflected in the engine status.
        Ok(Err(e)) => {
            debug!(?trigger, error = %e, "auto-sync failed");
            if e.is_retryable() {
                CycleOutcome::Retryable
            } else {
                CycleOutcome::Fatal
            }
        }
        Err(e) => {
            warn!(?trigger, error = %e, "auto-sync task panicked");
            CycleOutcome::Fatal
        }
    }
}

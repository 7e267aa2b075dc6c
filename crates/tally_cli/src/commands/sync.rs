//! Sync command implementation.

use super::CliResult;
use serde::Serialize;
use std::time::Duration;
use tally_store::RecordStore;
use tally_sync::{RemoteEndpoint, SyncAttempt, SyncCycleResult, SyncEngine, SyncTrigger};

/// Outcome of one `tally sync` invocation.
#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// `completed`, `coalesced` or `skipped`.
    pub outcome: String,
    /// Why the sync did not run, if it was skipped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped_because: Option<String>,
    /// Cycle details, if a cycle ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycle: Option<CycleSummary>,
}

/// Counters of a completed cycle.
#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CycleSummary {
    /// `incremental` or `full`.
    pub mode: String,
    /// Whether the pull ran.
    pub pulled_remote: bool,
    /// Records received.
    pub pulled: u64,
    /// Remote versions written locally.
    pub applied: u64,
    /// Remote versions discarded by the merge rule.
    pub ignored: Vec<String>,
    /// Remote records skipped as malformed.
    pub invalid: usize,
    /// Records sent.
    pub pushed: u64,
    /// Records the remote accepted.
    pub accepted: u64,
    /// Ids the remote refused.
    pub rejected: Vec<String>,
    /// Last sync version after the cycle.
    pub version: i64,
    /// Wall time in milliseconds.
    pub duration_ms: u128,
}

impl From<&SyncCycleResult> for CycleSummary {
    fn from(result: &SyncCycleResult) -> Self {
        Self {
            mode: format!("{:?}", result.mode).to_lowercase(),
            pulled_remote: result.pulled_remote,
            pulled: result.pulled,
            applied: result.applied,
            ignored: result.ignored.iter().map(|c| c.describe()).collect(),
            invalid: result.invalid.len(),
            pushed: result.pushed,
            accepted: result.accepted,
            rejected: result.rejected.iter().map(ToString::to_string).collect(),
            version: result.version,
            duration_ms: result.duration.as_millis(),
        }
    }
}

/// Fails early when no endpoint is configured.
pub fn ensure_endpoint<S, E>(engine: &SyncEngine<S, E>) -> CliResult<()>
where
    S: RecordStore,
    E: RemoteEndpoint<Record = S::Record>,
{
    if engine.config().endpoint_url.is_empty() {
        return Err("no endpoint configured; pass --config <file.json>".into());
    }
    Ok(())
}

/// Runs the sync command.
pub fn run<S, E>(engine: &SyncEngine<S, E>, full: bool, retry: bool, format: &str) -> CliResult<()>
where
    S: RecordStore,
    E: RemoteEndpoint<Record = S::Record>,
{
    ensure_endpoint(engine)?;
    let report = execute(engine, full, retry)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => {
            print_text_output(&report);
        }
    }

    Ok(())
}

/// Runs one cycle. `full` makes it a manual sync, which always runs.
///
/// An incremental run counts as an automatic trigger and honours the enable
/// switch and auth backoff.
pub fn execute<S, E>(engine: &SyncEngine<S, E>, full: bool, retry: bool) -> CliResult<SyncReport>
where
    S: RecordStore,
    E: RemoteEndpoint<Record = S::Record>,
{
    let trigger = if full {
        SyncTrigger::Manual
    } else {
        SyncTrigger::Timer
    };
    let attempt = if retry {
        engine.sync_with_retry(trigger)?
    } else {
        engine.sync(trigger)?
    };

    Ok(match attempt {
        SyncAttempt::Completed(result) => SyncReport {
            outcome: "completed".into(),
            skipped_because: None,
            cycle: Some(CycleSummary::from(&result)),
        },
        SyncAttempt::Coalesced => SyncReport {
            outcome: "coalesced".into(),
            skipped_because: None,
            cycle: None,
        },
        SyncAttempt::Skipped(reason) => SyncReport {
            outcome: "skipped".into(),
            skipped_because: Some(format!("{reason:?}")),
            cycle: None,
        },
    })
}

fn print_text_output(report: &SyncReport) {
    let Some(cycle) = &report.cycle else {
        match &report.skipped_because {
            Some(reason) => println!("Sync skipped: {reason}"),
            None => println!("Sync {}", report.outcome),
        }
        return;
    };

    println!("Sync completed ({})", cycle.mode);
    if cycle.pulled_remote {
        println!("  Pulled:   {} ({} applied)", cycle.pulled, cycle.applied);
    } else {
        println!("  Pulled:   nothing new on the remote");
    }
    println!("  Pushed:   {} ({} accepted)", cycle.pushed, cycle.accepted);
    println!("  Version:  {}", cycle.version);
    println!(
        "  Duration: {:?}",
        Duration::from_millis(cycle.duration_ms as u64)
    );

    if !cycle.ignored.is_empty() {
        println!();
        println!("Conflicts ({}):", cycle.ignored.len());
        for conflict in &cycle.ignored {
            println!("  {conflict}");
        }
    }
    if cycle.invalid > 0 {
        println!("  {} remote records skipped as malformed", cycle.invalid);
    }
    if !cycle.rejected.is_empty() {
        println!("  Rejected, will retry: {}", cycle.rejected.join(", "));
    }
}

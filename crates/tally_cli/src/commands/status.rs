//! Status command implementation.

use super::{format_millis, CliResult};
use serde::Serialize;
use tally_protocol::SyncableRecord;
use tally_store::RecordStore;
use tally_sync::{RemoteEndpoint, SyncEngine, SyncLogEntry};

/// Sync configuration and progress.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    /// Remote base URL.
    pub endpoint: String,
    /// The configured switch.
    pub cloud_sync_enabled: bool,
    /// Whether mutation and timer triggers would run.
    pub automatic: bool,
    /// Timer period in seconds.
    pub sync_interval_secs: u64,
    /// Pull cursor.
    pub last_sync_version: i64,
    /// Push cursor.
    pub push_watermark: i64,
    /// Ids waiting to be pushed again.
    pub pending_rejects: Vec<String>,
    /// Local records, tombstones included.
    pub records: usize,
    /// Local records not yet pushed.
    pub unpushed: usize,
    /// Most recent log entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_entry: Option<SyncLogEntry>,
}

/// Collects the status of `engine`.
pub fn collect<S, E>(engine: &SyncEngine<S, E>) -> CliResult<StatusReport>
where
    S: RecordStore,
    E: RemoteEndpoint<Record = S::Record>,
{
    let config = engine.config();
    let checkpoint = engine.checkpoint()?;
    let records = engine.store().get_all()?;
    let unpushed = records
        .iter()
        .filter(|r| r.updated_at() > checkpoint.push_watermark)
        .count();

    Ok(StatusReport {
        endpoint: config.endpoint_url.clone(),
        cloud_sync_enabled: config.cloud_sync_enabled,
        automatic: config.automatic_enabled(),
        sync_interval_secs: config.sync_interval.as_secs(),
        last_sync_version: checkpoint.last_sync_version,
        push_watermark: checkpoint.push_watermark,
        pending_rejects: checkpoint
            .pending_rejects
            .iter()
            .map(ToString::to_string)
            .collect(),
        records: records.len(),
        unpushed,
        last_entry: engine.log().recent(1).pop(),
    })
}

/// Runs the status command.
pub fn run<S, E>(engine: &SyncEngine<S, E>, format: &str) -> CliResult<()>
where
    S: RecordStore,
    E: RemoteEndpoint<Record = S::Record>,
{
    let report = collect(engine)?;

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

fn print_text_output(report: &StatusReport) {
    println!("Tally Sync Status");
    println!("=================");
    println!();
    println!(
        "Endpoint:   {}",
        if report.endpoint.is_empty() {
            "(not configured)"
        } else {
            report.endpoint.as_str()
        }
    );
    println!(
        "Automatic:  {} (switch {}, every {}s)",
        if report.automatic { "on" } else { "off" },
        if report.cloud_sync_enabled { "on" } else { "off" },
        report.sync_interval_secs
    );
    println!();
    println!("Progress:");
    println!("  Last sync version: {}", format_millis(report.last_sync_version));
    println!("  Push watermark:    {}", format_millis(report.push_watermark));
    println!("  Local records:     {}", report.records);
    println!("  Not yet pushed:    {}", report.unpushed);
    if !report.pending_rejects.is_empty() {
        println!("  Pending rejects:   {}", report.pending_rejects.join(", "));
    }

    if let Some(entry) = &report.last_entry {
        println!();
        print!("Last entry: ");
        super::log::print_entry(entry);
    }
}

//! Log command implementation.

use super::{format_millis, CliResult, DataDir};
use tally_sync::{JsonlSyncLog, SyncLogEntry, SyncOutcome};

/// Runs the log command.
pub fn run(data: &DataDir, limit: usize, problems: bool, format: &str) -> CliResult<()> {
    let log = JsonlSyncLog::new(data.log_path());
    let entries = select(log.read_all()?, limit, problems);

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        _ => {
            if entries.is_empty() {
                println!("No sync log entries at {}", data.log_path().display());
            }
            for entry in &entries {
                print_entry(entry);
            }
        }
    }

    Ok(())
}

/// Keeps the newest `limit` entries, oldest first.
pub fn select(entries: Vec<SyncLogEntry>, limit: usize, problems: bool) -> Vec<SyncLogEntry> {
    let mut entries: Vec<SyncLogEntry> = entries
        .into_iter()
        .filter(|e| !problems || e.outcome != SyncOutcome::Ok)
        .collect();
    let skip = entries.len().saturating_sub(limit);
    entries.drain(..skip);
    entries
}

/// Prints one entry on a single line.
pub fn print_entry(entry: &SyncLogEntry) {
    println!(
        "{} {:<5} {:<7} {:>5}  {}",
        format_millis(entry.timestamp),
        format!("{:?}", entry.direction).to_lowercase(),
        format!("{:?}", entry.outcome).to_lowercase(),
        entry.record_count,
        entry.message
    );
}

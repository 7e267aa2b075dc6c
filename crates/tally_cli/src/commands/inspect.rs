//! Inspect command implementation.

use super::{format_millis, CliResult, DataDir};
use serde::Serialize;
use std::collections::BTreeMap;
use tally_protocol::{LedgerRecord, SyncableRecord};
use tally_store::{FileStore, RecordStore};
use tally_sync::{CheckpointStore, FileCheckpointStore, SyncCheckpoint};

/// Local store inspection result.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectResult {
    /// Store file.
    pub path: String,
    /// Lines in the store file, superseded versions included.
    pub log_lines: usize,
    /// Live records by kind.
    pub live: BTreeMap<String, usize>,
    /// Tombstones by kind.
    pub tombstones: BTreeMap<String, usize>,
    /// Highest `updatedAt` in the store.
    pub max_version: i64,
    /// Saved sync progress.
    pub checkpoint: SyncCheckpoint,
    /// Records, if requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<Vec<LedgerRecord>>,
}

/// Runs the inspect command.
pub fn run(
    data: &DataDir,
    show_records: bool,
    show_tombstones: bool,
    format: &str,
) -> CliResult<()> {
    let path = data.records_path();
    if !path.exists() {
        return Err(format!("No ledger found at {}", data.root().display()).into());
    }

    let store: FileStore<LedgerRecord> = FileStore::open(&path)?;
    let checkpoint = FileCheckpointStore::new(data.checkpoint_path()).load()?;
    let mut result = summarize(&store.get_all()?, checkpoint);
    result.path = path.display().to_string();
    result.log_lines = store.log_lines();
    if show_records {
        let records = store
            .get_all()?
            .into_iter()
            .filter(|r| show_tombstones || !r.is_deleted())
            .collect();
        result.records = Some(records);
    }

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Counts records by kind and state.
pub fn summarize(records: &[LedgerRecord], checkpoint: SyncCheckpoint) -> InspectResult {
    let mut live = BTreeMap::new();
    let mut tombstones = BTreeMap::new();
    for record in records {
        let counts = if record.is_deleted() {
            &mut tombstones
        } else {
            &mut live
        };
        *counts.entry(record.kind().as_str().to_string()).or_insert(0) += 1;
    }

    InspectResult {
        path: String::new(),
        log_lines: 0,
        live,
        tombstones,
        max_version: records.iter().map(SyncableRecord::updated_at).max().unwrap_or(0),
        checkpoint,
        records: None,
    }
}

fn print_text_output(result: &InspectResult) {
    println!("Tally Ledger Inspection");
    println!("=======================");
    println!();
    println!("Path: {}", result.path);
    println!("Log lines: {}", result.log_lines);
    println!();
    println!("Records:");
    for (kind, count) in &result.live {
        println!("  {kind:<12} {count}");
    }
    let tombstones: usize = result.tombstones.values().sum();
    println!("  Tombstones:  {tombstones}");
    println!("  Max version: {}", format_millis(result.max_version));
    println!();
    println!("Checkpoint:");
    println!(
        "  Last sync version: {}",
        format_millis(result.checkpoint.last_sync_version)
    );
    println!(
        "  Push watermark:    {}",
        format_millis(result.checkpoint.push_watermark)
    );
    println!(
        "  Pending rejects:   {}",
        result.checkpoint.pending_rejects.len()
    );

    if let Some(records) = &result.records {
        println!();
        println!("Records ({}):", records.len());
        for record in records {
            println!(
                "  [{}] {} @ {}{}",
                record.kind().as_str(),
                record.id(),
                record.updated_at(),
                if record.is_deleted() { " (deleted)" } else { "" }
            );
        }
    }
}

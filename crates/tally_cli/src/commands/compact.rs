//! Compact command implementation.

use super::{format_millis, CliResult, LocalEngine};
use tally_protocol::SyncableRecord;
use tally_store::RecordStore;
use tally_sync::{RemoteEndpoint, SyncEngine};

/// Compaction statistics.
#[derive(Debug, PartialEq, Eq)]
pub struct CompactStats {
    /// Newest tombstone timestamp eligible for removal.
    pub horizon: i64,
    /// Tombstones in the store.
    pub tombstones: usize,
    /// Tombstones at or below the horizon.
    pub eligible: usize,
    /// Tombstones removed; `None` on a dry run or while a sync is running.
    pub removed: Option<usize>,
}

/// Runs the compact command.
pub fn run(engine: &LocalEngine, dry_run: bool) -> CliResult<()> {
    println!("Compacting {}", engine.store().path().display());
    if dry_run {
        println!("(dry run - no changes will be made)");
    }
    println!();

    let stats = execute(engine, dry_run)?;

    println!("Compaction Analysis:");
    println!("  Horizon:    {}", format_millis(stats.horizon));
    println!("  Tombstones: {}", stats.tombstones);
    println!("  Eligible:   {}", stats.eligible);

    if dry_run {
        return Ok(());
    }
    match stats.removed {
        Some(removed) => {
            if removed > 0 {
                engine.store().compact()?;
            }
            println!();
            println!("✓ Removed {removed} tombstones");
        }
        None => {
            println!();
            println!("A sync is in progress; try again later");
        }
    }

    Ok(())
}

/// Counts eligible tombstones and, unless `dry_run`, removes them.
pub fn execute<S, E>(engine: &SyncEngine<S, E>, dry_run: bool) -> CliResult<CompactStats>
where
    S: RecordStore,
    E: RemoteEndpoint<Record = S::Record>,
{
    let horizon = engine.tombstone_horizon()?;
    let tombstones: Vec<i64> = engine
        .store()
        .get_all()?
        .iter()
        .filter(|r| r.is_deleted())
        .map(SyncableRecord::updated_at)
        .collect();
    let eligible = tombstones.iter().filter(|&&ts| ts <= horizon).count();

    let removed = if dry_run {
        None
    } else {
        engine.compact_tombstones()?
    };

    Ok(CompactStats {
        horizon,
        tombstones: tombstones.len(),
        eligible,
        removed,
    })
}

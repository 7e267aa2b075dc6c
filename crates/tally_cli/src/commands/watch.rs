//! Watch command implementation.

use super::{sync::ensure_endpoint, CliResult, LocalEngine};
use std::sync::Arc;
use tally_sync::{spawn_auto_sync, SyncTrigger};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

/// Runs the automatic sync loop until Ctrl-C.
///
/// The engine outlives the runtime so that its blocking HTTP client is
/// dropped outside of async context.
pub fn run(engine: LocalEngine, initial_full: bool) -> CliResult<()> {
    ensure_endpoint(&engine)?;
    let config = engine.config();
    if !config.automatic_enabled() && !initial_full {
        return Err(
            "automatic sync is off (cloudSyncEnabled is false or credentials are missing)".into(),
        );
    }

    let engine = Arc::new(engine);
    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(watch(Arc::clone(&engine), initial_full));
    drop(runtime);
    result
}

async fn watch(engine: Arc<LocalEngine>, initial_full: bool) -> CliResult<()> {
    let mut entries = engine.subscribe_log();
    let handle = spawn_auto_sync(Arc::clone(&engine));

    let first = if initial_full {
        SyncTrigger::Manual
    } else {
        SyncTrigger::Timer
    };
    handle.trigger(first);
    info!(
        interval_secs = engine.config().sync_interval.as_secs(),
        "watching for changes; press Ctrl-C to stop"
    );

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let outcome: CliResult<()> = loop {
        tokio::select! {
            entry = entries.recv() => match entry {
                Ok(entry) => super::log::print_entry(&entry),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "log output fell behind"),
                Err(RecvError::Closed) => break Ok(()),
            },
            signal = &mut shutdown => {
                info!("stopping");
                break signal.map_err(Into::into);
            }
        }
    };

    handle.shutdown().await;
    outcome
}

//! Tests for the auto-sync runner.

use std::sync::Arc;
use std::time::Duration;
use tally_protocol::{LedgerRecord, RecordId, SyncableRecord, Transaction};
use tally_store::{LocalWriter, ManualClock, MemoryStore};
use tally_sync::{
    spawn_auto_sync, Credentials, MockCall, MockEndpoint, MockFailure, RetryConfig, SyncConfig,
    SyncEngine, SyncTrigger,
};
use tokio::time::Instant;

type Engine = SyncEngine<MemoryStore<LedgerRecord>, MockEndpoint<LedgerRecord>>;

fn config(interval: Duration, debounce: Duration) -> SyncConfig {
    SyncConfig::new("mock://")
        .with_cloud_sync(true)
        .with_credentials(Credentials::new("token"))
        .with_sync_interval(interval)
        .with_debounce(debounce)
        .with_full_sync_every(0)
}

fn engine(interval: Duration, debounce: Duration) -> Arc<Engine> {
    engine_with(config(interval, debounce))
}

fn engine_with(config: SyncConfig) -> Arc<Engine> {
    Arc::new(SyncEngine::new(
        config,
        Arc::new(MemoryStore::new()),
        MockEndpoint::new(),
    ))
}

fn probes(engine: &Engine) -> usize {
    engine
        .remote()
        .calls()
        .into_iter()
        .filter(|c| *c == MockCall::Probe)
        .count()
}

async fn wait_for(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test(start_paused = true)]
async fn burst_of_mutations_syncs_once() {
    let engine = engine(Duration::from_secs(3600), Duration::from_secs(2));
    let handle = spawn_auto_sync(Arc::clone(&engine));

    for _ in 0..5 {
        assert!(handle.trigger(SyncTrigger::Mutation));
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    // Each edit restarted the quiet period.
    assert_eq!(probes(&engine), 0);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(wait_for(|| probes(&engine) == 1).await);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(probes(&engine), 1);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn timer_triggers_incremental_syncs() {
    let engine = engine(Duration::from_secs(60), Duration::from_secs(2));
    let start = Instant::now();
    let handle = spawn_auto_sync(Arc::clone(&engine));

    tokio::time::sleep_until(start + Duration::from_secs(59)).await;
    assert_eq!(probes(&engine), 0);
    tokio::time::sleep_until(start + Duration::from_secs(121)).await;
    assert_eq!(probes(&engine), 2);
    // Empty remote, nothing new: the pull is skipped every time.
    assert!(engine.remote().pulls().is_empty());

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn every_nth_tick_is_a_full_calibration() {
    let engine = engine_with(
        config(Duration::from_secs(60), Duration::from_secs(2)).with_full_sync_every(3),
    );
    let start = Instant::now();
    let handle = spawn_auto_sync(Arc::clone(&engine));

    tokio::time::sleep_until(start + Duration::from_secs(181)).await;
    assert_eq!(probes(&engine), 3);
    // Only the third tick pulled, from the beginning.
    assert_eq!(engine.remote().pulls(), vec![0]);

    tokio::time::sleep_until(start + Duration::from_secs(361)).await;
    assert_eq!(engine.remote().pulls(), vec![0, 0]);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failures_hold_automatic_triggers() {
    let retry = RetryConfig::new(1)
        .with_initial_delay(Duration::from_secs(100))
        .without_jitter();
    let settings = config(Duration::from_secs(60), Duration::from_secs(2)).with_retry(retry);
    let engine = engine_with(settings);
    engine.remote().fail_on(MockCall::Probe, MockFailure::Network);
    let start = Instant::now();
    let handle = spawn_auto_sync(Arc::clone(&engine));

    // Tick at 60s fails and holds until 160s.
    tokio::time::sleep_until(start + Duration::from_secs(61)).await;
    assert_eq!(probes(&engine), 1);

    // The tick at 120s is held; a mutation waits for the hold to end.
    assert!(handle.trigger(SyncTrigger::Mutation));
    tokio::time::sleep_until(start + Duration::from_secs(159)).await;
    assert_eq!(probes(&engine), 1);

    engine.remote().clear_failure();
    tokio::time::sleep_until(start + Duration::from_secs(161)).await;
    assert_eq!(probes(&engine), 2);

    // Success lifts the hold; the next tick runs on schedule.
    tokio::time::sleep_until(start + Duration::from_secs(181)).await;
    assert_eq!(probes(&engine), 3);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn manual_request_ignores_the_hold() {
    let retry = RetryConfig::new(1)
        .with_initial_delay(Duration::from_secs(600))
        .without_jitter();
    let settings = config(Duration::from_secs(60), Duration::from_secs(2)).with_retry(retry);
    let engine = engine_with(settings);
    engine.remote().fail_on(MockCall::Probe, MockFailure::Timeout);
    let start = Instant::now();
    let handle = spawn_auto_sync(Arc::clone(&engine));

    tokio::time::sleep_until(start + Duration::from_secs(61)).await;
    assert_eq!(probes(&engine), 1);

    engine.remote().clear_failure();
    assert!(handle.request_manual());
    assert!(wait_for(|| probes(&engine) == 2).await);

    // The successful manual sync lifted the hold for the timer too.
    tokio::time::sleep_until(start + Duration::from_secs(121)).await;
    assert_eq!(probes(&engine), 3);

    handle.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn manual_request_runs_full_sync() {
    let engine = engine(Duration::from_secs(3600), Duration::from_secs(60));
    engine.set_cloud_sync_enabled(false);
    let handle = spawn_auto_sync(Arc::clone(&engine));

    // Automatic triggers are ignored while sync is off; manual still runs.
    assert!(handle.trigger(SyncTrigger::Timer));
    assert!(handle.request_manual());

    assert!(wait_for(|| probes(&engine) == 1).await);
    assert_eq!(engine.remote().pulls(), vec![0]);

    handle.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn local_writes_notify_the_runner() {
    let engine = engine(Duration::from_secs(3600), Duration::from_millis(20));
    let handle = Arc::new(spawn_auto_sync(Arc::clone(&engine)));
    let writer = LocalWriter::new(Arc::clone(engine.store()), ManualClock::new(5_000))
        .with_listener(handle.clone());

    writer
        .write(LedgerRecord::from(Transaction {
            id: RecordId::from("coffee"),
            amount: -350,
            ..Default::default()
        }))
        .unwrap();

    assert!(wait_for(|| engine.remote().records().len() == 1).await);
    let pushed = &engine.remote().records()[0];
    assert_eq!(pushed.id().as_str(), "coffee");
    assert_eq!(pushed.updated_at(), 5_000);
}

#[tokio::test]
async fn shutdown_stops_the_runner() {
    let engine = engine(Duration::from_secs(3600), Duration::from_secs(60));
    let handle = spawn_auto_sync(Arc::clone(&engine));

    tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
        .await
        .unwrap();
    assert!(engine.remote().calls().is_empty());
}

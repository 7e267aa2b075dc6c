//! Integration tests for the sync engine against a mock remote.

use std::sync::Arc;
use std::time::Duration;
use tally_protocol::{LedgerRecord, RecordId, SyncableRecord, Timestamp, Transaction};
use tally_store::{FileStore, LocalWriter, ManualClock, MemoryStore, RecordStore};
use tally_sync::{
    Credentials, FileCheckpointStore, JsonlSyncLog, MockCall, MockEndpoint, MockFailure,
    RetryConfig, SyncCheckpoint, SyncConfig, SyncDirection, SyncEngine, SyncError,
    SyncMode, SyncOutcome, SyncStatus, SyncTrigger,
};
use tempfile::tempdir;

fn txn(id: &str, updated_at: Timestamp, deleted: bool, amount: i64) -> LedgerRecord {
    LedgerRecord::from(Transaction {
        id: RecordId::from(id),
        updated_at,
        is_deleted: deleted,
        amount,
        ..Default::default()
    })
}

fn config() -> SyncConfig {
    SyncConfig::new("mock://")
        .with_cloud_sync(true)
        .with_credentials(Credentials::new("account-token"))
}

type Engine = SyncEngine<MemoryStore<LedgerRecord>, MockEndpoint<LedgerRecord>>;

fn engine_with(local: Vec<LedgerRecord>, remote: Vec<LedgerRecord>) -> Engine {
    SyncEngine::new(
        config(),
        Arc::new(MemoryStore::with_records(local)),
        MockEndpoint::with_records(remote),
    )
}

fn local(engine: &Engine, id: &str) -> LedgerRecord {
    engine.store().get(&RecordId::from(id)).unwrap().unwrap()
}

#[test]
fn newer_remote_tombstone_deletes_local_record() {
    let engine = engine_with(vec![txn("1", 100, false, 50)], vec![txn("1", 150, true, 50)]);

    engine.sync(SyncTrigger::Timer).unwrap();

    let merged = local(&engine, "1");
    assert!(merged.is_deleted());
    assert_eq!(merged.updated_at(), 150);
    // Nothing to send back: the remote already holds the tombstone.
    assert!(engine.remote().pushes().is_empty());
}

#[test]
fn older_remote_keeps_local_and_pushes_it() {
    let engine = SyncEngine::new(
        config(),
        Arc::new(MemoryStore::with_records(vec![txn("2", 200, false, 10)])),
        MockEndpoint::with_records(vec![txn("2", 150, false, 99)]),
    )
    .with_checkpoint_store(Arc::new(tally_sync::MemoryCheckpointStore::with_checkpoint(
        SyncCheckpoint {
            last_sync_version: 100,
            push_watermark: 100,
            pending_rejects: Vec::new(),
        },
    )));

    let attempt = engine.sync(SyncTrigger::Timer).unwrap();
    let result = attempt.completed().unwrap();

    assert_eq!(result.ignored.len(), 1);
    assert_eq!(local(&engine, "2").updated_at(), 200);
    assert_eq!(engine.remote().pulls(), vec![100]);
    assert_eq!(engine.remote().pushes(), vec![vec![txn("2", 200, false, 10)]]);
    assert_eq!(engine.remote().records(), vec![txn("2", 200, false, 10)]);

    let discarded: Vec<_> = engine
        .log()
        .recent(10)
        .into_iter()
        .filter(|e| e.message.contains("discarded"))
        .collect();
    assert_eq!(discarded.len(), 1);
}

#[test]
fn manual_sync_reconciles_full_dataset() {
    // 500 remote records; 300 overlap with local, 50 are local-only.
    let mut remote = Vec::new();
    let mut local_records = Vec::new();
    for i in 0..500 {
        let id = format!("r{i:03}");
        remote.push(txn(&id, 1_000 + i, false, i));
        if i < 300 {
            // Even ids are newer locally, odd ids older.
            let local_ts = if i % 2 == 0 { 2_000 + i } else { 500 + i };
            local_records.push(txn(&id, local_ts, false, -i));
        }
    }
    for i in 0..50 {
        local_records.push(txn(&format!("l{i:02}"), 3_000 + i, false, i));
    }

    local_records.push(txn("warm", 10, false, 0));
    let engine = engine_with(local_records, remote);
    let attempt = engine.sync(SyncTrigger::Manual).unwrap();
    let result = attempt.completed().unwrap();

    assert_eq!(result.mode, SyncMode::Full);
    assert_eq!(engine.remote().pulls(), vec![0]);
    assert_eq!(engine.store().len().unwrap(), 551);

    let mut local_all = engine.store().get_all().unwrap();
    let mut remote_all = engine.remote().records();
    local_all.sort_by(|a, b| a.id().cmp(b.id()));
    remote_all.sort_by(|a, b| a.id().cmp(b.id()));
    assert_eq!(local_all, remote_all);

    assert_eq!(local(&engine, "r000").updated_at(), 2_000);
    assert_eq!(local(&engine, "r001").updated_at(), 1_001);
    assert_eq!(local(&engine, "r400").updated_at(), 1_400);
}

#[test]
fn rejected_record_is_retried_next_cycle() {
    let engine = engine_with(
        vec![txn("3", 100, false, 1), txn("5", 120, false, 1)],
        Vec::new(),
    );
    engine.remote().reject_ids(vec![RecordId::from("3")]);

    let first = engine.sync(SyncTrigger::Timer).unwrap();
    assert_eq!(first.completed().unwrap().rejected, vec![RecordId::from("3")]);

    let last = engine.log().recent(1).pop().unwrap();
    assert_eq!(last.direction, SyncDirection::Push);
    assert_eq!(last.outcome, SyncOutcome::Partial);
    assert!(last.message.contains('3'));

    // Still rejected: keeps coming back.
    engine.sync(SyncTrigger::Timer).unwrap();
    assert_eq!(engine.remote().pushes()[1], vec![txn("3", 100, false, 1)]);

    engine.remote().reject_ids(Vec::new());
    engine.sync(SyncTrigger::Timer).unwrap();
    assert!(engine
        .remote()
        .records()
        .iter()
        .any(|r| r.id().as_str() == "3"));
    assert!(engine.checkpoint().unwrap().pending_rejects.is_empty());
}

#[test]
fn watermark_never_decreases() {
    let engine = engine_with(vec![txn("a", 100, false, 1)], vec![txn("b", 300, false, 1)]);
    let mut versions = Vec::new();

    engine.sync(SyncTrigger::Timer).unwrap();
    versions.push(engine.checkpoint().unwrap().last_sync_version);

    engine.remote().fail_on(MockCall::Push, MockFailure::Network);
    engine.store().upsert(txn("c", 400, false, 1)).unwrap();
    engine.sync(SyncTrigger::Timer).unwrap_err();
    versions.push(engine.checkpoint().unwrap().last_sync_version);

    engine.remote().fail_on(MockCall::Probe, MockFailure::Timeout);
    engine.sync(SyncTrigger::Manual).unwrap_err();
    versions.push(engine.checkpoint().unwrap().last_sync_version);

    engine.remote().clear_failure();
    engine.sync(SyncTrigger::Manual).unwrap();
    versions.push(engine.checkpoint().unwrap().last_sync_version);

    assert_eq!(versions, vec![300, 300, 300, 400]);
}

#[test]
fn local_writes_during_sync_are_picked_up_next_cycle() {
    let clock = Arc::new(ManualClock::new(1_000));
    let store = Arc::new(MemoryStore::<LedgerRecord>::new());
    let writer = Arc::new(LocalWriter::new(Arc::clone(&store), Arc::clone(&clock)));
    writer.write(txn("first", 0, false, 1)).unwrap();

    let engine = SyncEngine::new(config(), Arc::clone(&store), MockEndpoint::new());
    let during = Arc::clone(&writer);
    let tick = Arc::clone(&clock);
    engine.remote().set_hook(move |call| {
        if call == MockCall::Push {
            tick.advance(10);
            let _ = during.write(txn("during", 0, false, 2));
        }
    });

    engine.sync(SyncTrigger::Timer).unwrap();
    assert_eq!(engine.remote().records().len(), 1);

    engine.sync(SyncTrigger::Timer).unwrap();
    let ids: Vec<_> = engine
        .remote()
        .records()
        .iter()
        .map(|r| r.id().to_string())
        .collect();
    assert!(ids.contains(&"during".to_string()));
}

#[test]
fn transient_failures_are_retried() {
    let engine = SyncEngine::new(
        config().with_retry(
            RetryConfig::new(3)
                .with_initial_delay(Duration::from_millis(1))
                .without_jitter(),
        ),
        Arc::new(MemoryStore::with_records(vec![txn("a", 10, false, 1)])),
        MockEndpoint::new(),
    );
    let engine = Arc::new(engine);
    let calls = Arc::new(parking_lot::Mutex::new(0u32));
    let counter = Arc::clone(&calls);
    let weak = Arc::downgrade(&engine);
    engine.remote().set_hook(move |call| {
        if call == MockCall::Probe {
            let mut n = counter.lock();
            *n += 1;
            if let Some(engine) = weak.upgrade() {
                if *n == 1 {
                    engine.remote().fail_on(MockCall::Probe, MockFailure::Network);
                } else {
                    engine.remote().clear_failure();
                }
            }
        }
    });

    let attempt = engine.sync_with_retry(SyncTrigger::Timer).unwrap();
    assert!(attempt.completed().is_some());
    assert_eq!(engine.stats().retries, 1);
    assert_eq!(engine.stats().failures, 1);
    assert_eq!(engine.status(), SyncStatus::Idle);
}

#[test]
fn auth_errors_are_not_retried() {
    let engine = engine_with(Vec::new(), Vec::new());
    engine.remote().fail_on(MockCall::Probe, MockFailure::Auth);

    let err = engine.sync_with_retry(SyncTrigger::Manual).unwrap_err();
    assert!(matches!(err, SyncError::Auth(_)));
    assert_eq!(engine.stats().retries, 0);
}

#[test]
fn file_backed_state_survives_restart() {
    let dir = tempdir().unwrap();
    let store_path = dir.path().join("records.jsonl");
    let checkpoint_path = dir.path().join("checkpoint.json");
    let log_path = dir.path().join("sync-log.jsonl");

    let remote = MockEndpoint::with_records(vec![txn("remote", 200, false, 5)]);
    {
        let store = Arc::new(FileStore::open(&store_path).unwrap());
        store.upsert(txn("local", 100, false, 1)).unwrap();
        let engine = SyncEngine::new(config(), store, remote)
            .with_checkpoint_store(Arc::new(FileCheckpointStore::new(&checkpoint_path)))
            .with_log(Arc::new(JsonlSyncLog::new(&log_path)));
        engine.sync(SyncTrigger::Timer).unwrap();
    }

    let store: FileStore<LedgerRecord> = FileStore::open(&store_path).unwrap();
    assert_eq!(store.len().unwrap(), 2);

    let checkpoint = FileCheckpointStore::new(&checkpoint_path);
    let saved = tally_sync::CheckpointStore::load(&checkpoint).unwrap();
    assert_eq!(saved.last_sync_version, 200);
    assert_eq!(saved.push_watermark, 100);

    let entries = JsonlSyncLog::new(&log_path).read_all().unwrap();
    let directions: Vec<_> = entries.iter().map(|e| e.direction).collect();
    assert_eq!(
        directions,
        vec![SyncDirection::Probe, SyncDirection::Pull, SyncDirection::Push]
    );
}

#[test]
fn concurrent_triggers_run_one_cycle_at_a_time() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    let engine = Arc::new(engine_with(vec![txn("a", 10, false, 1)], Vec::new()));
    let in_flight = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));
    let (entered_tx, entered_rx) = mpsc::channel::<()>();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let release_rx = parking_lot::Mutex::new(release_rx);
    let entered_tx = parking_lot::Mutex::new(entered_tx);

    {
        let in_flight = Arc::clone(&in_flight);
        let max_seen = Arc::clone(&max_seen);
        engine.remote().set_hook(move |call| match call {
            MockCall::Probe => {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                let _ = entered_tx.lock().send(());
                let _ = release_rx.lock().recv_timeout(Duration::from_secs(5));
            }
            MockCall::Push => {
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }
            MockCall::Pull => {}
        });
    }

    let runner = {
        let engine = Arc::clone(&engine);
        std::thread::spawn(move || engine.sync(SyncTrigger::Timer).unwrap())
    };
    entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    // Both arrive while the first cycle is blocked inside probe.
    engine.store().upsert(txn("b", 20, false, 1)).unwrap();
    assert!(matches!(
        engine.sync(SyncTrigger::Mutation).unwrap(),
        tally_sync::SyncAttempt::Coalesced
    ));
    assert!(matches!(
        engine.sync(SyncTrigger::Timer).unwrap(),
        tally_sync::SyncAttempt::Coalesced
    ));

    release_tx.send(()).unwrap();
    entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    release_tx.send(()).unwrap();
    runner.join().unwrap();

    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    let probes = engine
        .remote()
        .calls()
        .into_iter()
        .filter(|c| *c == MockCall::Probe)
        .count();
    assert_eq!(probes, 2);
    assert_eq!(engine.remote().records().len(), 2);
}

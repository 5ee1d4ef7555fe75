//! Cross-component scenarios (SPEC_FULL.md §8) run against a full `Engine`
//! over `tempfile::tempdir()`-backed fixtures, so no test touches a shared
//! filesystem location.

use shard_core::{DeleteOp, IndexOp, OpMeta, OpenMode, Origin, Uid, VersionType, MATCH_ANY};
use shard_engine::{Engine, EngineConfig};
use shard_segment_store::{InMemorySegmentWriter, SearcherManager, SegmentWriter};
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

fn open_engine() -> (Engine, TempDir) {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemorySegmentWriter::new());
    let store_dyn: Arc<dyn SegmentWriter> = store.clone();
    let searcher = Arc::new(SearcherManager::new(store));
    let engine = Engine::open(
        OpenMode::CreateIndexAndTranslog,
        dir.path().join("translog"),
        EngineConfig::default(),
        store_dyn,
        searcher,
    )
    .unwrap();
    (engine, dir)
}

fn index_op(uid: &str, origin: Origin, version: i64, auto_gen_ts: Option<i64>, is_retry: bool, seq: u64) -> IndexOp {
    IndexOp {
        meta: OpMeta {
            uid: Uid::from_str(uid),
            version,
            version_type: VersionType::Internal,
            origin,
            start_time_nanos: seq,
        },
        doc: b"{\"f\":1}".to_vec(),
        auto_generated_id_timestamp: auto_gen_ts,
        is_retry,
    }
}

/// Scenario 1: fresh create, index version 1.
#[test]
fn fresh_create_index_version_one() {
    let (engine, _dir) = open_engine();
    let result = engine
        .index(index_op("A", Origin::Primary, MATCH_ANY, Some(1000), false, 1))
        .unwrap();

    assert_eq!(result.version, 1);
    assert!(result.created);

    let fetched = engine.get(&Uid::from_str("A"), true, None).unwrap();
    assert_eq!(fetched, Some(b"{\"f\":1}".to_vec()));
}

/// Scenario 2: retry after disconnect.
#[test]
fn retry_after_disconnect_does_not_create_a_second_version() {
    let (engine, _dir) = open_engine();
    engine
        .index(index_op("A", Origin::Primary, MATCH_ANY, Some(1000), false, 1))
        .unwrap();

    let retry = engine
        .index(index_op("A", Origin::Primary, MATCH_ANY, Some(1000), true, 2))
        .unwrap();

    assert_eq!(retry.version, 1);
    assert!(!retry.created);
}

/// Scenario 3: out-of-order replica delete.
#[test]
fn out_of_order_replica_delete_keeps_the_higher_version() {
    let (engine, _dir) = open_engine();

    let d1 = DeleteOp {
        meta: OpMeta {
            uid: Uid::from_str("B"),
            version: 3,
            version_type: VersionType::External,
            origin: Origin::Replica,
            start_time_nanos: 1,
        },
    };
    engine.delete(d1).unwrap();

    let d2 = DeleteOp {
        meta: OpMeta {
            uid: Uid::from_str("B"),
            version: 2,
            version_type: VersionType::External,
            origin: Origin::Replica,
            start_time_nanos: 2,
        },
    };
    let result = engine.delete(d2).unwrap();
    assert_eq!(result.version, 2);

    // Realtime get must see a tombstone recorded at the higher version.
    let fetched = engine.get(&Uid::from_str("B"), true, None).unwrap();
    assert_eq!(fetched, None);
}

/// Scenario 4: sync-commit mismatch.
#[test]
fn sync_commit_mismatch_writes_nothing() {
    let (engine, _dir) = open_engine();
    engine
        .index(index_op("A", Origin::Primary, MATCH_ANY, Some(1), false, 1))
        .unwrap();

    let c1 = engine.flush(true, true).unwrap();
    let result = engine.sync_flush("s1", c1 + 1).unwrap();
    assert_eq!(result, shard_engine::SyncedFlushResult::CommitMismatch);
    assert_eq!(engine.acquire_index_commit(false).unwrap(), c1);
}

/// Scenario 5: crash after segments commit, before translog commit — the
/// op must be present exactly once on reopen.
#[test]
fn reopen_after_crash_replays_exactly_once() {
    let dir = TempDir::new().unwrap();
    let translog_dir = dir.path().join("translog");

    {
        let store = Arc::new(InMemorySegmentWriter::new());
        let store_dyn: Arc<dyn SegmentWriter> = store.clone();
        let searcher = Arc::new(SearcherManager::new(store));
        let engine = Engine::open(
            OpenMode::CreateIndexAndTranslog,
            &translog_dir,
            EngineConfig::default(),
            store_dyn,
            searcher,
        )
        .unwrap();
        engine
            .index(index_op("A", Origin::Primary, MATCH_ANY, Some(1), false, 1))
            .unwrap();
        // No flush: the translog record survives, nothing has been
        // committed to the segment store's userData sidecar.
        engine.close();
    }

    let store = Arc::new(InMemorySegmentWriter::new());
    let store_dyn: Arc<dyn SegmentWriter> = store.clone();
    let searcher = Arc::new(SearcherManager::new(store));
    let engine = Engine::open(
        OpenMode::OpenIndexAndTranslog,
        &translog_dir,
        EngineConfig::default(),
        store_dyn,
        searcher,
    )
    .unwrap();

    let fetched = engine.get(&Uid::from_str("A"), true, None).unwrap();
    assert_eq!(fetched, Some(b"{\"f\":1}".to_vec()));
}

/// Scenario 6: version-map refresh on memory pressure.
#[test]
fn write_indexing_buffer_refreshes_under_memory_pressure() {
    let (engine, _dir) = open_engine();
    for i in 0..200 {
        engine
            .index(index_op(&format!("doc-{i}"), Origin::Primary, MATCH_ANY, Some(1), false, i))
            .unwrap();
    }

    let before = engine.get_index_buffer_ram_bytes_used();
    // A tiny declared writer-buffer budget makes the version map's refresh
    // share look oversized, forcing the refresh branch over the cheap-flush
    // branch, which drains the version map's current/old tiers.
    engine.write_indexing_buffer().unwrap();
    let after = engine.get_index_buffer_ram_bytes_used();
    assert!(after < before);
}

/// Multi-threaded per-uid ordering: concurrent primary writers to the same
/// uid must still leave the version map with a single, consistent final
/// version no lower than any individual successful write (invariant 1).
#[test]
fn concurrent_writes_to_one_uid_are_serialized_by_the_striped_lock() {
    let (engine, _dir) = open_engine();
    let engine = Arc::new(engine);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                engine
                    .index(index_op("shared", Origin::Primary, MATCH_ANY, None, false, i))
                    .unwrap()
            })
        })
        .collect();

    let mut versions: Vec<i64> = handles.into_iter().map(|h| h.join().unwrap().version).collect();
    versions.sort_unstable();
    // Eight writers under MATCH_ANY each bump the internal version by one.
    assert_eq!(versions, vec![1, 2, 3, 4, 5, 6, 7, 8]);

    let fetched = engine.get(&Uid::from_str("shared"), true, None).unwrap();
    assert!(fetched.is_some());
}

/// Throttle balance: merges past the configured limit throttle indexing
/// through the same gate `index()` checks (the shared-`Arc<ThrottleGate>`
/// wiring between `WritePath` and `MergeScheduler`).
#[test]
fn merge_backpressure_is_visible_to_indexing() {
    let (engine, _dir) = open_engine();
    assert!(!engine.is_throttled());

    for _ in 0..(engine.config().max_merge_count + 1) {
        engine.before_merge();
    }
    assert!(engine.is_throttled());

    engine
        .index(index_op("A", Origin::Primary, MATCH_ANY, None, false, 1))
        .unwrap();

    for _ in 0..(engine.config().max_merge_count + 1) {
        engine.after_merge();
    }
    assert!(!engine.is_throttled());
}

//! Recovery Driver (§4.4): replays the translog at startup into the write
//! path with `Origin::LocalTranslogRecovery`.
//!
//! Grounded on the dependency graph's own startup-replay routines for its
//! WAL-backed stores (sequential snapshot iteration, summary log line on
//! completion).

use crate::commit::CommitCoordinator;
use crate::write_path::WritePath;
use shard_core::{DeleteOp, EngineResult, IndexOp, OpMeta, Origin, VersionType};
use shard_translog::{RecordKind, Translog};
use std::sync::Arc;
use tracing::{info, warn};

pub struct RecoverySummary {
    pub ops_replayed: u64,
    pub from_generation: u64,
    pub to_generation: u64,
}

/// §4.4: runs exactly once per engine lifetime, iff opened with
/// `OpenMode::OpenIndexAndTranslog`.
pub fn recover(
    translog: &Arc<Translog>,
    write_path: &WritePath,
    commit: &CommitCoordinator,
    from_generation: u64,
) -> EngineResult<RecoverySummary> {
    let snapshot = translog.new_snapshot(from_generation)?;

    let mut ops_replayed = 0u64;
    for (location, record) in snapshot {
        let meta = OpMeta {
            uid: shard_core::Uid::new(record.uid.clone()),
            version: record.version,
            version_type: VersionType::Force,
            origin: Origin::LocalTranslogRecovery,
            start_time_nanos: record.seq_no,
        };

        let outcome = match record.kind {
            RecordKind::Index => write_path
                .index(IndexOp {
                    meta,
                    doc: record.source_doc.clone().unwrap_or_default(),
                    auto_generated_id_timestamp: None,
                    is_retry: false,
                })
                .map(|_| ()),
            RecordKind::Delete => write_path.delete(DeleteOp { meta }).map(|_| ()),
        };

        match outcome {
            Ok(()) => ops_replayed += 1,
            Err(e) if e.is_tragic() => return Err(e),
            Err(e) => {
                warn!(
                    generation = location.generation,
                    offset = location.offset,
                    error = %e,
                    "translog replay op failed, continuing"
                );
            }
        }
    }

    commit.set_pending_translog_recovery(false);

    let to_generation = translog.current_file_generation();
    if ops_replayed > 0 {
        commit.flush(true, true)?;
    } else if to_generation != from_generation {
        // Re-commit userData only: no document changes, but the generation
        // pointer has moved since the last commit.
        commit.flush(true, true)?;
    }

    info!(
        ops_replayed,
        from_generation, to_generation, "translog recovery complete"
    );

    Ok(RecoverySummary {
        ops_replayed,
        from_generation,
        to_generation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version_map::LiveVersionMap;
    use shard_core::Uid;
    use shard_segment_store::{InMemorySegmentWriter, SearcherManager, SegmentWriter};
    use shard_translog::{TranslogConfig, TranslogRecord};
    use tempfile::tempdir;

    #[test]
    fn replays_translog_and_clears_pending_flag() {
        let dir = tempdir().unwrap();
        let translog = Arc::new(Translog::open(dir.path(), TranslogConfig::default()).unwrap());
        translog
            .add(&TranslogRecord::index(b"a".to_vec(), 1, b"{}".to_vec(), 1))
            .unwrap();
        translog
            .add(&TranslogRecord::delete(b"b".to_vec(), 1, 2))
            .unwrap();

        let store: Arc<InMemorySegmentWriter> = Arc::new(InMemorySegmentWriter::new());
        let store_dyn: Arc<dyn SegmentWriter> = store.clone();
        let vmap = Arc::new(LiveVersionMap::new());
        let write_path = Arc::new(WritePath::new(store_dyn.clone(), translog.clone(), vmap.clone(), 16, 60_000));
        let searcher = Arc::new(SearcherManager::new(store));
        let commit = CommitCoordinator::new(store_dyn, translog.clone(), vmap, searcher, Arc::clone(&write_path), true);

        let summary = recover(&translog, &write_path, &commit, 1).unwrap();
        assert_eq!(summary.ops_replayed, 2);
        assert!(!commit.is_pending_translog_recovery());
        assert!(vmap.get(&Uid::from_str("a")).is_some());
    }

    #[test]
    fn no_ops_but_generation_mismatch_still_recommits() {
        let dir = tempdir().unwrap();
        let translog = Arc::new(Translog::open(dir.path(), TranslogConfig::default()).unwrap());
        let store: Arc<InMemorySegmentWriter> = Arc::new(InMemorySegmentWriter::new());
        let store_dyn: Arc<dyn SegmentWriter> = store.clone();
        let vmap = Arc::new(LiveVersionMap::new());
        let write_path = Arc::new(WritePath::new(store_dyn.clone(), translog.clone(), vmap.clone(), 16, 60_000));
        let searcher = Arc::new(SearcherManager::new(store));
        let commit = CommitCoordinator::new(store_dyn, translog.clone(), vmap, searcher, Arc::clone(&write_path), true);

        let summary = recover(&translog, &write_path, &commit, 0).unwrap();
        assert_eq!(summary.ops_replayed, 0);
        assert!(!commit.is_pending_translog_recovery());
    }
}

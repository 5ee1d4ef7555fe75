//! Commit / Flush Coordinator (§4.3): drives segment commits, sync-commit
//! renewal, and translog truncation, enforcing the crash-safe ordering
//! `prepareCommit → commit(segment store) → refresh → commit(translog)`.
//!
//! Grounded on the dependency graph's own durability-barrier pattern in
//! `durability/src/wal/writer.rs` (fsync-then-truncate), generalized here to
//! the two-store (segment store + translog) coordination §4.3 requires.

use crate::version_map::LiveVersionMap;
use crate::write_path::WritePath;
use parking_lot::Mutex;
use shard_core::{EngineError, EngineResult};
use shard_segment_store::{CommitData, SearcherManager, SegmentWriter};
use shard_translog::Translog;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncedFlushResult {
    Success,
    PendingOperations,
    CommitMismatch,
}

/// §4.3: the flush/optimize coordination surface. Does not own the write
/// path directly — `Engine` wires this against the same segment store,
/// translog, and version map the write path uses.
pub struct CommitCoordinator {
    segment_store: Arc<dyn SegmentWriter>,
    translog: Arc<Translog>,
    version_map: Arc<LiveVersionMap>,
    searcher_manager: Arc<SearcherManager>,
    write_path: Arc<WritePath>,
    flush_mutex: Mutex<()>,
    force_merge_mutex: Mutex<()>,
    /// §4.4: while true, any flush/sync-commit attempt is a fatal
    /// precondition violation.
    pending_translog_recovery: AtomicBool,
    last_commit_generation: AtomicU64,
    sync_commit_id: parking_lot::RwLock<Option<String>>,
}

impl CommitCoordinator {
    pub fn new(
        segment_store: Arc<dyn SegmentWriter>,
        translog: Arc<Translog>,
        version_map: Arc<LiveVersionMap>,
        searcher_manager: Arc<SearcherManager>,
        write_path: Arc<WritePath>,
        pending_translog_recovery: bool,
    ) -> Self {
        CommitCoordinator {
            segment_store,
            translog,
            version_map,
            searcher_manager,
            write_path,
            flush_mutex: Mutex::new(()),
            force_merge_mutex: Mutex::new(()),
            pending_translog_recovery: AtomicBool::new(pending_translog_recovery),
            last_commit_generation: AtomicU64::new(0),
            sync_commit_id: parking_lot::RwLock::new(None),
        }
    }

    pub fn set_pending_translog_recovery(&self, pending: bool) {
        self.pending_translog_recovery.store(pending, Ordering::Release);
    }

    pub fn is_pending_translog_recovery(&self) -> bool {
        self.pending_translog_recovery.load(Ordering::Acquire)
    }

    fn check_not_pending_recovery(&self) -> EngineResult<()> {
        if self.is_pending_translog_recovery() {
            return Err(EngineError::invalid_operation(
                "flush/sync-commit attempted while translog recovery is pending",
            ));
        }
        Ok(())
    }

    /// §4.3 `flush(force, waitIfOngoing)`. Returns the commit's translog
    /// generation as a stand-in "commit id".
    pub fn flush(&self, force: bool, wait_if_ongoing: bool) -> EngineResult<u64> {
        self.check_not_pending_recovery()?;

        let _guard = if wait_if_ongoing {
            self.flush_mutex.lock()
        } else {
            match self.flush_mutex.try_lock() {
                Some(g) => g,
                None => return Ok(self.last_commit_generation.load(Ordering::Acquire)),
            }
        };

        if !self.segment_store.has_uncommitted_changes() && !force {
            return Ok(self.last_commit_generation.load(Ordering::Acquire));
        }

        self.do_commit(None)
    }

    fn do_commit(&self, sync_commit_id: Option<String>) -> EngineResult<u64> {
        // Step 1: roll the translog, marking the prior generation for
        // reclamation once the translog itself commits.
        self.translog.prepare_commit()?;

        let mut commit_data = CommitData::new(
            self.translog.generation_uuid().to_string(),
            self.translog.current_file_generation(),
        );
        if let Some(id) = &sync_commit_id {
            commit_data = commit_data.with_sync_commit_id(id.clone());
        }
        let watermark = self.write_path.max_unsafe_auto_id_timestamp();
        if watermark >= 0 {
            commit_data = commit_data.with_max_unsafe_auto_id_timestamp(watermark);
        }

        // Step 2: commit the segment store.
        if let Err(e) = self.segment_store.commit(commit_data.to_user_data()) {
            if let Some(tragic) = self.segment_store.tragic_exception() {
                return Err(EngineError::tragic_with_source(tragic, e));
            }
            return Err(EngineError::flush_failed(e.to_string()));
        }

        // Step 3: refresh — makes the new commit visible AND releases the
        // version map's `old` tier.
        self.version_map.before_refresh();
        self.searcher_manager.force_refresh("version_table_flush");
        self.version_map.after_refresh();

        // Step 4: only now may old translog files be reclaimed.
        self.translog.commit()?;

        let generation = self.translog.current_file_generation();
        self.last_commit_generation.store(generation, Ordering::Release);
        if let Some(id) = sync_commit_id {
            *self.sync_commit_id.write() = Some(id);
        }

        info!(generation, "flush committed");
        Ok(generation)
    }

    /// §4.3 `syncFlush`: a zero-cost "this shard is quiescent" marker.
    pub fn sync_flush(&self, sync_id: &str, expected_commit_id: u64) -> EngineResult<SyncedFlushResult> {
        self.check_not_pending_recovery()?;

        let _guard = self.flush_mutex.lock();

        if self.segment_store.has_uncommitted_changes() {
            return Ok(SyncedFlushResult::PendingOperations);
        }
        if self.last_commit_generation.load(Ordering::Acquire) != expected_commit_id {
            return Ok(SyncedFlushResult::CommitMismatch);
        }

        // Re-check under the stronger guarantee before committing.
        if self.segment_store.has_uncommitted_changes() {
            return Ok(SyncedFlushResult::PendingOperations);
        }
        if self.last_commit_generation.load(Ordering::Acquire) != expected_commit_id {
            return Ok(SyncedFlushResult::CommitMismatch);
        }

        self.do_commit(Some(sync_id.to_string()))?;
        Ok(SyncedFlushResult::Success)
    }

    /// §4.3 `tryRenewSyncCommit`: re-commit with the existing sync id without
    /// a full flush, when the translog is empty and only segment-level
    /// bookkeeping has changed.
    pub fn try_renew_sync_commit(&self) -> EngineResult<bool> {
        self.check_not_pending_recovery()?;
        let _guard = self.flush_mutex.lock();

        let sync_id = match self.sync_commit_id.read().clone() {
            Some(id) => id,
            None => return Ok(false),
        };
        if !self.segment_store.has_uncommitted_changes() {
            return Ok(false);
        }

        self.do_commit(Some(sync_id))?;
        self.searcher_manager.maybe_refresh("try_renew_sync_commit");
        Ok(true)
    }

    /// §4.3 `forceMerge`: serialized by its own mutex, never the flush mutex.
    pub fn force_merge(&self, max_segments: Option<usize>, flush_after: bool) -> EngineResult<()> {
        let _guard = self.force_merge_mutex.lock();
        if let Err(e) = self.segment_store.force_merge(max_segments) {
            if let Some(tragic) = self.segment_store.tragic_exception() {
                return Err(EngineError::tragic_with_source(tragic, e));
            }
            return Err(EngineError::flush_failed(e.to_string()));
        }
        if flush_after {
            if !self.try_renew_sync_commit()? {
                self.flush(true, true)?;
            }
        }
        Ok(())
    }

    pub fn last_commit_generation(&self) -> u64 {
        self.last_commit_generation.load(Ordering::Acquire)
    }

    pub fn warn_if_recovery_pending(&self) {
        if self.is_pending_translog_recovery() {
            warn!("flush/sync-commit blocked: translog recovery still pending");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shard_segment_store::InMemorySegmentWriter;
    use shard_translog::TranslogConfig;
    use tempfile::tempdir;

    fn coordinator() -> (CommitCoordinator, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = Arc::new(InMemorySegmentWriter::new());
        let store_dyn: Arc<dyn SegmentWriter> = store.clone();
        let translog = Arc::new(Translog::open(dir.path(), TranslogConfig::default()).unwrap());
        let vmap = Arc::new(LiveVersionMap::new());
        let write_path = Arc::new(WritePath::new(
            store_dyn.clone(),
            translog.clone(),
            vmap.clone(),
            16,
            60_000,
        ));
        let searcher = Arc::new(SearcherManager::new(store));
        (
            CommitCoordinator::new(store_dyn, translog, vmap, searcher, write_path, false),
            dir,
        )
    }

    #[test]
    fn flush_without_changes_is_a_noop_unless_forced() {
        let (coord, _dir) = coordinator();
        let gen_before = coord.flush(false, true).unwrap();
        assert_eq!(gen_before, 0);
    }

    #[test]
    fn flush_commits_and_advances_generation() {
        let (coord, _dir) = coordinator();
        coord.segment_store.add_document(b"a", b"doc".to_vec()).unwrap();
        let generation = coord.flush(true, true).unwrap();
        assert!(generation > 0);
        assert_eq!(coord.last_commit_generation(), generation);
    }

    #[test]
    fn sync_flush_mismatch_writes_nothing() {
        let (coord, _dir) = coordinator();
        coord.segment_store.add_document(b"a", b"doc".to_vec()).unwrap();
        coord.flush(true, true).unwrap();
        let result = coord.sync_flush("s1", 999).unwrap();
        assert_eq!(result, SyncedFlushResult::CommitMismatch);
    }

    #[test]
    fn sync_flush_succeeds_on_quiescent_shard() {
        let (coord, _dir) = coordinator();
        coord.segment_store.add_document(b"a", b"doc".to_vec()).unwrap();
        let commit_id = coord.flush(true, true).unwrap();
        let result = coord.sync_flush("s1", commit_id).unwrap();
        assert_eq!(result, SyncedFlushResult::Success);
    }

    #[test]
    fn pending_recovery_blocks_flush() {
        let (coord, _dir) = coordinator();
        coord.set_pending_translog_recovery(true);
        let err = coord.flush(true, true).unwrap_err();
        assert!(!err.should_fail_engine() || err.is_tragic());
        assert!(matches!(err, EngineError::InvalidOperation { .. }));
    }
}

//! The top-level `Engine`: wires all seven components behind the public
//! contract of §6.

use crate::background::BackgroundScheduler;
use crate::commit::{CommitCoordinator, SyncedFlushResult};
use crate::config::EngineConfig;
use crate::lifecycle::LifecycleController;
use crate::merge_scheduler::MergeScheduler;
use crate::recovery;
use crate::refresh::RefreshProvider;
use crate::version_map::LiveVersionMap;
use crate::write_path::{DeleteResult, IndexResult, WritePath};
use shard_core::{
    DeleteOp, EngineError, EngineResult, EngineState, IndexOp, OpenMode, Uid, VersionType,
};
use shard_segment_store::{CommitData, SearcherManager, SegmentWriter};
use shard_translog::{Translog, TranslogConfig};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Public contract surface (§6): `Engine::open` wires the write path, commit
/// coordinator, refresh provider, merge scheduler, and lifecycle controller
/// against one segment store and one translog.
pub struct Engine {
    config: EngineConfig,
    lifecycle: Arc<LifecycleController>,
    write_path: Arc<WritePath>,
    commit: Arc<CommitCoordinator>,
    refresh: Arc<RefreshProvider>,
    merge_scheduler: Arc<MergeScheduler>,
    background: Arc<BackgroundScheduler>,
    segment_store: Arc<dyn SegmentWriter>,
    version_map: Arc<LiveVersionMap>,
    searcher_manager: Arc<SearcherManager>,
}

impl Engine {
    /// §6 `open`. `segment_store` is handed in already constructed (its
    /// concrete type and on-disk layout are out of scope, per §1) paired
    /// with the `SearcherManager` that reads it.
    pub fn open(
        open_mode: OpenMode,
        translog_dir: impl AsRef<Path>,
        config: EngineConfig,
        segment_store: Arc<dyn SegmentWriter>,
        searcher_manager: Arc<SearcherManager>,
    ) -> EngineResult<Self> {
        let lifecycle = Arc::new(LifecycleController::new(EngineState::Open));
        lifecycle.inc_ref();

        let translog = match Translog::open(translog_dir, TranslogConfig::default()) {
            Ok(t) => Arc::new(t),
            Err(e) => {
                lifecycle.dec_ref();
                return Err(e);
            }
        };

        let version_map = Arc::new(LiveVersionMap::new());

        let existing_user_data = segment_store.last_commit_user_data();
        let restored_commit_data = CommitData::parse(&existing_user_data).ok();
        let restored_generation = restored_commit_data
            .as_ref()
            .map(|cd| cd.translog_generation)
            .unwrap_or_else(|| translog.current_file_generation());

        let write_path = Arc::new(WritePath::new(
            Arc::clone(&segment_store),
            Arc::clone(&translog),
            Arc::clone(&version_map),
            config.lock_table_size,
            config.gc_deletes_millis,
        ));

        // §3/invariant 6: the auto-id watermark must survive a restart or a
        // retried auto-id write after recovery can be indexed twice.
        if let Some(timestamp) = restored_commit_data.and_then(|cd| cd.max_unsafe_auto_id_timestamp) {
            write_path.restore_max_unsafe_auto_id_timestamp(timestamp);
        }

        let pending_recovery = open_mode.requires_recovery();
        let commit = Arc::new(CommitCoordinator::new(
            Arc::clone(&segment_store),
            Arc::clone(&translog),
            Arc::clone(&version_map),
            Arc::clone(&searcher_manager),
            Arc::clone(&write_path),
            pending_recovery,
        ));

        let refresh = Arc::new(RefreshProvider::new(
            Arc::clone(&segment_store),
            Arc::clone(&searcher_manager),
            Arc::clone(&version_map),
            config.refresh_ram_fraction,
            config.gc_deletes_millis,
        ));

        let background = Arc::new(BackgroundScheduler::new(
            config.background_worker_threads,
            config.background_queue_depth,
        ));

        let lifecycle_for_failure = Arc::clone(&lifecycle);
        let fail_callback: Arc<dyn Fn(&str) + Send + Sync> = Arc::new(move |reason: &str| {
            lifecycle_for_failure.fail_engine(reason, None);
        });

        let merge_scheduler = Arc::new(MergeScheduler::new(
            config.max_merge_count,
            config.flush_merges_after_millis,
            write_path.throttle_handle(),
            Arc::clone(&commit),
            Arc::clone(&write_path),
            Arc::clone(&background),
            fail_callback,
        ));

        let engine = Engine {
            config,
            lifecycle,
            write_path,
            commit,
            refresh,
            merge_scheduler,
            background,
            segment_store,
            version_map,
            searcher_manager,
        };

        if pending_recovery {
            engine.lifecycle.transition_to(EngineState::Recovering);
            recovery::recover(&translog, &engine.write_path, &engine.commit, restored_generation)?;
            engine.lifecycle.transition_to(EngineState::Ready);
        } else {
            engine.lifecycle.transition_to(EngineState::Ready);
        }

        Ok(engine)
    }

    pub fn state(&self) -> EngineState {
        self.lifecycle.state()
    }

    pub fn is_failed(&self) -> bool {
        self.lifecycle.is_failed()
    }

    fn check_open(&self) -> EngineResult<()> {
        if self.lifecycle.is_failed() {
            return Err(EngineError::already_closed(
                self.lifecycle.failure_reason().unwrap_or_default(),
            ));
        }
        if self.lifecycle.state() == EngineState::Closed {
            return Err(EngineError::already_closed("engine closed"));
        }
        Ok(())
    }

    fn handle_result<T>(&self, result: EngineResult<T>) -> EngineResult<T> {
        if let Err(e) = &result {
            if e.should_fail_engine() {
                self.lifecycle.fail_engine(&e.to_string(), None);
            }
        }
        result
    }

    pub fn index(&self, op: IndexOp) -> EngineResult<IndexResult> {
        self.check_open()?;
        let _read_guard = self.lifecycle.acquire_read();
        self.handle_result(self.write_path.index(op))
    }

    pub fn delete(&self, op: DeleteOp) -> EngineResult<DeleteResult> {
        self.check_open()?;
        let _read_guard = self.lifecycle.acquire_read();
        self.handle_result(self.write_path.delete(op))
    }

    /// §6 `get(Get, searcherFactory)`.
    pub fn get(
        &self,
        uid: &Uid,
        realtime: bool,
        requested_version: Option<(i64, VersionType)>,
    ) -> EngineResult<Option<Vec<u8>>> {
        self.check_open()?;
        if realtime {
            self.refresh.realtime_get(uid, requested_version)
        } else {
            Ok(self.searcher_manager.acquire().get(uid.as_bytes()))
        }
    }

    pub fn refresh(&self, reason: &str) -> bool {
        let _read_guard = self.lifecycle.acquire_read();
        self.refresh.refresh(reason)
    }

    pub fn flush(&self, force: bool, wait_if_ongoing: bool) -> EngineResult<u64> {
        self.check_open()?;
        let _read_guard = self.lifecycle.acquire_read();
        self.handle_result(self.commit.flush(force, wait_if_ongoing))
    }

    pub fn sync_flush(&self, sync_id: &str, expected_commit_id: u64) -> EngineResult<SyncedFlushResult> {
        self.check_open()?;
        let _write_guard = self.lifecycle.acquire_write();
        self.handle_result(self.commit.sync_flush(sync_id, expected_commit_id))
    }

    pub fn force_merge(&self, max_segments: Option<usize>, flush_after: bool) -> EngineResult<()> {
        self.check_open()?;
        self.handle_result(self.commit.force_merge(max_segments, flush_after))
    }

    /// §6 `acquireIndexCommit(flushFirst)`: returns the translog generation
    /// bound to the resulting commit, the stand-in "commit id" used
    /// throughout this engine (no on-disk `IndexCommit` snapshot type is in
    /// scope, per §1).
    pub fn acquire_index_commit(&self, flush_first: bool) -> EngineResult<u64> {
        self.check_open()?;
        if flush_first {
            self.flush(true, true)
        } else {
            Ok(self.commit.last_commit_generation())
        }
    }

    pub fn write_indexing_buffer(&self) -> EngineResult<()> {
        self.check_open()?;
        self.refresh.write_indexing_buffer(self.segment_store.ram_bytes_used())
    }

    pub fn before_merge(&self) {
        self.merge_scheduler.before_merge();
    }

    pub fn after_merge(&self) {
        self.merge_scheduler.after_merge();
    }

    pub fn handle_merge_exception(&self, reason: impl Into<String>) {
        self.merge_scheduler.handle_merge_exception(reason);
    }

    pub fn get_merge_stats(&self) -> usize {
        self.merge_scheduler.num_merges_in_flight()
    }

    pub fn get_index_buffer_ram_bytes_used(&self) -> u64 {
        self.version_map.ram_bytes_used() as u64 + self.segment_store.ram_bytes_used()
    }

    pub fn is_throttled(&self) -> bool {
        self.write_path.throttle().is_throttled()
    }

    pub fn get_index_throttle_time_in_millis(&self) -> u64 {
        self.write_path.throttle_time_millis()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// §4.7 close: drains background work, takes the write lock, and
    /// balances the store reference count acquired at `open`.
    pub fn close(&self) {
        self.background.drain();
        self.background.shutdown();
        self.lifecycle.close();
        self.lifecycle.dec_ref();
        info!("engine closed");
    }
}

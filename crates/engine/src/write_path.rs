//! Write Path (§4.1): wires the planner, segment store, version map and
//! translog together under per-uid locking and the indexing throttle.
//!
//! Grounded on the dependency graph's own request-handling layer for the
//! "acquire scoped resources, do the work, freeze result, always release"
//! shape; the planning rules themselves come straight from `crate::plan`.

use crate::plan::{plan_delete, plan_index};
use crate::version_map::LiveVersionMap;
use shard_concurrency::{StripedLockTable, ThrottleGate};
use shard_core::{DeleteOp, EngineError, EngineResult, IndexOp, Origin, VersionValue};
use shard_segment_store::SegmentWriter;
use shard_translog::{Location, Translog, TranslogRecord};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct IndexResult {
    pub version: i64,
    pub created: bool,
    pub translog_location: Option<Location>,
    pub took_nanos: u64,
    pub failure: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DeleteResult {
    pub version: i64,
    pub found: bool,
    pub translog_location: Option<Location>,
    pub took_nanos: u64,
    pub failure: Option<String>,
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// §4.1's component: planning, locking, and sequencing for `index`/`delete`.
pub struct WritePath {
    segment_store: Arc<dyn SegmentWriter>,
    translog: Arc<Translog>,
    version_map: Arc<LiveVersionMap>,
    lock_table: StripedLockTable,
    throttle: Arc<ThrottleGate>,
    max_unsafe_auto_id_timestamp: AtomicI64,
    last_write_nanos: AtomicU64,
    throttle_time_nanos: AtomicU64,
    gc_deletes_millis: u64,
    gc_deletes_enabled: bool,
}

impl WritePath {
    pub fn new(
        segment_store: Arc<dyn SegmentWriter>,
        translog: Arc<Translog>,
        version_map: Arc<LiveVersionMap>,
        lock_table_size: usize,
        gc_deletes_millis: u64,
    ) -> Self {
        WritePath {
            segment_store,
            translog,
            version_map,
            lock_table: StripedLockTable::new(lock_table_size),
            throttle: Arc::new(ThrottleGate::new()),
            max_unsafe_auto_id_timestamp: AtomicI64::new(-1),
            last_write_nanos: AtomicU64::new(0),
            throttle_time_nanos: AtomicU64::new(0),
            gc_deletes_millis,
            gc_deletes_enabled: true,
        }
    }

    pub fn throttle(&self) -> &ThrottleGate {
        &self.throttle
    }

    /// Shared with `MergeScheduler` (§4.5) so merge backpressure actually
    /// gates indexing through the same gate `index()` passes through below.
    pub fn throttle_handle(&self) -> Arc<ThrottleGate> {
        Arc::clone(&self.throttle)
    }

    pub fn last_write_nanos(&self) -> u64 {
        self.last_write_nanos.load(Ordering::Acquire)
    }

    /// §6 `getIndexThrottleTimeInMillis`: cumulative time primary index ops
    /// have spent blocked behind the throttle gate.
    pub fn throttle_time_millis(&self) -> u64 {
        self.throttle_time_nanos.load(Ordering::Acquire) / 1_000_000
    }

    pub fn max_unsafe_auto_id_timestamp(&self) -> i64 {
        self.max_unsafe_auto_id_timestamp.load(Ordering::Acquire)
    }

    /// Restores the watermark from a prior commit's userData-adjacent state
    /// (§3: "persists across restarts"). Only ever raises it, per invariant 6.
    pub fn restore_max_unsafe_auto_id_timestamp(&self, value: i64) {
        let mut current = self.max_unsafe_auto_id_timestamp.load(Ordering::Acquire);
        loop {
            if current >= value {
                return;
            }
            match self.max_unsafe_auto_id_timestamp.compare_exchange_weak(
                current,
                value,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn index(&self, op: IndexOp) -> EngineResult<IndexResult> {
        self.last_write_nanos.store(op.meta.start_time_nanos, Ordering::Release);
        let start = Instant::now();

        // §4.1: index ops throttle whenever origin isn't recovery (primary
        // and replica both feel merge/buffer backpressure); only replayed
        // recovery ops bypass the gate.
        if !op.meta.origin.is_recovery() {
            let throttle_start = Instant::now();
            let _throttle_guard = self.throttle.pass_through();
            self.throttle_time_nanos
                .fetch_add(throttle_start.elapsed().as_nanos() as u64, Ordering::Relaxed);
        }

        let _uid_guard = self.lock_table.acquire(op.meta.uid.as_bytes());

        let store_has_doc = self.segment_store.get_doc(op.meta.uid.as_bytes()).is_some();

        let strategy = plan_index(
            &op,
            &self.version_map,
            store_has_doc,
            &self.max_unsafe_auto_id_timestamp,
            now_millis(),
            self.gc_deletes_millis,
            self.gc_deletes_enabled,
        );

        if let Some(shard_core::EarlyResult::VersionConflict { current_version }) = strategy.early_result {
            return Err(EngineError::version_conflict(current_version));
        }

        if strategy.index_into_segment_store {
            let write_result = if strategy.use_update {
                self.segment_store
                    .update_document(op.meta.uid.as_bytes(), op.doc.clone())
            } else {
                self.segment_store
                    .add_document(op.meta.uid.as_bytes(), op.doc.clone())
            };

            if let Err(e) = write_result {
                if let Some(tragic) = self.segment_store.tragic_exception() {
                    return Err(EngineError::tragic_with_source(tragic, e));
                }
                return Ok(IndexResult {
                    version: strategy.version_for_indexing,
                    created: strategy.current_not_found_or_deleted,
                    translog_location: None,
                    took_nanos: start.elapsed().as_nanos() as u64,
                    failure: Some(e.to_string()),
                });
            }

            self.version_map.put(
                op.meta.uid.clone(),
                VersionValue::live(strategy.version_for_indexing),
            );
        }

        // §4.1: only `LocalTranslogRecovery` ops (replayed from this shard's
        // own log) skip re-appending. `PeerRecovery` ops must still be
        // written so they are durable on this shard (invariant 4).
        let translog_location = if op.meta.origin == Origin::LocalTranslogRecovery {
            None
        } else {
            Some(self.translog.add(&TranslogRecord::index(
                op.meta.uid.as_bytes().to_vec(),
                strategy.version_for_indexing,
                op.doc.clone(),
                op.meta.start_time_nanos,
            ))?)
        };

        debug!(uid = %op.meta.uid, version = strategy.version_for_indexing, "index applied");

        Ok(IndexResult {
            version: strategy.version_for_indexing,
            created: strategy.current_not_found_or_deleted,
            translog_location,
            took_nanos: start.elapsed().as_nanos() as u64,
            failure: None,
        })
    }

    pub fn delete(&self, op: DeleteOp) -> EngineResult<DeleteResult> {
        self.last_write_nanos.store(op.meta.start_time_nanos, Ordering::Release);
        let start = Instant::now();

        let _uid_guard = self.lock_table.acquire(op.meta.uid.as_bytes());

        let store_has_doc = self.segment_store.get_doc(op.meta.uid.as_bytes()).is_some();

        let strategy = plan_delete(
            &op,
            &self.version_map,
            store_has_doc,
            now_millis(),
            self.gc_deletes_millis,
            self.gc_deletes_enabled,
        );

        if let Some(shard_core::EarlyResult::VersionConflict { current_version }) = strategy.early_result {
            return Err(EngineError::version_conflict(current_version));
        }

        if strategy.delete_from_segment_store {
            if let Err(e) = self.segment_store.delete_documents(op.meta.uid.as_bytes()) {
                if let Some(tragic) = self.segment_store.tragic_exception() {
                    return Err(EngineError::tragic_with_source(tragic, e));
                }
                return Ok(DeleteResult {
                    version: strategy.version_of_deletion,
                    found: !strategy.currently_deleted,
                    translog_location: None,
                    took_nanos: start.elapsed().as_nanos() as u64,
                    failure: Some(e.to_string()),
                });
            }
        }

        if strategy.update_version_map {
            self.version_map.put(
                op.meta.uid.clone(),
                VersionValue::tombstone(strategy.version_of_deletion, now_millis()),
            );
        }

        // §4.1: only `LocalTranslogRecovery` ops (replayed from this shard's
        // own log) skip re-appending. `PeerRecovery` ops must still be
        // written so they are durable on this shard (invariant 4).
        let translog_location = if op.meta.origin == Origin::LocalTranslogRecovery {
            None
        } else {
            Some(self.translog.add(&TranslogRecord::delete(
                op.meta.uid.as_bytes().to_vec(),
                strategy.version_of_deletion,
                op.meta.start_time_nanos,
            ))?)
        };

        debug!(uid = %op.meta.uid, version = strategy.version_of_deletion, "delete applied");

        Ok(DeleteResult {
            version: strategy.version_of_deletion,
            found: !strategy.currently_deleted,
            translog_location,
            took_nanos: start.elapsed().as_nanos() as u64,
            failure: None,
        })
    }
}

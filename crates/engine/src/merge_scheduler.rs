//! Merge / Throttle Scheduler (§4.5): tracks in-flight merges, throttles
//! indexing when merges fall behind, and dispatches post-merge flush/renew
//! and `failEngine` jobs to the background scheduler — never inline, and
//! never on a merge thread.

use crate::background::{BackgroundScheduler, TaskPriority};
use crate::commit::CommitCoordinator;
use crate::write_path::WritePath;
use shard_concurrency::ThrottleGate;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// §4.5's two counters plus the dispatch hooks. Holds `Arc`s to the
/// components it coordinates so its background closures can be `'static`.
pub struct MergeScheduler {
    num_merges_in_flight: AtomicUsize,
    max_merge_count: usize,
    flush_merges_after_nanos: u64,
    throttle: Arc<ThrottleGate>,
    commit: Arc<CommitCoordinator>,
    write_path: Arc<WritePath>,
    background: Arc<BackgroundScheduler>,
    fail_callback: Arc<dyn Fn(&str) + Send + Sync>,
}

impl MergeScheduler {
    pub fn new(
        max_merge_count: usize,
        flush_merges_after_millis: u64,
        throttle: Arc<ThrottleGate>,
        commit: Arc<CommitCoordinator>,
        write_path: Arc<WritePath>,
        background: Arc<BackgroundScheduler>,
        fail_callback: Arc<dyn Fn(&str) + Send + Sync>,
    ) -> Self {
        MergeScheduler {
            num_merges_in_flight: AtomicUsize::new(0),
            max_merge_count,
            flush_merges_after_nanos: flush_merges_after_millis.saturating_mul(1_000_000),
            throttle,
            commit,
            write_path,
            background,
            fail_callback,
        }
    }

    pub fn num_merges_in_flight(&self) -> usize {
        self.num_merges_in_flight.load(Ordering::Acquire)
    }

    /// §4.5 `beforeMerge`. Merge backpressure contributes exactly one
    /// reference to the shared throttle: only the merge whose arrival
    /// crosses `max_merge_count` activates it. Every merge beyond that
    /// (`previous > max_merge_count`) has already seen the gate active and
    /// must not bump the count again, or `after_merge` could never bring it
    /// back to zero (invariant 7).
    pub fn before_merge(&self) {
        let previous = self.num_merges_in_flight.fetch_add(1, Ordering::AcqRel);
        if previous == self.max_merge_count {
            if self.throttle.activate() {
                warn!(in_flight = previous + 1, max = self.max_merge_count, "indexing throttle activated");
            }
        }
    }

    /// §4.5 `afterMerge`. The mirror image of `before_merge`: only the merge
    /// whose departure brings the in-flight count back down to
    /// `max_merge_count` releases the reference it took.
    pub fn after_merge(&self) {
        let previous = self.num_merges_in_flight.fetch_sub(1, Ordering::AcqRel);
        let remaining = previous - 1;
        if remaining == self.max_merge_count {
            if self.throttle.deactivate() {
                info!(in_flight = remaining, "indexing throttle deactivated");
            }
        }

        if remaining == 0 {
            let idle_for = now_nanos().saturating_sub(self.write_path.last_write_nanos());
            if idle_for >= self.flush_merges_after_nanos {
                let commit = Arc::clone(&self.commit);
                let submitted = self.background.submit(TaskPriority::Low, move || {
                    let outcome = commit
                        .try_renew_sync_commit()
                        .and_then(|renewed| if renewed { Ok(()) } else { commit.flush(true, true).map(|_| ()) });
                    if let Err(e) = outcome {
                        warn!(error = %e, "post-merge flush/renew job failed");
                    }
                });
                if submitted.is_err() {
                    warn!("background scheduler backpressure: post-merge flush/renew job dropped");
                }
            }
        }
    }

    /// §4.5 `handleMergeException`: dispatch `failEngine` on the background
    /// scheduler, never inline, to avoid self-deadlock against whatever lock
    /// the merge thread is holding.
    pub fn handle_merge_exception(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let callback = Arc::clone(&self.fail_callback);
        let submitted = self
            .background
            .submit(TaskPriority::High, move || callback(&reason));
        if submitted.is_err() {
            // Backpressure on the scheduler used to dispatch engine failure
            // is itself fatal; fail synchronously as a last resort.
            (self.fail_callback)("merge exception (background scheduler saturated)");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version_map::LiveVersionMap;
    use shard_segment_store::{InMemorySegmentWriter, SearcherManager, SegmentWriter};
    use shard_translog::{Translog, TranslogConfig};
    use std::sync::atomic::AtomicBool;
    use tempfile::tempdir;

    fn scheduler(max_merge_count: usize) -> (MergeScheduler, Arc<AtomicBool>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store: Arc<InMemorySegmentWriter> = Arc::new(InMemorySegmentWriter::new());
        let store_dyn: Arc<dyn SegmentWriter> = store.clone();
        let translog = Arc::new(Translog::open(dir.path(), TranslogConfig::default()).unwrap());
        let vmap = Arc::new(LiveVersionMap::new());
        let write_path = Arc::new(WritePath::new(store_dyn.clone(), translog.clone(), vmap.clone(), 16, 60_000));
        let searcher = Arc::new(SearcherManager::new(store));
        let commit = Arc::new(CommitCoordinator::new(
            store_dyn,
            translog,
            vmap,
            searcher,
            Arc::clone(&write_path),
            false,
        ));
        let throttle = Arc::new(ThrottleGate::new());
        let background = Arc::new(BackgroundScheduler::new(1, 64));
        let failed = Arc::new(AtomicBool::new(false));
        let failed_clone = Arc::clone(&failed);
        let fail_callback: Arc<dyn Fn(&str) + Send + Sync> =
            Arc::new(move |_reason: &str| failed_clone.store(true, Ordering::Release));

        (
            MergeScheduler::new(max_merge_count, 0, throttle, commit, write_path, background, fail_callback),
            failed,
            dir,
        )
    }

    #[test]
    fn throttle_activates_past_max_merge_count() {
        let (sched, _failed, _dir) = scheduler(1);
        sched.before_merge();
        sched.before_merge();
        assert!(sched.throttle.is_throttled());
        assert_eq!(sched.num_merges_in_flight(), 2);
    }

    #[test]
    fn throttle_deactivates_once_back_under_limit() {
        let (sched, _failed, _dir) = scheduler(1);
        sched.before_merge();
        sched.before_merge();
        sched.after_merge();
        assert!(!sched.throttle.is_throttled());
    }

    #[test]
    fn handle_merge_exception_dispatches_failure_async() {
        let (sched, failed, _dir) = scheduler(5);
        sched.handle_merge_exception("disk full during merge");
        sched.background.drain();
        assert!(failed.load(Ordering::Acquire));
    }

    #[test]
    fn no_throttle_when_under_max_merge_count() {
        let (sched, _failed, _dir) = scheduler(5);
        sched.before_merge();
        assert!(!sched.throttle.is_throttled());
    }
}

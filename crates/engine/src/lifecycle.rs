//! Lifecycle & Failure Controller (§4.7): ref-counted store handle, engine
//! state transitions, and idempotent `failEngine`.
//!
//! Grounded on `shard-translog::tragic`'s sticky `OnceCell` channel pattern
//! (§9: "process-wide state... use an atomic once-cell"), applied here at
//! the engine level so recovery/commit failures that do not originate inside
//! the segment writer or translog still fail the engine exactly once.

use once_cell::sync::OnceCell;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use shard_core::EngineState;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::error;

/// The three locks named in §4.7: the engine read/write pair (here,
/// `engine_lock`), the fail-engine exclusion (folded into `failed_reason`'s
/// OnceCell, since set-once already serializes the transition), and the
/// flush/optimize mutexes owned by `CommitCoordinator`.
pub struct LifecycleController {
    state: RwLock<EngineState>,
    engine_lock: RwLock<()>,
    ref_count: AtomicI64,
    failed_reason: OnceCell<String>,
}

impl LifecycleController {
    pub fn new(initial_state: EngineState) -> Self {
        LifecycleController {
            state: RwLock::new(initial_state),
            engine_lock: RwLock::new(()),
            ref_count: AtomicI64::new(0),
            failed_reason: OnceCell::new(),
        }
    }

    pub fn state(&self) -> EngineState {
        *self.state.read()
    }

    pub fn transition_to(&self, new_state: EngineState) {
        *self.state.write() = new_state;
    }

    /// §3: "incRef on open, matching decRef on close or creation-failure".
    pub fn inc_ref(&self) -> i64 {
        self.ref_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn dec_ref(&self) -> i64 {
        let previous = self.ref_count.fetch_sub(1, Ordering::AcqRel);
        assert!(previous > 0, "store reference count must never go negative");
        previous - 1
    }

    pub fn ref_count(&self) -> i64 {
        self.ref_count.load(Ordering::Acquire)
    }

    pub fn acquire_read(&self) -> RwLockReadGuard<'_, ()> {
        self.engine_lock.read()
    }

    pub fn acquire_write(&self) -> RwLockWriteGuard<'_, ()> {
        self.engine_lock.write()
    }

    pub fn is_failed(&self) -> bool {
        self.failed_reason.get().is_some()
    }

    pub fn failure_reason(&self) -> Option<String> {
        self.failed_reason.get().cloned()
    }

    /// §4.7: idempotent — once `failed_reason` is set, subsequent calls
    /// no-op. Returns `true` iff this call was the one that actually
    /// triggered the transition.
    ///
    /// Deliberately does not take `engine_lock`: `index`/`delete`/`flush`
    /// call this while still holding `acquire_read()`, and `sync_flush`
    /// while holding `acquire_write()`, both on the calling thread — taking
    /// the lock again here would deadlock. `OnceCell::set` alone already
    /// serializes the transition, standing in for §4.7's separate
    /// fail-engine lock.
    pub fn fail_engine(&self, reason: &str, cause: Option<&(dyn std::error::Error + 'static)>) -> bool {
        let triggered = self.failed_reason.set(reason.to_string()).is_ok();
        if triggered {
            match cause {
                Some(cause) => error!(reason, error = %cause, "engine failed"),
                None => error!(reason, "engine failed"),
            }
            self.transition_to(EngineState::Closing);
        }
        triggered
    }

    /// §4.7: `close` must hold either the write lock or the fail-engine
    /// path's implicit exclusion. This close path takes the write lock.
    pub fn close(&self) {
        let _guard = self.acquire_write();
        self.transition_to(EngineState::Closed);
    }
}

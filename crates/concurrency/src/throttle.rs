use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::debug;

/// The indexing throttle gate (§4.1, §4.5): "a reentrant gate that admits
/// one thread at a time when active, unbounded when inactive". Activation
/// is reference-counted: §4.5's merge backpressure and the write-buffer
/// pressure path both increment the same counter, and throttling only turns
/// off once the count returns to zero (invariant 7: `throttleRequestCount >=
/// 0` always; `isThrottled <=> throttleRequestCount > 0`).
///
/// Grounded on `crates/concurrency/src/manager.rs`'s atomic-counter
/// discipline (`checked_add`, explicit `Acquire`/`Release` ordering) and on
/// `engine/src/background.rs`'s paired counter style.
pub struct ThrottleGate {
    activation_count: AtomicI64,
    gate: ReentrantMutex<()>,
}

impl Default for ThrottleGate {
    fn default() -> Self {
        ThrottleGate {
            activation_count: AtomicI64::new(0),
            gate: ReentrantMutex::new(()),
        }
    }
}

impl ThrottleGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the activation count. Returns `true` if this call
    /// transitioned the gate from inactive to active.
    pub fn activate(&self) -> bool {
        let previous = self.activation_count.fetch_add(1, Ordering::AcqRel);
        debug!(previous, "throttle activation count incremented");
        previous == 0
    }

    /// Decrement the activation count. Returns `true` if this call
    /// transitioned the gate from active to inactive.
    ///
    /// Panics if called more times than `activate` — that would mean the
    /// count went negative, violating invariant 7.
    pub fn deactivate(&self) -> bool {
        let previous = self.activation_count.fetch_sub(1, Ordering::AcqRel);
        assert!(previous > 0, "throttle activation count must never go negative");
        debug!(previous, "throttle activation count decremented");
        previous == 1
    }

    pub fn is_throttled(&self) -> bool {
        self.activation_count.load(Ordering::Acquire) > 0
    }

    pub fn activation_count(&self) -> i64 {
        self.activation_count.load(Ordering::Acquire)
    }

    /// Pass through the gate: blocks behind at most one other (non-
    /// reentrant-for-other-threads) thread when throttling is active;
    /// returns immediately, unbounded, when inactive.
    pub fn pass_through(&self) -> Option<ReentrantMutexGuard<'_, ()>> {
        if self.is_throttled() {
            Some(self.gate.lock())
        } else {
            None
        }
    }
}

//! Concurrency primitives the write path relies on (§5): a fixed-size
//! per-uid striped lock table and the reentrant indexing-throttle gate.

mod striped_lock;
mod throttle;

pub use striped_lock::{StripedLockGuard, StripedLockTable};
pub use throttle::ThrottleGate;

use parking_lot::{Mutex, MutexGuard};
use std::hash::{Hash, Hasher};
use rustc_hash::FxHasher;

/// Fixed-size array of mutexes indexed by `hash(uid) mod N` (§9: "Striped
/// lock over a global map... No per-uid allocation"). Grounded on
/// `crates/concurrency/src/manager.rs`'s `DashMap<BranchId, Mutex<()>>`
/// per-key commit-lock pattern, generalized here to the spec's explicit
/// requirement for a *fixed-size array*, not a growable map.
pub struct StripedLockTable {
    stripes: Vec<Mutex<()>>,
    mask: u64,
}

impl StripedLockTable {
    /// `size` must be a power of two.
    pub fn new(size: usize) -> Self {
        assert!(size.is_power_of_two(), "striped lock table size must be a power of two");
        let stripes = (0..size).map(|_| Mutex::new(())).collect();
        StripedLockTable {
            stripes,
            mask: (size - 1) as u64,
        }
    }

    fn stripe_index(&self, key: &[u8]) -> usize {
        let mut hasher = FxHasher::default();
        key.hash(&mut hasher);
        (hasher.finish() & self.mask) as usize
    }

    /// Acquire the stripe for `key`. The returned guard releases the lock on
    /// drop, including on panic unwind (§9: "Scoped acquisition... release
    /// on all exit paths including panics").
    pub fn acquire(&self, key: &[u8]) -> StripedLockGuard<'_> {
        let idx = self.stripe_index(key);
        StripedLockGuard {
            _guard: self.stripes[idx].lock(),
        }
    }

    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }
}

pub struct StripedLockGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn same_key_serializes_across_threads() {
        let table = Arc::new(StripedLockTable::new(16));
        let counter = Arc::new(AtomicUsize::new(0));
        let overlap = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let table = Arc::clone(&table);
            let counter = Arc::clone(&counter);
            let overlap = Arc::clone(&overlap);
            handles.push(std::thread::spawn(move || {
                let _guard = table.acquire(b"same-uid");
                let before = counter.fetch_add(1, Ordering::SeqCst);
                if before != 0 {
                    overlap.fetch_add(1, Ordering::SeqCst);
                }
                std::thread::sleep(std::time::Duration::from_millis(5));
                counter.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(overlap.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn different_keys_do_not_contend_the_same_stripe_necessarily() {
        let table = StripedLockTable::new(4);
        let _g1 = table.acquire(b"a");
        // Different key may or may not hash to a different stripe; this
        // just exercises that acquiring two distinct keys does not panic or
        // deadlock on a single thread when they happen to differ.
        let idx_a = table.stripe_index(b"a");
        let idx_b = table.stripe_index(b"zzz-different-key");
        assert!(idx_a < table.stripe_count());
        assert!(idx_b < table.stripe_count());
    }
}

use crate::writer::InMemorySegmentWriter;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// A point-in-time reader handle (§1: "an openable `SearcherManager` that
/// serves point-in-time readers refreshed on demand"). Cheap to clone; reads
/// are served from the segment store's state as of the `version` it was
/// acquired at.
#[derive(Clone)]
pub struct Searcher {
    store: Arc<InMemorySegmentWriter>,
    version: u64,
}

impl Searcher {
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn get(&self, uid: &[u8]) -> Option<Vec<u8>> {
        self.store.get(uid)
    }
}

/// Arbitrates reopening the point-in-time reader against the live segment
/// writer. Grounded on `crates/engine/src/search/index.rs`'s
/// `version()`/`is_at_version`/`wait_for_version` watermark pattern,
/// reframed here as an explicit acquire/refresh API (§4.6).
pub struct SearcherManager {
    store: Arc<InMemorySegmentWriter>,
    current: RwLock<Searcher>,
    last_refresh_version: AtomicU64,
}

impl SearcherManager {
    pub fn new(store: Arc<InMemorySegmentWriter>) -> Self {
        let initial = Searcher {
            store: Arc::clone(&store),
            version: store.version(),
        };
        SearcherManager {
            store,
            current: RwLock::new(initial),
            last_refresh_version: AtomicU64::new(0),
        }
    }

    /// Acquire the currently open searcher without refreshing.
    pub fn acquire(&self) -> Searcher {
        self.current.read().clone()
    }

    /// §4.6 `refresh(reason)`: reopen the reader against the store's current
    /// version iff it is stale relative to the store.
    pub fn maybe_refresh(&self, reason: &str) -> bool {
        let store_version = self.store.version();
        let mut current = self.current.write();
        if current.version >= store_version {
            return false;
        }
        debug!(reason, from = current.version, to = store_version, "searcher refreshed");
        *current = Searcher {
            store: Arc::clone(&self.store),
            version: store_version,
        };
        self.last_refresh_version.store(store_version, Ordering::Release);
        true
    }

    /// Unconditional refresh, used by realtime `get` (§4.6) which must
    /// observe its own just-applied write even if nothing else is stale.
    pub fn force_refresh(&self, reason: &str) {
        let store_version = self.store.version();
        let mut current = self.current.write();
        *current = Searcher {
            store: Arc::clone(&self.store),
            version: store_version,
        };
        self.last_refresh_version.store(store_version, Ordering::Release);
        debug!(reason, version = store_version, "searcher force-refreshed");
    }

    pub fn last_refresh_version(&self) -> u64 {
        self.last_refresh_version.load(Ordering::Acquire)
    }

    /// Busy-wait (bounded by `timeout`) until the store has reached at least
    /// `target_version` and then refresh to it. Grounded on `index.rs`'s
    /// `wait_for_version`.
    pub fn wait_and_refresh(&self, target_version: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.store.version() >= target_version {
                self.maybe_refresh("wait_and_refresh");
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::yield_now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_manager_opens_at_current_version() {
        let store = Arc::new(InMemorySegmentWriter::new());
        let mgr = SearcherManager::new(Arc::clone(&store));
        assert_eq!(mgr.acquire().version(), store.version());
    }

    #[test]
    fn maybe_refresh_is_a_noop_when_not_stale() {
        let store = Arc::new(InMemorySegmentWriter::new());
        let mgr = SearcherManager::new(Arc::clone(&store));
        assert!(!mgr.maybe_refresh("noop"));
    }

    #[test]
    fn maybe_refresh_picks_up_new_writes() {
        use crate::writer::SegmentWriter;
        let store = Arc::new(InMemorySegmentWriter::new());
        let mgr = SearcherManager::new(Arc::clone(&store));
        store.add_document(b"a", b"doc".to_vec()).unwrap();
        assert!(mgr.maybe_refresh("after write"));
        assert_eq!(mgr.acquire().get(b"a"), Some(b"doc".to_vec()));
    }

    #[test]
    fn wait_and_refresh_times_out_if_version_never_reached() {
        let store = Arc::new(InMemorySegmentWriter::new());
        let mgr = SearcherManager::new(Arc::clone(&store));
        let reached = mgr.wait_and_refresh(u64::MAX, Duration::from_millis(20));
        assert!(!reached);
    }
}

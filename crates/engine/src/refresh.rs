//! Refresh / Search Provider (§4.6): periodically reopens the point-in-time
//! reader and arbitrates version-map eviction on refresh; implements the
//! 25%-of-indexing-buffer rule for `writeIndexingBuffer()`.

use crate::version_map::LiveVersionMap;
use shard_core::{EngineError, EngineResult, Uid, VersionType, VersionValue};
use shard_segment_store::{SearcherManager, SegmentWriter};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

pub struct RefreshProvider {
    segment_store: Arc<dyn SegmentWriter>,
    searcher_manager: Arc<SearcherManager>,
    version_map: Arc<LiveVersionMap>,
    refresh_ram_fraction: f64,
    gc_deletes_millis: u64,
}

impl RefreshProvider {
    pub fn new(
        segment_store: Arc<dyn SegmentWriter>,
        searcher_manager: Arc<SearcherManager>,
        version_map: Arc<LiveVersionMap>,
        refresh_ram_fraction: f64,
        gc_deletes_millis: u64,
    ) -> Self {
        RefreshProvider {
            segment_store,
            searcher_manager,
            version_map,
            refresh_ram_fraction,
            gc_deletes_millis,
        }
    }

    /// §4.6 `refresh(reason)`: reopen if stale, then release `old` and GC
    /// expired tombstones.
    pub fn refresh(&self, reason: &str) -> bool {
        let refreshed = self.searcher_manager.maybe_refresh(reason);
        if refreshed {
            self.version_map.before_refresh();
            self.version_map.after_refresh();
            let reclaimed = self
                .version_map
                .gc_tombstones(now_millis(), self.gc_deletes_millis, true);
            debug!(reason, reclaimed, "refresh complete");
        }
        refreshed
    }

    /// §4.6 `writeIndexingBuffer`: the 25% rule. Chooses a full refresh (which
    /// clears the version map) over a cheap segment flush (which does not
    /// open a new reader) based on version-map memory pressure relative to
    /// the writer's own buffer usage.
    pub fn write_indexing_buffer(&self, index_writer_ram_bytes: u64) -> EngineResult<()> {
        let threshold = (index_writer_ram_bytes as f64 * self.refresh_ram_fraction) as usize;
        let version_map_bytes = self.version_map.ram_bytes_used_for_refresh();

        if version_map_bytes > threshold {
            self.refresh("write_indexing_buffer");
            debug!(version_map_bytes, threshold, "write_indexing_buffer: refreshed");
        } else {
            self.segment_store
                .flush()
                .map_err(|e| EngineError::refresh_failed(e.to_string()))?;
            debug!(version_map_bytes, threshold, "write_indexing_buffer: cheap flush");
        }
        Ok(())
    }

    /// §4.6 realtime `get`: forces a `realtime_get` refresh when the uid is
    /// live in the version map, then serves from the fresh searcher.
    pub fn realtime_get(
        &self,
        uid: &Uid,
        requested_version: Option<(i64, VersionType)>,
    ) -> EngineResult<Option<Vec<u8>>> {
        if let Some(cached) = self.version_map.get(uid) {
            self.searcher_manager.force_refresh("realtime_get");

            if let Some((req_version, version_type)) = requested_version {
                if version_type.is_version_conflict_for_writes(cached.version, req_version, cached.is_delete) {
                    return Err(EngineError::version_conflict(cached.version));
                }
            }

            if cached.is_delete {
                return Ok(None);
            }
        }

        let searcher = self.searcher_manager.acquire();
        Ok(searcher.get(uid.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shard_segment_store::InMemorySegmentWriter;

    fn provider(fraction: f64) -> (RefreshProvider, Arc<InMemorySegmentWriter>) {
        let store = Arc::new(InMemorySegmentWriter::new());
        let store_dyn: Arc<dyn SegmentWriter> = store.clone();
        let searcher = Arc::new(SearcherManager::new(store.clone()));
        let vmap = Arc::new(LiveVersionMap::new());
        (
            RefreshProvider::new(store_dyn, searcher, vmap, fraction, 60_000),
            store,
        )
    }

    #[test]
    fn refresh_clears_old_tier() {
        let (provider, store) = provider(0.25);
        store.add_document(b"a", b"doc".to_vec()).unwrap();
        assert!(provider.refresh("test"));
        assert_eq!(provider.version_map.old_len(), 0);
    }

    #[test]
    fn write_indexing_buffer_refreshes_past_threshold() {
        let (provider, _store) = provider(0.25);
        for i in 0..100 {
            provider
                .version_map
                .put(Uid::from_str(&format!("doc-{i}")), VersionValue::live(1));
        }
        // A tiny declared indexing-buffer budget makes the version map look
        // oversized relative to it.
        provider.write_indexing_buffer(10).unwrap();
    }

    #[test]
    fn realtime_get_returns_live_document() {
        let (provider, store) = provider(0.25);
        store.add_document(b"a", b"doc-a".to_vec()).unwrap();
        provider
            .version_map
            .put(Uid::from_str("a"), VersionValue::live(1));
        let result = provider.realtime_get(&Uid::from_str("a"), None).unwrap();
        assert_eq!(result, Some(b"doc-a".to_vec()));
    }

    #[test]
    fn realtime_get_returns_none_for_tombstone() {
        let (provider, _store) = provider(0.25);
        provider
            .version_map
            .put(Uid::from_str("a"), VersionValue::tombstone(1, 0));
        let result = provider.realtime_get(&Uid::from_str("a"), None).unwrap();
        assert_eq!(result, None);
    }
}

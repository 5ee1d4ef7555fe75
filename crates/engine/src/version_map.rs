//! Live Version Map (§4.2): the in-memory authority for realtime reads and
//! version-conflict checks. Built in the dependency graph's concurrent-map
//! idiom (`dashmap` entries, `parking_lot`-guarded tier swap on refresh) —
//! no single teacher file implements this shape, so this module follows the
//! closed-form algorithm in §4.2 directly.
//!
//! A delete does not store a delete-marker *inside* `current`/`old`: those
//! two tiers only ever hold live entries, matching their role as a realtime-
//! get cache that is entirely replaced by `old <- current` on refresh.
//! Deletes go straight into `tombstones`, which survives refresh (§4.2:
//! "tombstones are untouched"). `put` is still a single entry point from the
//! write path's point of view (it dispatches on `VersionValue::is_delete`),
//! matching the spec's literal "put(uid, VersionValue): insert into
//! current... A live put removes any matching tombstone" — read as
//! distinguishing the live case from an implicit tombstone case.

use dashmap::DashMap;
use parking_lot::RwLock;
use shard_core::{Uid, VersionValue};
use std::sync::Arc;

type Tier = Arc<DashMap<Uid, VersionValue>>;

pub struct LiveVersionMap {
    current: RwLock<Tier>,
    old: RwLock<Tier>,
    tombstones: DashMap<Uid, VersionValue>,
}

impl Default for LiveVersionMap {
    fn default() -> Self {
        LiveVersionMap {
            current: RwLock::new(Arc::new(DashMap::new())),
            old: RwLock::new(Arc::new(DashMap::new())),
            tombstones: DashMap::new(),
        }
    }
}

impl LiveVersionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// §4.2 `get`: check `current`, then `old`, then `tombstones`.
    pub fn get(&self, uid: &Uid) -> Option<VersionValue> {
        if let Some(v) = self.current.read().get(uid) {
            return Some(*v);
        }
        if let Some(v) = self.old.read().get(uid) {
            return Some(*v);
        }
        self.tombstones.get(uid).map(|v| *v)
    }

    /// §4.2 `put`, dispatching live vs. tombstone as described above.
    pub fn put(&self, uid: Uid, value: VersionValue) {
        if value.is_delete {
            self.put_tombstone(uid, value);
        } else {
            self.put_live(uid, value);
        }
    }

    fn put_live(&self, uid: Uid, value: VersionValue) {
        debug_assert!(!value.is_delete);
        self.tombstones.remove(&uid);
        self.current.read().insert(uid, value);
    }

    fn put_tombstone(&self, uid: Uid, value: VersionValue) {
        debug_assert!(value.is_delete);
        self.current.read().remove(&uid);
        self.tombstones.insert(uid, value);
    }

    /// §4.2 `beforeRefresh`: redirect writes to a fresh `current`, keep the
    /// old `current` as `old` until `afterRefresh`.
    pub fn before_refresh(&self) {
        let mut current = self.current.write();
        let mut old = self.old.write();
        *old = Arc::clone(&current);
        *current = Arc::new(DashMap::new());
    }

    /// §4.2 `afterRefresh`: drop `old` entirely.
    pub fn after_refresh(&self) {
        let mut old = self.old.write();
        *old = Arc::new(DashMap::new());
    }

    pub fn remove_tombstone(&self, uid: &Uid) {
        self.tombstones.remove(uid);
    }

    pub fn all_tombstones(&self) -> Vec<(Uid, VersionValue)> {
        self.tombstones.iter().map(|e| (e.key().clone(), *e.value())).collect()
    }

    /// §4.2: GC tombstones older than `gc_deletes_millis`, iff `enabled`.
    /// Returns the number reclaimed.
    pub fn gc_tombstones(&self, now_millis: i64, gc_deletes_millis: u64, enabled: bool) -> usize {
        if !enabled {
            return 0;
        }
        let expired: Vec<Uid> = self
            .tombstones
            .iter()
            .filter(|e| now_millis - e.value().time_millis > gc_deletes_millis as i64)
            .map(|e| e.key().clone())
            .collect();
        for uid in &expired {
            self.tombstones.remove(uid);
        }
        expired.len()
    }

    /// §4.2 `ramBytesUsed`: everything, including the about-to-be-freed
    /// `old` tier.
    pub fn ram_bytes_used(&self) -> usize {
        const ENTRY_OVERHEAD: usize = 64;
        (self.current.read().len() + self.old.read().len() + self.tombstones.len()) * ENTRY_OVERHEAD
    }

    /// §4.2 `ramBytesUsedForRefresh`: `current` + `tombstones` only — `old`
    /// is about to be freed by the refresh this heuristic is deciding
    /// whether to trigger.
    pub fn ram_bytes_used_for_refresh(&self) -> usize {
        const ENTRY_OVERHEAD: usize = 64;
        (self.current.read().len() + self.tombstones.len()) * ENTRY_OVERHEAD
    }

    pub fn current_len(&self) -> usize {
        self.current.read().len()
    }

    pub fn old_len(&self) -> usize {
        self.old.read().len()
    }

    pub fn tombstone_len(&self) -> usize {
        self.tombstones.len()
    }
}

use crate::types::{Origin, Uid, VersionType};

/// §3 VersionValue: the unit stored in the live version map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionValue {
    pub version: i64,
    pub is_delete: bool,
    /// Wall-clock millisecond the tombstone was recorded at; `0` for live
    /// entries (§3).
    pub time_millis: i64,
}

impl VersionValue {
    pub fn live(version: i64) -> Self {
        VersionValue {
            version,
            is_delete: false,
            time_millis: 0,
        }
    }

    pub fn tombstone(version: i64, now_millis: i64) -> Self {
        VersionValue {
            version,
            is_delete: true,
            time_millis: now_millis,
        }
    }
}

/// Shared fields carried by every operation (§3).
#[derive(Debug, Clone)]
pub struct OpMeta {
    pub uid: Uid,
    pub version: i64,
    pub version_type: VersionType,
    pub origin: Origin,
    pub start_time_nanos: u64,
}

/// §3 Index op. The document payload is left abstract (`Vec<u8>`) — field
/// mapping is out of scope (§1); the engine only ever needs an opaque,
/// already-serialized document to hand to the segment store.
#[derive(Debug, Clone)]
pub struct IndexOp {
    pub meta: OpMeta,
    pub doc: Vec<u8>,
    pub auto_generated_id_timestamp: Option<i64>,
    pub is_retry: bool,
}

/// §3 Delete op.
#[derive(Debug, Clone)]
pub struct DeleteOp {
    pub meta: OpMeta,
}

/// §3 tagged Operation.
#[derive(Debug, Clone)]
pub enum Operation {
    Index(IndexOp),
    Delete(DeleteOp),
}

impl Operation {
    pub fn meta(&self) -> &OpMeta {
        match self {
            Operation::Index(op) => &op.meta,
            Operation::Delete(op) => &op.meta,
        }
    }

    pub fn uid(&self) -> &Uid {
        &self.meta().uid
    }

    pub fn origin(&self) -> Origin {
        self.meta().origin
    }
}

/// A pre-flight result computed without touching the segment store: either a
/// version conflict or a skip-Lucene decision made purely from version-map
/// state (§3: "pre-flight early results are a variant, not a nullable
/// field").
#[derive(Debug, Clone)]
pub enum EarlyResult {
    VersionConflict { current_version: i64 },
}

/// §3 IndexingStrategy: a closed sum, constructed only via the five named
/// constructors below (§9: tagged variants over inheritance).
#[derive(Debug, Clone)]
pub struct IndexingStrategy {
    pub current_not_found_or_deleted: bool,
    pub use_update: bool,
    pub index_into_segment_store: bool,
    pub version_for_indexing: i64,
    pub early_result: Option<EarlyResult>,
}

impl IndexingStrategy {
    /// Append-only fast path: skip the version lookup entirely.
    pub fn optimized_append_only() -> Self {
        IndexingStrategy {
            current_not_found_or_deleted: true,
            use_update: false,
            index_into_segment_store: true,
            version_for_indexing: 1,
            early_result: None,
        }
    }

    /// §4.1 step 3: conflict detected, do not touch the segment store.
    pub fn skip_due_to_version_conflict(current_version: i64) -> Self {
        IndexingStrategy {
            current_not_found_or_deleted: false,
            use_update: false,
            index_into_segment_store: false,
            version_for_indexing: current_version,
            early_result: Some(EarlyResult::VersionConflict { current_version }),
        }
    }

    /// §4.1 step 4: ordinary write path.
    pub fn process_normally(current_not_found_or_deleted: bool, version_for_indexing: i64) -> Self {
        IndexingStrategy {
            current_not_found_or_deleted,
            use_update: !current_not_found_or_deleted,
            index_into_segment_store: true,
            version_for_indexing,
            early_result: None,
        }
    }

    /// Retry/auto-id-raise path (§4.1 step 1): the doc may already exist, so
    /// use an update rather than a blind append.
    pub fn override_existing_as_if_not_there(version_for_indexing: i64) -> Self {
        IndexingStrategy {
            current_not_found_or_deleted: true,
            use_update: true,
            index_into_segment_store: true,
            version_for_indexing,
            early_result: None,
        }
    }

    /// §4.1 replica path, `OP_STALE_OR_EQUAL`: the op is not newer than what
    /// is already applied — skip the segment store, but still advance the
    /// version map and translog.
    pub fn process_but_skip_segment_store(
        current_not_found_or_deleted: bool,
        version_for_indexing: i64,
    ) -> Self {
        IndexingStrategy {
            current_not_found_or_deleted,
            use_update: false,
            index_into_segment_store: false,
            version_for_indexing,
            early_result: None,
        }
    }

    /// §3 invariant: `use_update ⇒ index_into_segment_store`.
    pub fn is_valid(&self) -> bool {
        let inv1 = !self.use_update || self.index_into_segment_store;
        let inv2 = self.index_into_segment_store == self.early_result.is_none();
        inv1 && inv2
    }
}

/// §3 DeletionStrategy, the `Delete` counterpart of `IndexingStrategy`.
#[derive(Debug, Clone)]
pub struct DeletionStrategy {
    pub delete_from_segment_store: bool,
    pub currently_deleted: bool,
    pub version_of_deletion: i64,
    pub early_result: Option<EarlyResult>,
    /// Whether the apply phase should record `version_of_deletion` into the
    /// live version map. `false` only for `processButSkipLucene` (§4.1's
    /// `OP_STALE_OR_EQUAL`): a stale replica delete must not drag the
    /// tracked tombstone version backwards.
    pub update_version_map: bool,
}

impl DeletionStrategy {
    pub fn skip_due_to_version_conflict(current_version: i64) -> Self {
        DeletionStrategy {
            delete_from_segment_store: false,
            currently_deleted: false,
            version_of_deletion: current_version,
            early_result: Some(EarlyResult::VersionConflict { current_version }),
            update_version_map: false,
        }
    }

    pub fn process_normally(currently_deleted: bool, version_of_deletion: i64) -> Self {
        DeletionStrategy {
            delete_from_segment_store: !currently_deleted,
            currently_deleted,
            version_of_deletion,
            early_result: None,
            update_version_map: true,
        }
    }

    pub fn process_but_skip_segment_store(
        currently_deleted: bool,
        version_of_deletion: i64,
    ) -> Self {
        DeletionStrategy {
            delete_from_segment_store: false,
            currently_deleted,
            version_of_deletion,
            early_result: None,
            update_version_map: false,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.delete_from_segment_store == self.early_result.is_none()
            || self.early_result.is_some() && !self.delete_from_segment_store
    }
}

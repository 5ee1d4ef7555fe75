//! The write-path planner (§4.1): pure decision logic that turns an
//! `IndexOp`/`DeleteOp` plus current version-map/segment-store state into an
//! `IndexingStrategy`/`DeletionStrategy`, without touching the segment store
//! or translog itself. No single teacher file implements this shape — it is
//! built directly from §4.1's planning rules, using `shard-core`'s tagged
//! `IndexingStrategy`/`DeletionStrategy` constructors (§9: "tagged variants
//! over inheritance").

use crate::version_map::LiveVersionMap;
use shard_core::{
    DeleteOp, DeletionStrategy, IndexOp, IndexingStrategy, Origin, Uid, VersionType, VersionValue,
};
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::debug;

/// The result of a not-found-or-version lookup, folding in the tombstone/GC
/// rule from §4.1 step 2: "If the found entry is a tombstone older than
/// `gcDeletesMillis` AND gc-deletes is on, treat as not-present."
struct ResolvedVersion {
    current_version: i64,
    not_found_or_deleted: bool,
    /// Whether `current_version` reflects a real record (live entry, or a
    /// not-yet-expired tombstone) rather than a made-up placeholder for "no
    /// record at all". §4.1's replica/recovery path needs this distinction:
    /// a non-expired tombstone still has a version to compare an incoming
    /// op against (`OP_STALE_OR_EQUAL`/`OP_NEWER`), whereas a doc that was
    /// never seen (or whose tombstone has aged out) is a true
    /// `LUCENE_DOC_NOT_FOUND`. `not_found_or_deleted` alone can't carry this
    /// because it also feeds the primary-side conflict check, where a
    /// tombstone and true absence are equivalent.
    version_known: bool,
}

/// Resolves the current version of `uid` per §4.1 step 2: version map first,
/// then an index-side existence probe against the point-in-time reader.
///
/// The in-memory segment store used here has no independent per-document
/// version field (a real segmented index stores it in the document itself);
/// when a document is found in the store but absent from the version map —
/// e.g. right after a restart with an empty version map — this conservatively
/// resolves to version 1, the lowest version a stored document can carry.
fn resolve_doc_version(
    uid: &Uid,
    version_map: &LiveVersionMap,
    store_has_doc: bool,
    now_millis: i64,
    gc_deletes_millis: u64,
    gc_deletes_enabled: bool,
) -> ResolvedVersion {
    if let Some(v) = version_map.get(uid) {
        if v.is_delete {
            let expired = gc_deletes_enabled
                && now_millis - v.time_millis > gc_deletes_millis as i64;
            if expired {
                return ResolvedVersion {
                    current_version: 0,
                    not_found_or_deleted: true,
                    version_known: false,
                };
            }
            return ResolvedVersion {
                current_version: v.version,
                not_found_or_deleted: true,
                version_known: true,
            };
        }
        return ResolvedVersion {
            current_version: v.version,
            not_found_or_deleted: false,
            version_known: true,
        };
    }

    if store_has_doc {
        ResolvedVersion {
            current_version: 1,
            not_found_or_deleted: false,
            version_known: true,
        }
    } else {
        ResolvedVersion {
            current_version: 0,
            not_found_or_deleted: true,
            version_known: false,
        }
    }
}

/// §4.1 step 1: "may this auto-id op have been indexed before?" Only
/// applicable to primary-origin index ops carrying an auto-generated-id
/// timestamp.
fn may_have_been_indexed_before(op: &IndexOp) -> bool {
    op.meta.origin.is_primary() && op.auto_generated_id_timestamp.is_some()
}

/// §4.1 full primary/replica/recovery planner for `Index` ops.
pub fn plan_index(
    op: &IndexOp,
    version_map: &LiveVersionMap,
    store_has_doc: bool,
    max_unsafe_auto_id_timestamp: &AtomicI64,
    now_millis: i64,
    gc_deletes_millis: u64,
    gc_deletes_enabled: bool,
) -> IndexingStrategy {
    let uid = &op.meta.uid;

    if may_have_been_indexed_before(op) {
        let ts = op.auto_generated_id_timestamp.unwrap_or(0);
        if op.is_retry {
            let mut current = max_unsafe_auto_id_timestamp.load(Ordering::Acquire);
            loop {
                let next = current.max(ts);
                match max_unsafe_auto_id_timestamp.compare_exchange_weak(
                    current,
                    next,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => break,
                    Err(observed) => current = observed,
                }
            }
            debug!(uid = %uid, ts, "plan: retry auto-id, override_existing_as_if_not_there");
            return IndexingStrategy::override_existing_as_if_not_there(1);
        }

        if max_unsafe_auto_id_timestamp.load(Ordering::Acquire) >= ts {
            debug!(uid = %uid, ts, "plan: auto-id below max_unsafe watermark, override_existing_as_if_not_there");
            return IndexingStrategy::override_existing_as_if_not_there(1);
        }

        debug!(uid = %uid, ts, "plan: optimized_append_only");
        return IndexingStrategy::optimized_append_only();
    }

    if op.meta.origin.is_primary() {
        let resolved = resolve_doc_version(
            uid,
            version_map,
            store_has_doc,
            now_millis,
            gc_deletes_millis,
            gc_deletes_enabled,
        );

        let conflict = op.meta.version_type.is_version_conflict_for_writes(
            resolved.current_version,
            op.meta.version,
            resolved.not_found_or_deleted,
        );
        if conflict {
            debug!(uid = %uid, current = resolved.current_version, "plan: skip_due_to_version_conflict");
            return IndexingStrategy::skip_due_to_version_conflict(resolved.current_version);
        }

        let version_for_indexing = op
            .meta
            .version_type
            .update_version(resolved.current_version, op.meta.version);
        debug!(uid = %uid, version_for_indexing, "plan: process_normally (primary)");
        IndexingStrategy::process_normally(resolved.not_found_or_deleted, version_for_indexing)
    } else {
        // Replica / recovery path: never raise a version conflict (§4.1).
        let resolved = resolve_doc_version(
            uid,
            version_map,
            store_has_doc,
            now_millis,
            gc_deletes_millis,
            gc_deletes_enabled,
        );

        if !resolved.version_known {
            debug!(uid = %uid, "plan: replica LUCENE_DOC_NOT_FOUND, process_normally");
            return IndexingStrategy::process_normally(true, op.meta.version);
        }
        if op.meta.version <= resolved.current_version {
            debug!(uid = %uid, op_version = op.meta.version, current = resolved.current_version, "plan: replica OP_STALE_OR_EQUAL, process_but_skip_segment_store");
            return IndexingStrategy::process_but_skip_segment_store(
                resolved.not_found_or_deleted,
                op.meta.version,
            );
        }
        debug!(uid = %uid, op_version = op.meta.version, "plan: replica OP_NEWER, process_normally");
        IndexingStrategy::process_normally(resolved.not_found_or_deleted, op.meta.version)
    }
}

/// §4.1's `DeletionStrategy` counterpart. Deletes never take the auto-id fast
/// path.
pub fn plan_delete(
    op: &DeleteOp,
    version_map: &LiveVersionMap,
    store_has_doc: bool,
    now_millis: i64,
    gc_deletes_millis: u64,
    gc_deletes_enabled: bool,
) -> DeletionStrategy {
    let uid = &op.meta.uid;
    let resolved = resolve_doc_version(
        uid,
        version_map,
        store_has_doc,
        now_millis,
        gc_deletes_millis,
        gc_deletes_enabled,
    );

    if op.meta.origin.is_primary() {
        let conflict = op.meta.version_type.is_version_conflict_for_writes(
            resolved.current_version,
            op.meta.version,
            resolved.not_found_or_deleted,
        );
        if conflict {
            debug!(uid = %uid, current = resolved.current_version, "plan: delete skip_due_to_version_conflict");
            return DeletionStrategy::skip_due_to_version_conflict(resolved.current_version);
        }
        let version_of_deletion = op
            .meta
            .version_type
            .update_version(resolved.current_version, op.meta.version);
        debug!(uid = %uid, version_of_deletion, "plan: delete process_normally (primary)");
        DeletionStrategy::process_normally(resolved.not_found_or_deleted, version_of_deletion)
    } else if !resolved.version_known {
        debug!(uid = %uid, "plan: delete replica LUCENE_DOC_NOT_FOUND, process_normally");
        DeletionStrategy::process_normally(true, op.meta.version)
    } else if op.meta.version <= resolved.current_version {
        debug!(uid = %uid, op_version = op.meta.version, current = resolved.current_version, "plan: delete replica OP_STALE_OR_EQUAL, process_but_skip_segment_store");
        DeletionStrategy::process_but_skip_segment_store(resolved.not_found_or_deleted, op.meta.version)
    } else {
        debug!(uid = %uid, op_version = op.meta.version, "plan: delete replica OP_NEWER, process_normally");
        DeletionStrategy::process_normally(resolved.not_found_or_deleted, op.meta.version)
    }
}

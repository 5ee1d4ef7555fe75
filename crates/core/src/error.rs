use thiserror::Error;

/// Unified error taxonomy for the write engine (§7).
///
/// Every failure kind named in the error-handling design is a variant here,
/// each with a named constructor and with classification predicates used by
/// callers to decide propagation (capture into a result vs. escape and fail
/// the engine) without matching on variants inline at every call site.
#[derive(Debug, Error)]
pub enum EngineError {
    // === Version conflicts ===
    /// op.version disagrees with current under its versionType. Returned as
    /// a failure inside `IndexResult`/`DeleteResult` on primaries; never
    /// raised on replicas (§7).
    #[error("version conflict: current version is {current_version}")]
    VersionConflict { current_version: i64 },

    // === Document-level failures ===
    /// Segment writer rejected one document but remains healthy (no tragic
    /// exception recorded). Surfaced in the result; the engine continues.
    #[error("document failure for uid {uid}: {message}")]
    DocumentFailure { uid: String, message: String },

    // === Tragic events ===
    /// Segment writer or translog reported an unrecoverable error. The
    /// engine transitions to `Failed` and is unusable afterwards.
    #[error("tragic event: {message}")]
    TragicEvent {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    // === Recovery ===
    /// Translog replay failed, or the translog is corrupted/absent when a
    /// recovery was expected.
    #[error("recovery failed: {message}")]
    RecoveryFailure { message: String },

    // === Lifecycle ===
    /// Operation attempted on a failed/closed engine.
    #[error("engine already closed: {reason}")]
    AlreadyClosed { reason: String },

    // === Downstream I/O wrapping ===
    #[error("flush failed: {message}")]
    FlushFailed { message: String },
    #[error("refresh failed: {message}")]
    RefreshFailed { message: String },
    #[error("snapshot failed: {message}")]
    SnapshotFailed { message: String },

    // === Input validation ===
    #[error("invalid operation: {message}")]
    InvalidOperation { message: String },

    // === I/O ===
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

impl EngineError {
    pub fn version_conflict(current_version: i64) -> Self {
        EngineError::VersionConflict { current_version }
    }

    pub fn document_failure(uid: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::DocumentFailure {
            uid: uid.into(),
            message: message.into(),
        }
    }

    pub fn tragic(message: impl Into<String>) -> Self {
        EngineError::TragicEvent {
            message: message.into(),
            source: None,
        }
    }

    pub fn tragic_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        EngineError::TragicEvent {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn recovery_failure(message: impl Into<String>) -> Self {
        EngineError::RecoveryFailure {
            message: message.into(),
        }
    }

    pub fn already_closed(reason: impl Into<String>) -> Self {
        EngineError::AlreadyClosed {
            reason: reason.into(),
        }
    }

    pub fn flush_failed(message: impl Into<String>) -> Self {
        EngineError::FlushFailed {
            message: message.into(),
        }
    }

    pub fn refresh_failed(message: impl Into<String>) -> Self {
        EngineError::RefreshFailed {
            message: message.into(),
        }
    }

    pub fn snapshot_failed(message: impl Into<String>) -> Self {
        EngineError::SnapshotFailed {
            message: message.into(),
        }
    }

    pub fn invalid_operation(message: impl Into<String>) -> Self {
        EngineError::InvalidOperation {
            message: message.into(),
        }
    }

    /// §7: tragic events escape and also call `failEngine`; everything else
    /// is captured into a result.
    pub fn is_tragic(&self) -> bool {
        matches!(self, EngineError::TragicEvent { .. })
    }

    /// §7: document failures and version conflicts are captured into the
    /// op result rather than propagated/escaping.
    pub fn is_document_level(&self) -> bool {
        matches!(
            self,
            EngineError::DocumentFailure { .. } | EngineError::VersionConflict { .. }
        )
    }

    pub fn is_version_conflict(&self) -> bool {
        matches!(self, EngineError::VersionConflict { .. })
    }

    pub fn is_already_closed(&self) -> bool {
        matches!(self, EngineError::AlreadyClosed { .. })
    }

    pub fn is_recovery_failure(&self) -> bool {
        matches!(self, EngineError::RecoveryFailure { .. })
    }

    /// §7: "Refresh failures fail the engine only if the cause is not
    /// AlreadyClosed-in-a-tragic-context" — i.e. a refresh/flush/snapshot
    /// failure should escalate to `failEngine` unless it is really just an
    /// already-closed engine being hit again.
    pub fn should_fail_engine(&self) -> bool {
        self.is_tragic()
            || ((matches!(
                self,
                EngineError::FlushFailed { .. }
                    | EngineError::RefreshFailed { .. }
                    | EngineError::SnapshotFailed { .. }
            )) && !self.is_already_closed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_conflict_is_document_level_not_tragic() {
        let e = EngineError::version_conflict(3);
        assert!(e.is_document_level());
        assert!(!e.is_tragic());
        assert!(!e.should_fail_engine());
    }

    #[test]
    fn tragic_event_should_fail_engine() {
        let e = EngineError::tragic("disk full");
        assert!(e.is_tragic());
        assert!(e.should_fail_engine());
    }

    #[test]
    fn document_failure_keeps_engine_open() {
        let e = EngineError::document_failure("uid-1", "mapping rejected field");
        assert!(e.is_document_level());
        assert!(!e.should_fail_engine());
    }

    #[test]
    fn flush_failed_against_closed_engine_does_not_escalate() {
        let closed = EngineError::already_closed("engine closed");
        assert!(closed.is_already_closed());
        let flush_failed = EngineError::flush_failed("io error");
        assert!(flush_failed.should_fail_engine());
    }

    #[test]
    fn display_messages_are_human_readable() {
        let e = EngineError::recovery_failure("translog missing");
        assert_eq!(e.to_string(), "recovery failed: translog missing");
    }
}

use std::fmt;

/// A unique term identifying a document within a shard.
///
/// Wraps the raw uid bytes (e.g. `_id` field bytes after analysis). Cheap to
/// clone and hash; used as the striped-lock key and the version-map key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uid(Vec<u8>);

impl Uid {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Uid(bytes.into())
    }

    pub fn from_str(s: &str) -> Self {
        Uid(s.as_bytes().to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "{}", s),
            Err(_) => write!(f, "{:?}", self.0),
        }
    }
}

impl From<&str> for Uid {
    fn from(s: &str) -> Self {
        Uid::from_str(s)
    }
}

impl From<String> for Uid {
    fn from(s: String) -> Self {
        Uid(s.into_bytes())
    }
}

/// Version conflict semantics, §3/§4.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionType {
    /// Engine-assigned monotonic versions; a write always succeeds unless the
    /// caller supplied an explicit version that mismatches.
    Internal,
    /// Caller-assigned external version; write succeeds iff `op.version >
    /// current`.
    External,
    /// Like `External` but accepts equality too (`op.version >= current`).
    ExternalGte,
    /// Bypasses conflict detection entirely (used by certain recovery paths).
    Force,
}

/// Sentinel meaning "don't care, match anything" for `Operation::version`
/// under `VersionType::Internal`.
pub const MATCH_ANY: i64 = -1;

/// Sentinel meaning "the caller asserts the document must not exist".
pub const MATCH_DELETED: i64 = -3;

impl VersionType {
    /// §4.1 step 3: does `op.version` conflict with `current` given the
    /// current not-found/deleted state?
    pub fn is_version_conflict_for_writes(
        self,
        current_version: i64,
        op_version: i64,
        current_not_found_or_deleted: bool,
    ) -> bool {
        match self {
            VersionType::Internal => {
                if op_version == MATCH_ANY {
                    false
                } else if op_version == MATCH_DELETED {
                    !current_not_found_or_deleted
                } else {
                    current_not_found_or_deleted || op_version != current_version
                }
            }
            VersionType::External => {
                !current_not_found_or_deleted && op_version <= current_version
            }
            VersionType::ExternalGte => {
                !current_not_found_or_deleted && op_version < current_version
            }
            VersionType::Force => false,
        }
    }

    /// §4.1 step 4: the version to record for this write.
    pub fn update_version(self, current_version: i64, op_version: i64) -> i64 {
        match self {
            VersionType::Internal => {
                if op_version == MATCH_ANY {
                    current_version.max(0) + 1
                } else {
                    op_version
                }
            }
            VersionType::External | VersionType::ExternalGte | VersionType::Force => op_version,
        }
    }
}

/// Where an operation originated, §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Primary,
    Replica,
    PeerRecovery,
    LocalTranslogRecovery,
}

impl Origin {
    /// True for both recovery origins. Note this is broader than "skips
    /// re-appending to the translog" (§4.1): only `LocalTranslogRecovery`
    /// skips that, since a `PeerRecovery` op still needs to become durable
    /// on this shard.
    pub fn is_recovery(self) -> bool {
        matches!(self, Origin::LocalTranslogRecovery | Origin::PeerRecovery)
    }

    /// §4.1: the primary-only auto-id/version-conflict planning path applies
    /// only to `Primary`; everything else takes the replica/recovery path.
    pub fn is_primary(self) -> bool {
        matches!(self, Origin::Primary)
    }
}

/// §6: determines initial commit, recovery eligibility, and tolerance for
/// absent commit metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    CreateIndexAndTranslog,
    OpenIndexCreateTranslog,
    OpenIndexAndTranslog,
}

impl OpenMode {
    /// §4.4: the recovery driver runs exactly once, iff opened this way.
    pub fn requires_recovery(self) -> bool {
        matches!(self, OpenMode::OpenIndexAndTranslog)
    }
}

/// §3: binds a translog instance to a segment-store commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslogGeneration {
    pub uuid: Option<String>,
    pub file_generation: u64,
}

/// §3 lifecycle states, plus the orthogonal `Failed` flag tracked separately
/// by the lifecycle controller (see `shard_engine::lifecycle`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Open,
    Recovering,
    Ready,
    Closing,
    Closed,
}

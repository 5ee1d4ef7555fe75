//! Shared vocabulary for the per-shard write engine: the operation/version data
//! model (§3), the error taxonomy (§7), and small identifier newtypes used
//! across every other `shard-*` crate.

mod error;
mod operation;
mod types;

// Identifiers & enums
pub use types::{
    EngineState, OpenMode, Origin, TranslogGeneration, Uid, VersionType, MATCH_ANY, MATCH_DELETED,
};

// Operation / version data model
pub use operation::{
    DeleteOp, DeletionStrategy, EarlyResult, IndexOp, IndexingStrategy, OpMeta, Operation,
    VersionValue,
};

// Error taxonomy
pub use error::{EngineError, EngineResult};

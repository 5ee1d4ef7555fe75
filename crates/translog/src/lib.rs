//! The translog: the external durable append log named in §1/§6 of the
//! write engine's spec, implemented concretely here rather than treated as
//! an opaque collaborator, so the rest of the workspace has something real
//! to recover against.

mod record;
mod tragic;
mod writer;

pub use record::{Location, RecordKind, TranslogRecord, TranslogSnapshot};
pub use tragic::TragicChannel;
pub use writer::{DurabilityMode, Translog, TranslogConfig};

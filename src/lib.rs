//! # shard-write-engine
//!
//! The per-shard write engine behind a distributed search index: plans,
//! applies, and durably records index/delete operations against a segment
//! store and a translog, coordinating commit, refresh, merge throttling, and
//! crash recovery around them.
//!
//! ```no_run
//! use shard_write_engine::{Engine, EngineConfig};
//! use shard_core::OpenMode;
//! # use std::sync::Arc;
//! # fn build_store() -> (Arc<dyn shard_segment_store::SegmentWriter>, Arc<shard_segment_store::SearcherManager>) { unimplemented!() }
//!
//! fn main() -> shard_core::EngineResult<()> {
//!     let (segment_store, searcher_manager) = build_store();
//!     let engine = Engine::open(
//!         OpenMode::CreateIndexAndTranslog,
//!         "./data/shard-0/translog",
//!         EngineConfig::default(),
//!         segment_store,
//!         searcher_manager,
//!     )?;
//!     engine.close();
//!     Ok(())
//! }
//! ```
//!
//! Internal crates (core, translog, segment-store, concurrency) are not
//! re-exported wholesale; only the engine's public contract is stable here.

pub use shard_engine::*;

#![forbid(unsafe_code)]

//! Identity virtualization: stable alternate forms for platform-opaque ids.
//!
//! Two services live here:
//! - [`UnionCache`], a strict bijection between raw ids and the union ids used
//!   by the platform's markup subsystem;
//! - [`IdMap`], numeric virtual ids for protocols that expect integer user and
//!   group ids (sequential, hashed, or "pro" group-scoped hashing).

mod numeric;
mod store;
mod union;

pub use numeric::{IdMap, IdMapConfig, hashed_id};
pub use store::{KvStore, MemoryKvStore};
pub use union::UnionCache;

use thiserror::Error;

/// Identity service errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdMapError {
	#[error("empty identifier")]
	EmptyId,

	#[error("pro id mapping requires hashed ids (set idmap.hash_ids = true and rebuild the id store)")]
	ProRequiresHashIds,

	#[error("id store: {0}")]
	Store(String),

	#[error("corrupt id store value for {key}: {value:?}")]
	Corrupt { key: String, value: String },

	#[error("sequence exhausted")]
	SequenceExhausted,
}

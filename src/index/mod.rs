//! Index Module
//!
//! In-memory map from segment id to (key → Record), mirrored to one
//! snapshot file per segment.
//!
//! ## Responsibilities
//! - Resolve a key to the segment and byte range holding its latest entry
//! - Keep every key in at most one segment's sub-index
//! - Persist a segment's sub-index whenever it changes
//! - Rebuild the whole index from snapshots on startup, without reading
//!   any segment data
//!
//! ## Data Structure Choice
//! BTreeMap keyed by segment id (ordered, so lookups walk newest → oldest)
//! of HashMap sub-indexes, wrapped in a RwLock.

mod cache;

use std::collections::HashMap;

use crate::codec::Record;

pub use cache::IndexCache;

/// One segment's key → record mapping
pub type SubIndex = HashMap<String, Record>;

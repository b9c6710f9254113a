//! Segment Module
//!
//! Append-only data files holding `key:value;` log entries.
//!
//! ## Responsibilities
//! - Track the ordered set of segment ids
//! - Append to the active (highest id) segment only
//! - Rotate to a new segment once the active one exceeds the threshold
//! - Exact byte-range reads and copies against sealed segments
//! - Retire and install segments on behalf of compaction
//!
//! ## Directory Layout
//! ```text
//! {data_dir}/
//!   ├── db0      (sealed)
//!   ├── db1      (sealed)
//!   └── db2      (active, highest id)
//! ```

mod reader;
mod store;

pub use reader::SegmentReader;
pub use store::SegmentStore;

/// Identifier of one segment, assigned monotonically
pub type SegmentId = u64;

/// Parse the id out of a `<prefix><digits>` file name
///
/// "db42" with prefix "db" → Some(42); "db42.tmp" → None
pub(crate) fn parse_file_id(file_name: &str, prefix: &str) -> Option<SegmentId> {
    let digits = file_name.strip_prefix(prefix)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

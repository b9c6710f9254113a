//! Record Codec Module
//!
//! Byte formats shared by the segment store, index cache, and compaction.
//!
//! ## Responsibilities
//! - Frame one key/value pair as a log entry (`key:value;`)
//! - Serialize the `(offset, size)` pair locating an entry
//! - Serialize one segment's sub-index into a snapshot file
//!
//! ## Log Entry Format
//! ```text
//! ┌────────────┬─────┬──────────────┬─────┐
//! │ Key (UTF-8)│ ':' │ Value (UTF-8)│ ';' │
//! └────────────┴─────┴──────────────┴─────┘
//! ```
//! There is no length prefix: entries are located purely through the index.
//! Neither delimiter may appear inside a key or value.

mod entry;
mod record;
mod snapshot;

pub use entry::{decode_entry, encode_entry, validate_entry, ENTRY_TERMINATOR, KEY_VALUE_SEPARATOR};
pub use record::{decode_record, encode_record, Record, RECORD_SIZE};
pub use snapshot::{decode_snapshot, encode_snapshot, SNAPSHOT_MAGIC, SNAPSHOT_VERSION};

//! Index record
//!
//! Locates one log entry inside a specific segment file.

use crate::error::{DriftError, Result};

/// Encoded size: Offset (8) + Size (4) = 12 bytes
pub const RECORD_SIZE: usize = 12;

/// Byte range of one encoded entry within a segment
///
/// Covers the whole `key:value;` entry, so compaction can copy it verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Record {
    /// Offset of the first byte of the entry
    pub offset: u64,

    /// Length of the entry in bytes
    pub size: u32,
}

impl Record {
    pub fn new(offset: u64, size: u32) -> Self {
        Self { offset, size }
    }

    /// Offset one past the last byte of the entry
    ///
    /// A record read from a damaged snapshot may not fit in a `u64`.
    pub fn end(&self) -> Result<u64> {
        self.offset.checked_add(u64::from(self.size)).ok_or_else(|| {
            DriftError::invariant(format!(
                "record at offset {} with size {} overflows",
                self.offset, self.size
            ))
        })
    }
}

/// Encode a record as `[offset: u64 LE][size: u32 LE]`
pub fn encode_record(record: &Record) -> [u8; RECORD_SIZE] {
    let mut bytes = [0u8; RECORD_SIZE];
    bytes[0..8].copy_from_slice(&record.offset.to_le_bytes());
    bytes[8..12].copy_from_slice(&record.size.to_le_bytes());
    bytes
}

/// Decode a record produced by [`encode_record`]
pub fn decode_record(bytes: &[u8]) -> Result<Record> {
    if bytes.len() != RECORD_SIZE {
        return Err(DriftError::InvalidInput(format!(
            "record must be {} bytes, got {}",
            RECORD_SIZE,
            bytes.len()
        )));
    }

    let mut offset = [0u8; 8];
    let mut size = [0u8; 4];
    offset.copy_from_slice(&bytes[0..8]);
    size.copy_from_slice(&bytes[8..12]);

    Ok(Record {
        offset: u64::from_le_bytes(offset),
        size: u32::from_le_bytes(size),
    })
}

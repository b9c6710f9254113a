//! Index snapshot format
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Header (14 bytes)                                       │
//! │   Magic: "DKVS" (4) | Version: u16 (2) | Count: u64 (8) │
//! ├─────────────────────────────────────────────────────────┤
//! │ Entries (variable), ascending offset order              │
//! │   [KeyLen: u32][Key][Offset: u64][Size: u32]            │
//! ├─────────────────────────────────────────────────────────┤
//! │ Footer (4 bytes)                                        │
//! │   CRC32 of every preceding byte                         │
//! └─────────────────────────────────────────────────────────┘
//! ```
//! All integers are little-endian.

use std::collections::HashMap;

use super::record::{decode_record, encode_record, Record, RECORD_SIZE};

/// Magic bytes identifying a DriftKV index snapshot
pub const SNAPSHOT_MAGIC: &[u8; 4] = b"DKVS";

/// Current snapshot format version
pub const SNAPSHOT_VERSION: u16 = 1;

/// Magic (4) + Version (2) + EntryCount (8)
const HEADER_SIZE: usize = 14;

/// CRC32 (4)
const FOOTER_SIZE: usize = 4;

/// Serialize one segment's sub-index
pub fn encode_snapshot(entries: &HashMap<String, Record>) -> Vec<u8> {
    let mut sorted: Vec<(&String, &Record)> = entries.iter().collect();
    sorted.sort_by(|a, b| (a.1.offset, a.0).cmp(&(b.1.offset, b.0)));

    let body_len: usize = sorted
        .iter()
        .map(|(key, _)| 4 + key.len() + RECORD_SIZE)
        .sum();
    let mut bytes = Vec::with_capacity(HEADER_SIZE + body_len + FOOTER_SIZE);

    bytes.extend_from_slice(SNAPSHOT_MAGIC);
    bytes.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
    bytes.extend_from_slice(&(sorted.len() as u64).to_le_bytes());

    for (key, record) in sorted {
        bytes.extend_from_slice(&(key.len() as u32).to_le_bytes());
        bytes.extend_from_slice(key.as_bytes());
        bytes.extend_from_slice(&encode_record(record));
    }

    let crc = crc32fast::hash(&bytes);
    bytes.extend_from_slice(&crc.to_le_bytes());
    bytes
}

/// Parse a snapshot produced by [`encode_snapshot`]
///
/// Returns a human-readable reason on failure; the caller attaches the path.
pub fn decode_snapshot(bytes: &[u8]) -> Result<HashMap<String, Record>, String> {
    if bytes.len() < HEADER_SIZE + FOOTER_SIZE {
        return Err(format!("truncated: {} bytes", bytes.len()));
    }

    let (content, footer) = bytes.split_at(bytes.len() - FOOTER_SIZE);
    let stored_crc = u32::from_le_bytes(take::<4>(footer, 0)?);
    let actual_crc = crc32fast::hash(content);
    if stored_crc != actual_crc {
        return Err(format!(
            "checksum mismatch: stored {:08x}, computed {:08x}",
            stored_crc, actual_crc
        ));
    }

    if &content[0..4] != SNAPSHOT_MAGIC {
        return Err(format!("invalid magic {:?}", &content[0..4]));
    }

    let version = u16::from_le_bytes(take::<2>(content, 4)?);
    if version != SNAPSHOT_VERSION {
        return Err(format!("unsupported version {}", version));
    }

    let count = u64::from_le_bytes(take::<8>(content, 6)?);

    let mut entries = HashMap::new();
    let mut pos = HEADER_SIZE;
    while pos < content.len() {
        let key_len = u32::from_le_bytes(take::<4>(content, pos)?) as usize;
        pos += 4;

        let key_bytes = content
            .get(pos..pos + key_len)
            .ok_or_else(|| format!("key at byte {} runs past the end", pos))?;
        let key = std::str::from_utf8(key_bytes)
            .map_err(|e| format!("key at byte {} is not UTF-8: {}", pos, e))?
            .to_string();
        pos += key_len;

        let record_bytes = content
            .get(pos..pos + RECORD_SIZE)
            .ok_or_else(|| format!("record at byte {} runs past the end", pos))?;
        let record = decode_record(record_bytes).map_err(|e| e.to_string())?;
        pos += RECORD_SIZE;

        if entries.insert(key, record).is_some() {
            return Err(format!("duplicate key ending at byte {}", pos));
        }
    }

    if entries.len() as u64 != count {
        return Err(format!(
            "header declares {} entries, found {}",
            count,
            entries.len()
        ));
    }

    Ok(entries)
}

fn take<const N: usize>(bytes: &[u8], at: usize) -> Result<[u8; N], String> {
    let mut out = [0u8; N];
    let slice = bytes
        .get(at..at + N)
        .ok_or_else(|| format!("field at byte {} runs past the end", at))?;
    out.copy_from_slice(slice);
    Ok(out)
}

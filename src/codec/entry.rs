//! Log entry framing
//!
//! Encodes and decodes the textual `key:value;` entry stored in segments.

use crate::error::{DriftError, Result};

/// Separates the key from the value
pub const KEY_VALUE_SEPARATOR: u8 = b':';

/// Terminates every entry
pub const ENTRY_TERMINATOR: u8 = b';';

/// Reject keys and values that would break the framing
///
/// The format has no escaping, so `:` and `;` are forbidden on both sides.
pub fn validate_entry(key: &str, value: &str) -> Result<()> {
    for (what, text) in [("key", key), ("value", value)] {
        if let Some(c) = text
            .bytes()
            .find(|&b| b == KEY_VALUE_SEPARATOR || b == ENTRY_TERMINATOR)
        {
            return Err(DriftError::InvalidInput(format!(
                "{} must not contain {:?}",
                what, c as char
            )));
        }
    }
    Ok(())
}

/// Encode a key/value pair as `key:value;`
///
/// Does not validate; call [`validate_entry`] first.
pub fn encode_entry(key: &str, value: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(key.len() + value.len() + 2);
    bytes.extend_from_slice(key.as_bytes());
    bytes.push(KEY_VALUE_SEPARATOR);
    bytes.extend_from_slice(value.as_bytes());
    bytes.push(ENTRY_TERMINATOR);
    bytes
}

/// Decode a complete `key:value;` entry into its key and value
///
/// The bytes come from a range recorded in the index, so any malformation
/// means the index points at the wrong place.
pub fn decode_entry(bytes: &[u8]) -> Result<(&str, &str)> {
    let body = match bytes.split_last() {
        Some((&ENTRY_TERMINATOR, body)) => body,
        _ => {
            return Err(DriftError::invariant(format!(
                "entry of {} bytes is missing its terminator",
                bytes.len()
            )))
        }
    };

    let text = std::str::from_utf8(body)
        .map_err(|e| DriftError::invariant(format!("entry is not valid UTF-8: {}", e)))?;

    text.split_once(KEY_VALUE_SEPARATOR as char)
        .ok_or_else(|| DriftError::invariant("entry is missing its key separator"))
}

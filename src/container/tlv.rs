//! Tag-length-value serialization of the entry map.
//!
//! Each entry becomes one record:
//!
//! ```text
//! [tag: 1 byte][key_len: 4 bytes LE][key][value_len: 4 bytes LE][value]
//! ```
//!
//! Records are written in `BTreeMap` order, so the same entry set always
//! produces the same byte stream regardless of insertion order.

use std::collections::BTreeMap;

use zeroize::Zeroizing;

use crate::errors::{CofferError, Result};

/// Record tag for a key/value entry.  Future format revisions may add
/// further tags; unknown tags are a parse error, not a skip.
const ENTRY_TAG: u8 = 1;

/// Serialize the entry map into a TLV byte stream.
///
/// The returned buffer holds plaintext secrets and is zeroized on drop.
pub fn encode_entries(entries: &BTreeMap<String, String>) -> Zeroizing<Vec<u8>> {
    let total: usize = entries
        .iter()
        .map(|(k, v)| 1 + 4 + k.len() + 4 + v.len())
        .sum();
    let mut buffer = Zeroizing::new(Vec::with_capacity(total));

    for (key, value) in entries {
        buffer.push(ENTRY_TAG);
        buffer.extend_from_slice(&(key.len() as u32).to_le_bytes());
        buffer.extend_from_slice(key.as_bytes());
        buffer.extend_from_slice(&(value.len() as u32).to_le_bytes());
        buffer.extend_from_slice(value.as_bytes());
    }

    buffer
}

/// Parse a TLV byte stream back into the entry map.
///
/// Only ever called on authenticated plaintext, but still validates
/// every length against the remaining input so a corrupt stream fails
/// with `InvalidFormat` instead of panicking.
pub fn decode_entries(data: &[u8]) -> Result<BTreeMap<String, String>> {
    let mut entries = BTreeMap::new();
    let mut cursor = 0usize;

    while cursor < data.len() {
        let tag = data[cursor];
        cursor += 1;
        if tag != ENTRY_TAG {
            return Err(CofferError::InvalidFormat(format!(
                "unknown TLV record tag {tag}"
            )));
        }

        let key = read_field(data, &mut cursor)?;
        let value = read_field(data, &mut cursor)?;

        let key = String::from_utf8(key)
            .map_err(|_| CofferError::InvalidFormat("entry key is not valid UTF-8".into()))?;
        let value = String::from_utf8(value)
            .map_err(|_| CofferError::InvalidFormat("entry value is not valid UTF-8".into()))?;

        entries.insert(key, value);
    }

    Ok(entries)
}

/// Read one length-prefixed field, advancing the cursor.
fn read_field(data: &[u8], cursor: &mut usize) -> Result<Vec<u8>> {
    let end = cursor
        .checked_add(4)
        .filter(|end| *end <= data.len())
        .ok_or_else(|| CofferError::InvalidFormat("truncated TLV length".into()))?;
    let len = u32::from_le_bytes(
        data[*cursor..end]
            .try_into()
            .map_err(|_| CofferError::InvalidFormat("bad TLV length".into()))?,
    ) as usize;
    *cursor = end;

    let field_end = cursor
        .checked_add(len)
        .filter(|end| *end <= data.len())
        .ok_or_else(|| CofferError::InvalidFormat("TLV field overruns input".into()))?;
    let field = data[*cursor..field_end].to_vec();
    *cursor = field_end;
    Ok(field)
}

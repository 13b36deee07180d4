//! Binary shard-file format.
//!
//! A `.coffer` file has this layout:
//!
//! ```text
//! [COFR: 4 bytes][version: 1 byte][data: 1 byte][parity: 1 byte]
//! [shard_len: 4 bytes LE][payload_len: 8 bytes LE][revision: 8 bytes LE]
//! [nonce: 24 bytes][BLAKE3 digest: 32 bytes x total][shard payloads]
//! ```
//!
//! - **Magic** (`COFR`): identifies the file as a Coffer vault.
//! - **Version**: format version (currently `1`).  A file written by a
//!   newer format refuses to load with `UnsupportedVersion` rather than
//!   attempting best-effort parsing.
//! - **Geometry**: data and parity shard counts plus the shard length.
//! - **Payload length**: ciphertext size before zero-padding.
//! - **Revision**: the container's save counter, readable without
//!   decryption so the sync engine can compare versions.
//! - **Digest list**: one BLAKE3 digest per shard, in shard order.
//!
//! Parsing tolerates a truncated or bit-rotted shard region: shards that
//! fall outside the available bytes come back as `None` and the erasure
//! layer decides whether enough survive.  Header damage is fatal.

use crate::crypto::encryption::NONCE_LEN;
use crate::erasure::{Geometry, ShardSet, DIGEST_LEN, MIN_SHARD_LEN};
use crate::errors::{CofferError, Result};

/// Magic bytes at the start of every shard file.
const MAGIC: &[u8; 4] = b"COFR";

/// Current binary format version.
pub const CURRENT_VERSION: u8 = 1;

/// Fixed-size prefix: 4 (magic) + 1 (version) + 1 (data) + 1 (parity)
/// + 4 (shard_len) + 8 (payload_len) + 8 (revision) + 24 (nonce).
const PREFIX_LEN: usize = 51;

/// Upper bound on a single shard, to reject absurd headers before
/// allocating.
const MAX_SHARD_LEN: usize = 256 * 1024 * 1024;

/// Serialize a complete shard set into the on-disk byte layout.
///
/// Every shard must be present; commit always works with freshly split
/// sets.
pub fn serialize(set: &ShardSet) -> Result<Vec<u8>> {
    let total = set.geometry.total_shards();
    let data = u8::try_from(set.geometry.data_shards)
        .map_err(|_| CofferError::InvalidFormat("data shard count exceeds u8".into()))?;
    let parity = u8::try_from(set.geometry.parity_shards)
        .map_err(|_| CofferError::InvalidFormat("parity shard count exceeds u8".into()))?;
    let shard_len = u32::try_from(set.shard_len)
        .map_err(|_| CofferError::InvalidFormat("shard length exceeds u32".into()))?;

    let mut buf =
        Vec::with_capacity(PREFIX_LEN + total * DIGEST_LEN + total * set.shard_len);
    buf.extend_from_slice(MAGIC);
    buf.push(CURRENT_VERSION);
    buf.push(data);
    buf.push(parity);
    buf.extend_from_slice(&shard_len.to_le_bytes());
    buf.extend_from_slice(&set.payload_len.to_le_bytes());
    buf.extend_from_slice(&set.revision.to_le_bytes());
    buf.extend_from_slice(&set.nonce);

    for digest in &set.digests {
        buf.extend_from_slice(digest);
    }
    for shard in &set.shards {
        let shard = shard
            .as_ref()
            .ok_or_else(|| CofferError::InvalidFormat("cannot serialize incomplete shard set".into()))?;
        buf.extend_from_slice(shard);
    }

    Ok(buf)
}

/// Parse the on-disk byte layout back into a shard set.
///
/// Shards are extracted without digest verification; the erasure layer
/// verifies and repairs on reconstruction.
pub fn parse(data: &[u8]) -> Result<ShardSet> {
    if data.len() < PREFIX_LEN {
        return Err(CofferError::InvalidFormat(
            "file too small to be a valid vault".into(),
        ));
    }

    if &data[0..4] != MAGIC {
        return Err(CofferError::InvalidFormat(
            "missing COFR magic bytes".into(),
        ));
    }

    let version = data[4];
    if version != CURRENT_VERSION {
        return Err(CofferError::UnsupportedVersion(version));
    }

    let geometry = Geometry {
        data_shards: data[5] as usize,
        parity_shards: data[6] as usize,
        min_shard_len: MIN_SHARD_LEN,
    };
    geometry
        .validate()
        .map_err(|_| CofferError::InvalidFormat("invalid shard geometry in header".into()))?;

    let shard_len = u32::from_le_bytes(
        data[7..11]
            .try_into()
            .map_err(|_| CofferError::InvalidFormat("bad shard length".into()))?,
    ) as usize;
    if shard_len == 0 || shard_len > MAX_SHARD_LEN {
        return Err(CofferError::InvalidFormat(format!(
            "implausible shard length {shard_len}"
        )));
    }

    let payload_len = u64::from_le_bytes(
        data[11..19]
            .try_into()
            .map_err(|_| CofferError::InvalidFormat("bad payload length".into()))?,
    );
    let capacity = (shard_len * geometry.data_shards) as u64;
    if payload_len > capacity {
        return Err(CofferError::InvalidFormat(
            "payload length exceeds shard capacity".into(),
        ));
    }

    let revision = u64::from_le_bytes(
        data[19..27]
            .try_into()
            .map_err(|_| CofferError::InvalidFormat("bad revision".into()))?,
    );

    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&data[27..PREFIX_LEN]);

    let total = geometry.total_shards();
    let digests_end = PREFIX_LEN + total * DIGEST_LEN;
    if data.len() < digests_end {
        return Err(CofferError::InvalidFormat(
            "digest list exceeds file size".into(),
        ));
    }

    let mut digests = Vec::with_capacity(total);
    for i in 0..total {
        let start = PREFIX_LEN + i * DIGEST_LEN;
        let mut digest = [0u8; DIGEST_LEN];
        digest.copy_from_slice(&data[start..start + DIGEST_LEN]);
        digests.push(digest);
    }

    // Extract shards; anything beyond the available bytes is missing.
    let mut shards: Vec<Option<Vec<u8>>> = Vec::with_capacity(total);
    for i in 0..total {
        let start = digests_end + i * shard_len;
        let end = start + shard_len;
        if end <= data.len() {
            shards.push(Some(data[start..end].to_vec()));
        } else {
            shards.push(None);
        }
    }

    Ok(ShardSet {
        geometry,
        shard_len,
        payload_len,
        revision,
        nonce,
        digests,
        shards,
    })
}

/// Read the revision marker from serialized shard-file bytes.
///
/// Used by the sync engine to compare versions without reconstructing.
pub fn revision_of(data: &[u8]) -> Result<u64> {
    Ok(parse(data)?.revision)
}

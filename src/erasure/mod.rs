//! Erasure-coded durability layer.
//!
//! The encrypted container is split into `data + parity` Reed-Solomon
//! shards over GF(2^8).  Each shard carries a BLAKE3 digest computed
//! independently of the erasure math, so disk-level corruption is
//! detected shard-by-shard before reconstruction is attempted.
//! Reconstruction succeeds with any `data`-many verifying shards and
//! recomputes the rest algebraically; fewer is unrecoverable.

use reed_solomon_erasure::galois_8::ReedSolomon;

use crate::container::Container;
use crate::crypto::encryption::NONCE_LEN;
use crate::errors::{CofferError, Result};

/// Reference shard layout: 8 data + 4 parity.
pub const DEFAULT_DATA_SHARDS: usize = 8;
pub const DEFAULT_PARITY_SHARDS: usize = 4;

/// Floor on the shard payload size.  Small vaults are padded up so each
/// shard spans at least one filesystem block, which is the unit disk
/// corruption tends to hit.
pub const MIN_SHARD_LEN: usize = 4096;

/// Size of a BLAKE3 shard digest in bytes.
pub const DIGEST_LEN: usize = 32;

/// Shard layout for one vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub data_shards: usize,
    pub parity_shards: usize,
    pub min_shard_len: usize,
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            data_shards: DEFAULT_DATA_SHARDS,
            parity_shards: DEFAULT_PARITY_SHARDS,
            min_shard_len: MIN_SHARD_LEN,
        }
    }
}

impl Geometry {
    /// Total shard count (data + parity).
    pub fn total_shards(&self) -> usize {
        self.data_shards + self.parity_shards
    }

    /// Validate the layout against the GF(2^8) field limits.
    pub fn validate(&self) -> Result<()> {
        if self.data_shards < 2 {
            return Err(CofferError::Erasure(
                "at least 2 data shards are required".into(),
            ));
        }
        if self.parity_shards < 1 {
            return Err(CofferError::Erasure(
                "at least 1 parity shard is required".into(),
            ));
        }
        if self.total_shards() > 255 {
            return Err(CofferError::Erasure(format!(
                "total shard count {} exceeds the GF(2^8) limit of 255",
                self.total_shards()
            )));
        }
        Ok(())
    }
}

/// An erasure-coded container: geometry, container metadata, per-shard
/// digests and the shards themselves.
///
/// `shards[i]` is `None` when shard `i` is missing or failed its digest
/// check; reconstruction recomputes it if enough shards survive.
pub struct ShardSet {
    pub geometry: Geometry,
    /// Byte length of every shard in this set.
    pub shard_len: usize,
    /// Ciphertext length before zero-padding.
    pub payload_len: u64,
    /// Container revision carried through to the on-disk header.
    pub revision: u64,
    /// Container nonce carried through to the on-disk header.
    pub nonce: [u8; NONCE_LEN],
    /// BLAKE3 digest of each shard, indexed like `shards`.
    pub digests: Vec<[u8; DIGEST_LEN]>,
    pub shards: Vec<Option<Vec<u8>>>,
}

impl ShardSet {
    /// Number of shards currently present (not yet digest-verified).
    pub fn present(&self) -> usize {
        self.shards.iter().filter(|s| s.is_some()).count()
    }

    /// Drop every shard whose BLAKE3 digest does not match the recorded
    /// one.  Returns the number of shards that survived.
    pub fn verify_digests(&mut self) -> usize {
        for (shard, digest) in self.shards.iter_mut().zip(&self.digests) {
            let ok = shard
                .as_ref()
                .is_some_and(|bytes| blake3::hash(bytes).as_bytes() == digest);
            if !ok {
                *shard = None;
            }
        }
        self.present()
    }
}

/// Split an encrypted container into a digest-carrying shard set.
pub fn split(container: &Container, geometry: Geometry) -> Result<ShardSet> {
    geometry.validate()?;

    let payload_len = container.ciphertext.len() as u64;
    let raw_shard_len = container.ciphertext.len().div_ceil(geometry.data_shards);
    let shard_len = raw_shard_len.max(geometry.min_shard_len);

    // Zero-pad the payload to an exact multiple of the shard length.
    let mut padded = container.ciphertext.clone();
    padded.resize(shard_len * geometry.data_shards, 0);

    let mut shards: Vec<Vec<u8>> = padded
        .chunks_exact(shard_len)
        .map(<[u8]>::to_vec)
        .collect();
    for _ in 0..geometry.parity_shards {
        shards.push(vec![0u8; shard_len]);
    }

    let rs = ReedSolomon::new(geometry.data_shards, geometry.parity_shards)
        .map_err(|e| CofferError::Erasure(format!("invalid shard layout: {e}")))?;
    rs.encode(&mut shards)
        .map_err(|e| CofferError::Erasure(format!("encoding failed: {e}")))?;

    let digests = shards
        .iter()
        .map(|shard| *blake3::hash(shard).as_bytes())
        .collect();

    Ok(ShardSet {
        geometry,
        shard_len,
        payload_len,
        revision: container.revision,
        nonce: container.nonce,
        digests,
        shards: shards.into_iter().map(Some).collect(),
    })
}

/// Reconstruct the encrypted container from a (possibly damaged) shard
/// set.
///
/// Shards failing their digest check are discarded first; the remainder
/// must cover at least the data-shard count or reconstruction fails with
/// `Erasure`.
pub fn reconstruct(set: &mut ShardSet) -> Result<Container> {
    set.geometry.validate()?;

    let surviving = set.verify_digests();
    if surviving < set.geometry.data_shards {
        return Err(CofferError::Erasure(format!(
            "only {surviving} of {} shards verify, {} required",
            set.geometry.total_shards(),
            set.geometry.data_shards
        )));
    }

    let rs = ReedSolomon::new(set.geometry.data_shards, set.geometry.parity_shards)
        .map_err(|e| CofferError::Erasure(format!("invalid shard layout: {e}")))?;
    rs.reconstruct_data(&mut set.shards)
        .map_err(|e| CofferError::Erasure(format!("reconstruction failed: {e}")))?;

    let mut ciphertext: Vec<u8> = Vec::with_capacity(set.shard_len * set.geometry.data_shards);
    for shard in set.shards.iter().take(set.geometry.data_shards) {
        let shard = shard
            .as_ref()
            .ok_or_else(|| CofferError::Erasure("data shard missing after repair".into()))?;
        ciphertext.extend_from_slice(shard);
    }

    let payload_len = usize::try_from(set.payload_len).map_err(|_| {
        CofferError::InvalidFormat("payload length exceeds platform address space".into())
    })?;
    if payload_len > ciphertext.len() {
        return Err(CofferError::InvalidFormat(
            "payload length exceeds shard capacity".into(),
        ));
    }
    ciphertext.truncate(payload_len);

    Ok(Container {
        revision: set.revision,
        nonce: set.nonce,
        ciphertext,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(len: usize) -> Container {
        Container {
            revision: 3,
            nonce: [9u8; NONCE_LEN],
            ciphertext: (0..len).map(|i| (i % 251) as u8).collect(),
        }
    }

    #[test]
    fn split_reconstruct_roundtrip() {
        let original = container(10_000);
        let mut set = split(&original, Geometry::default()).unwrap();
        let rebuilt = reconstruct(&mut set).unwrap();
        assert_eq!(rebuilt, original);
    }

    #[test]
    fn small_payload_pads_to_min_shard_len() {
        let set = split(&container(100), Geometry::default()).unwrap();
        assert_eq!(set.shard_len, MIN_SHARD_LEN);
        assert_eq!(set.shards.len(), 12);
    }

    #[test]
    fn survives_losing_all_parity_shards() {
        let original = container(10_000);
        let mut set = split(&original, Geometry::default()).unwrap();
        for i in 8..12 {
            set.shards[i] = None;
        }
        assert_eq!(reconstruct(&mut set).unwrap(), original);
    }

    #[test]
    fn survives_losing_four_data_shards() {
        let original = container(10_000);
        let mut set = split(&original, Geometry::default()).unwrap();
        for i in [0, 2, 5, 7] {
            set.shards[i] = None;
        }
        assert_eq!(reconstruct(&mut set).unwrap(), original);
    }

    #[test]
    fn corrupt_shard_detected_and_repaired() {
        let original = container(10_000);
        let mut set = split(&original, Geometry::default()).unwrap();
        set.shards[3].as_mut().unwrap()[17] ^= 0xFF;
        assert_eq!(reconstruct(&mut set).unwrap(), original);
    }

    #[test]
    fn five_failures_is_fatal() {
        let mut set = split(&container(10_000), Geometry::default()).unwrap();
        for i in 0..4 {
            set.shards[i] = None;
        }
        set.shards[4].as_mut().unwrap()[0] ^= 0xFF;
        assert!(matches!(
            reconstruct(&mut set),
            Err(CofferError::Erasure(_))
        ));
    }

    #[test]
    fn exactly_data_count_survivors_suffice() {
        let original = container(50_000);
        let mut set = split(&original, Geometry::default()).unwrap();
        for i in [1, 3, 9, 11] {
            set.shards[i] = None;
        }
        assert_eq!(set.present(), 8);
        assert_eq!(reconstruct(&mut set).unwrap(), original);
    }

    #[test]
    fn geometry_limits_enforced() {
        let too_many = Geometry {
            data_shards: 200,
            parity_shards: 100,
            min_shard_len: MIN_SHARD_LEN,
        };
        assert!(too_many.validate().is_err());

        let no_parity = Geometry {
            data_shards: 8,
            parity_shards: 0,
            min_shard_len: MIN_SHARD_LEN,
        };
        assert!(no_parity.validate().is_err());
    }
}

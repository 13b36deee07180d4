//! Container encode/decode pipeline.
//!
//! Encoding runs TLV serialization, LZ4 compression and authenticated
//! encryption, in that order:
//!
//! ```text
//! entries --tlv--> plaintext --lz4--> compressed --aead--> Container
//! ```
//!
//! Decoding strictly reverses it and fails closed: the AEAD tag is
//! verified before any decompression or parsing, so unauthenticated
//! bytes never reach the LZ4 decoder or the TLV parser.

use std::collections::BTreeMap;
use std::io::Write;

use zeroize::Zeroizing;

use crate::container::tlv;
use crate::crypto::encryption::{self, NONCE_LEN};
use crate::crypto::keys::MasterKey;
use crate::errors::{CofferError, Result};

/// Highest LZ4 compression level.  Vaults are small and saves are
/// infrequent, so CPU is traded for size.
pub const MAX_COMPRESSION_LEVEL: u32 = 9;

/// The encrypted at-rest representation of one committed vault state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    /// Monotonically increasing save counter; the sync version marker.
    pub revision: u64,
    /// Fresh random nonce for this save, stored alongside the ciphertext.
    pub nonce: [u8; NONCE_LEN],
    /// Compressed entry stream, encrypted and authenticated.
    pub ciphertext: Vec<u8>,
}

/// Serialize, compress and encrypt the entry map.
pub fn encode(
    entries: &BTreeMap<String, String>,
    key: &MasterKey,
    revision: u64,
    compression_level: u32,
) -> Result<Container> {
    let plaintext = tlv::encode_entries(entries);
    let compressed = compress(&plaintext, compression_level)?;

    let nonce = encryption::generate_nonce()?;
    let ciphertext = encryption::seal(key, &nonce, &compressed)?;

    Ok(Container {
        revision,
        nonce,
        ciphertext,
    })
}

/// Decrypt, decompress and parse a container back into the entry map.
///
/// Authentication failure aborts before decompression is attempted.
pub fn decode(container: &Container, key: &MasterKey) -> Result<BTreeMap<String, String>> {
    let compressed = Zeroizing::new(encryption::open(key, &container.nonce, &container.ciphertext)?);
    let plaintext = decompress(&compressed)?;
    tlv::decode_entries(&plaintext)
}

/// LZ4-compress the plaintext stream.
fn compress(data: &[u8], level: u32) -> Result<Zeroizing<Vec<u8>>> {
    let mut encoder = lz4::EncoderBuilder::new()
        .level(level)
        .build(Vec::new())
        .map_err(|e| CofferError::Compression(format!("encoder init failed: {e}")))?;
    encoder
        .write_all(data)
        .map_err(|e| CofferError::Compression(format!("compression failed: {e}")))?;
    let (compressed, finish) = encoder.finish();
    finish.map_err(|e| CofferError::Compression(format!("compression failed: {e}")))?;
    Ok(Zeroizing::new(compressed))
}

/// Decompress an authenticated LZ4 stream.
///
/// Only ever sees bytes that passed the AEAD check; a failure here means
/// the container was produced by an incompatible writer.
fn decompress(data: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    let mut decoder = lz4::Decoder::new(data)
        .map_err(|e| CofferError::InvalidFormat(format!("LZ4 stream header: {e}")))?;
    let mut plaintext = Zeroizing::new(Vec::new());
    std::io::copy(&mut decoder, &mut *plaintext)
        .map_err(|e| CofferError::InvalidFormat(format!("LZ4 decompression: {e}")))?;
    Ok(plaintext)
}

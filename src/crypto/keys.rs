//! The master-key wrapper.

use zeroize::Zeroize;

/// Length of the master key in bytes.
pub const MASTER_KEY_LEN: usize = 32;

/// A wrapper around the 32-byte master key that automatically zeroes
/// its memory when dropped.
///
/// The key is owned exclusively by the active `VaultSession` and is
/// destroyed on lock or process exit.
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct MasterKey {
    bytes: [u8; MASTER_KEY_LEN],
}

impl MasterKey {
    /// Create a new `MasterKey` from raw bytes.
    pub fn new(bytes: [u8; MASTER_KEY_LEN]) -> Self {
        Self { bytes }
    }

    /// Access the raw key bytes (e.g. to pass to the AEAD cipher).
    pub fn as_bytes(&self) -> &[u8; MASTER_KEY_LEN] {
        &self.bytes
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"*** REDACTED ***")
            .finish()
    }
}

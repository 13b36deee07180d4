//! Cryptographic primitives for Coffer.
//!
//! This module provides:
//! - The peppered Argon2id key-derivation sandwich (`kdf`)
//! - XChaCha20-Poly1305 authenticated encryption (`encryption`)
//! - The zeroize-on-drop `MasterKey` wrapper (`keys`)

pub mod encryption;
pub mod kdf;
pub mod keys;

// Re-export the most commonly used items so callers can write:
//   use crate::crypto::{seal, open, derive_master_key, ...};
pub use encryption::{generate_nonce, open, seal, NONCE_LEN};
pub use kdf::{derive_master_key, vault_salt, KdfParams};
pub use keys::MasterKey;

//! XChaCha20-Poly1305 authenticated encryption.
//!
//! The container codec generates a fresh random 24-byte nonce per save
//! and stores it in the container header next to the ciphertext, so the
//! nonce is passed explicitly here rather than prepended to the output.
//!
//! `open` verifies the Poly1305 tag before releasing any plaintext:
//! a wrong key or a tampered ciphertext fails with `Auth` and nothing
//! downstream (decompression, TLV parsing) ever sees the data.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};

use crate::crypto::keys::MasterKey;
use crate::errors::{CofferError, Result};

/// Size of the XChaCha20-Poly1305 nonce in bytes.
pub const NONCE_LEN: usize = 24;

/// Generate a fresh random nonce.
///
/// XChaCha20's 192-bit nonce space makes random nonces safe for any
/// realistic number of saves under one key.
pub fn generate_nonce() -> Result<[u8; NONCE_LEN]> {
    let mut nonce = [0u8; NONCE_LEN];
    getrandom::fill(&mut nonce)
        .map_err(|e| CofferError::Encryption(format!("nonce generation failed: {e}")))?;
    Ok(nonce)
}

/// Encrypt and authenticate `plaintext` under `key` and `nonce`.
pub fn seal(key: &MasterKey, nonce: &[u8; NONCE_LEN], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    cipher
        .encrypt(XNonce::from_slice(nonce), plaintext)
        .map_err(|e| CofferError::Encryption(format!("encryption error: {e}")))
}

/// Decrypt data produced by `seal`, verifying the authentication tag.
///
/// Any failure (wrong key, wrong nonce, flipped bit) maps to the
/// uniform `Auth` error.
pub fn open(key: &MasterKey, nonce: &[u8; NONCE_LEN], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| CofferError::Auth)
}

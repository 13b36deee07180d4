//! Peppered master-key derivation.
//!
//! The master key is produced by a double-hash sandwich around Argon2id:
//!
//! ```text
//! salt      = SHA3-256("coffer/salt/v1" || db_id)
//! pre_hash  = SHA3-256(salt || pepper || password)
//! main_hash = Argon2id(pre_hash, salt || pepper)
//! key       = SHA3-256(main_hash || pepper || salt)
//! ```
//!
//! The pre-hash normalizes the variable-length password before the
//! memory-hard step; the post-hash binds the pepper and salt into the
//! final key.  Neither the pepper nor the password is ever persisted.
//! The derivation is deliberately expensive (1 GiB working set by
//! default) so a stolen container cannot be brute-forced offline.

use argon2::{Algorithm, Argon2, Params, Version};
use sha3::{Digest, Sha3_256};
use zeroize::Zeroize;

use crate::credentials::Pepper;
use crate::errors::{CofferError, Result};
use crate::crypto::keys::MasterKey;

/// Length of the derived key in bytes (256 bits).
const KEY_LEN: usize = 32;

/// Domain separator for the per-vault salt.
const SALT_DOMAIN: &[u8] = b"coffer/salt/v1";

/// Minimum safe memory cost in KiB (8 MiB).
const MIN_MEMORY_KIB: u32 = 8_192;

/// Configurable Argon2id parameters.
///
/// These map 1:1 to the fields in `Settings` so an embedder can pass
/// whatever the operator configured in `coffer.toml`.
#[derive(Debug, Clone, Copy)]
pub struct KdfParams {
    /// Memory cost in KiB (default: 1 048 576 = 1 GiB).
    pub memory_kib: u32,
    /// Number of iterations (default: 2).
    pub iterations: u32,
    /// Parallelism lanes (default: 4).
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 1_048_576,
            iterations: 2,
            parallelism: 4,
        }
    }
}

/// Derive the per-vault salt from the db id.
///
/// The salt is deterministic per vault identity, so the same
/// pepper + password + db id always reproduce the same master key.
pub fn vault_salt(db_id: &str) -> [u8; KEY_LEN] {
    let mut hasher = Sha3_256::new();
    hasher.update(SALT_DOMAIN);
    hasher.update(db_id.as_bytes());
    hasher.finalize().into()
}

/// Derive a 32-byte master key from the pepper, password and db id.
///
/// Fails with `KeyDerivation` if the password is empty or the
/// parameters fall below the enforced floors.  All intermediate hash
/// buffers are zeroized before returning, on success and error alike.
pub fn derive_master_key(
    pepper: &Pepper,
    password: &[u8],
    db_id: &str,
    params: &KdfParams,
) -> Result<MasterKey> {
    if password.is_empty() {
        return Err(CofferError::KeyDerivation(
            "password must not be empty".into(),
        ));
    }
    if params.memory_kib < MIN_MEMORY_KIB {
        return Err(CofferError::KeyDerivation(format!(
            "memory_kib must be at least {MIN_MEMORY_KIB} (got {})",
            params.memory_kib
        )));
    }
    if params.iterations < 1 {
        return Err(CofferError::KeyDerivation(
            "iterations must be at least 1".into(),
        ));
    }
    if params.parallelism < 1 {
        return Err(CofferError::KeyDerivation(
            "parallelism must be at least 1".into(),
        ));
    }

    let salt = vault_salt(db_id);

    // 1. Pre-hash: fixed-length digest of salt + pepper + password.
    let mut pre_hasher = Sha3_256::new();
    pre_hasher.update(salt);
    pre_hasher.update(pepper.as_bytes());
    pre_hasher.update(password);
    let mut pre_hash: [u8; KEY_LEN] = pre_hasher.finalize().into();

    // 2. Memory-hard main step over the pre-hash.
    let argon_params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(KEY_LEN),
    )
    .map_err(|e| {
        pre_hash.zeroize();
        CofferError::KeyDerivation(format!("invalid Argon2 params: {e}"))
    })?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

    let mut argon_salt = [&salt as &[u8], pepper.as_bytes()].concat();
    let mut main_hash = [0u8; KEY_LEN];
    let hashed = argon2.hash_password_into(&pre_hash, &argon_salt, &mut main_hash);
    pre_hash.zeroize();
    argon_salt.zeroize();
    if let Err(e) = hashed {
        main_hash.zeroize();
        return Err(CofferError::KeyDerivation(format!(
            "Argon2id hashing failed: {e}"
        )));
    }

    // 3. Post-hash: bind pepper and salt into the final key.
    let mut post_hasher = Sha3_256::new();
    post_hasher.update(main_hash);
    post_hasher.update(pepper.as_bytes());
    post_hasher.update(salt);
    let mut key: [u8; KEY_LEN] = post_hasher.finalize().into();
    main_hash.zeroize();

    let master = MasterKey::new(key);
    key.zeroize();
    Ok(master)
}

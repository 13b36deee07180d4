use std::path::PathBuf;
use thiserror::Error;

/// All errors that can occur in Coffer.
#[derive(Debug, Error)]
pub enum CofferError {
    // --- Key derivation / credentials ---
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Credential provider error: {0}")]
    Credential(String),

    // --- Container codec ---
    #[error("Authentication failed — wrong key or tampered container")]
    Auth,

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Compression failed: {0}")]
    Compression(String),

    // --- Erasure layer ---
    #[error("Erasure reconstruction failed: {0}")]
    Erasure(String),

    // --- On-disk store ---
    #[error("Vault not found for db id '{0}'")]
    NotFound(String),

    #[error("Invalid container format: {0}")]
    InvalidFormat(String),

    #[error("Unsupported container format version {0}")]
    UnsupportedVersion(u8),

    #[error("Vault is locked by another session (lock file {0})")]
    SessionBusy(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // --- Remote sync ---
    #[error("Sync failed: {0}")]
    Sync(String),

    #[error("Sync conflict — local revision {local} and remote revision {remote} diverged")]
    Conflict { local: u64, remote: u64 },

    // --- Session ---
    #[error("Unlock failed")]
    UnlockFailed,

    #[error("Session is not unlocked")]
    NotUnlocked,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid entry: {0}")]
    InvalidEntry(String),

    #[error("Invalid db id: {0}")]
    InvalidDbId(String),

    // --- Config ---
    #[error("Config file error: {0}")]
    Config(String),

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Convenience type alias for Coffer results.
pub type Result<T> = std::result::Result<T, CofferError>;

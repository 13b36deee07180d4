use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::crypto::kdf::KdfParams;
use crate::erasure::Geometry;
use crate::errors::{CofferError, Result};

/// Engine configuration, loaded from `coffer.toml` in the vault
/// directory.
///
/// Every field has a sensible default so the engine works out-of-the-box
/// without any config file at all.  The KDF cost, the erasure geometry
/// and the compression level are deliberately configuration rather than
/// hard prescriptions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Argon2 memory cost in KiB (default: 1 GiB).
    #[serde(default = "default_kdf_memory_kib")]
    pub kdf_memory_kib: u32,

    /// Argon2 iteration count (default: 2).
    #[serde(default = "default_kdf_iterations")]
    pub kdf_iterations: u32,

    /// Argon2 parallelism degree (default: 4).
    #[serde(default = "default_kdf_parallelism")]
    pub kdf_parallelism: u32,

    /// Erasure data shard count (default: 8).
    #[serde(default = "default_data_shards")]
    pub data_shards: usize,

    /// Erasure parity shard count (default: 4).
    #[serde(default = "default_parity_shards")]
    pub parity_shards: usize,

    /// Minimum shard payload size in bytes (default: 4096).
    #[serde(default = "default_min_shard_len")]
    pub min_shard_len: usize,

    /// LZ4 compression level (default: 9, the maximum).
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,

    /// Reconcile with the remote before unlocking (default: true when a
    /// sync backend is attached).
    #[serde(default = "default_pull_on_unlock")]
    pub pull_on_unlock: bool,

    /// Fail the unlock when the remote cannot be reached, instead of
    /// degrading to the local copy (default: false).
    #[serde(default)]
    pub require_fresh: bool,
}

// ── Serde default helpers ────────────────────────────────────────────

fn default_kdf_memory_kib() -> u32 {
    1_048_576 // 1 GiB
}

fn default_kdf_iterations() -> u32 {
    2
}

fn default_kdf_parallelism() -> u32 {
    4
}

fn default_data_shards() -> usize {
    8
}

fn default_parity_shards() -> usize {
    4
}

fn default_min_shard_len() -> usize {
    4096
}

fn default_compression_level() -> u32 {
    9
}

fn default_pull_on_unlock() -> bool {
    true
}

// ── Implementation ───────────────────────────────────────────────────

impl Default for Settings {
    fn default() -> Self {
        Self {
            kdf_memory_kib: default_kdf_memory_kib(),
            kdf_iterations: default_kdf_iterations(),
            kdf_parallelism: default_kdf_parallelism(),
            data_shards: default_data_shards(),
            parity_shards: default_parity_shards(),
            min_shard_len: default_min_shard_len(),
            compression_level: default_compression_level(),
            pull_on_unlock: default_pull_on_unlock(),
            require_fresh: false,
        }
    }
}

impl Settings {
    /// Name of the config file we look for in the vault directory.
    const FILE_NAME: &'static str = "coffer.toml";

    /// Load settings from `<vault_dir>/coffer.toml`.
    ///
    /// If the file does not exist, sensible defaults are returned.
    /// If the file exists but cannot be parsed, an error is returned.
    pub fn load(vault_dir: &Path) -> Result<Self> {
        let config_path = vault_dir.join(Self::FILE_NAME);

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&config_path)?;

        let settings: Settings = toml::from_str(&contents).map_err(|e| {
            CofferError::Config(format!("Failed to parse {}: {e}", config_path.display()))
        })?;

        Ok(settings)
    }

    /// Convert the KDF settings into crypto-layer params.
    pub fn kdf_params(&self) -> KdfParams {
        KdfParams {
            memory_kib: self.kdf_memory_kib,
            iterations: self.kdf_iterations,
            parallelism: self.kdf_parallelism,
        }
    }

    /// Convert the erasure settings into a shard geometry.
    pub fn geometry(&self) -> Geometry {
        Geometry {
            data_shards: self.data_shards,
            parity_shards: self.parity_shards,
            min_shard_len: self.min_shard_len,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

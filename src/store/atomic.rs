//! Crash-safe commit and load of shard files.
//!
//! Commit never leaves a partially-written vault observable:
//!
//! 1. The serialized shard file is written to a hidden staging path in
//!    the same directory and fsynced.
//! 2. The current file (if any) is renamed to a backup path.
//! 3. The staging file is renamed over the current path (atomic on the
//!    same filesystem).
//! 4. The backup is reclaimed.
//!
//! A crash between any two steps leaves either the old set (as current
//! or backup) or the new set (as current) fully intact on disk; `load`
//! resolves current first and falls back to the backup.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::erasure::ShardSet;
use crate::errors::{CofferError, Result};
use crate::store::format;

/// File extension for committed vaults.
const VAULT_EXT: &str = "coffer";

/// Validate a db id: 1-8 ASCII lowercase letters or digits.
///
/// The id selects the on-disk container and the remote object path, so
/// it is restricted to characters safe in both.
pub fn validate_db_id(db_id: &str) -> Result<()> {
    if db_id.is_empty() || db_id.len() > 8 {
        return Err(CofferError::InvalidDbId(format!(
            "'{db_id}' must be 1-8 characters"
        )));
    }
    if !db_id
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
    {
        return Err(CofferError::InvalidDbId(format!(
            "'{db_id}' may only contain lowercase letters and digits"
        )));
    }
    Ok(())
}

/// Handle to the vault directory.  All paths for one db id derive from
/// here.
pub struct AtomicStore {
    dir: PathBuf,
}

impl AtomicStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// The default store location: `$HOME/.config/coffer`.
    pub fn default_dir() -> PathBuf {
        let mut path = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_default();
        path.push(".config/coffer");
        path
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    // ------------------------------------------------------------------
    // Path layout
    // ------------------------------------------------------------------

    pub fn db_path(&self, db_id: &str) -> PathBuf {
        self.dir.join(format!("{db_id}.{VAULT_EXT}"))
    }

    fn staging_path(&self, db_id: &str) -> PathBuf {
        self.dir.join(format!(".{db_id}.{VAULT_EXT}.tmp"))
    }

    fn backup_path(&self, db_id: &str) -> PathBuf {
        self.dir.join(format!("{db_id}.{VAULT_EXT}.bak"))
    }

    pub fn lock_path(&self, db_id: &str) -> PathBuf {
        self.dir.join(format!("{db_id}.lock"))
    }

    pub fn sync_state_path(&self, db_id: &str) -> PathBuf {
        self.dir.join(format!("{db_id}.sync.json"))
    }

    // ------------------------------------------------------------------
    // Commit / load
    // ------------------------------------------------------------------

    /// Commit a freshly split shard set.
    pub fn commit(&self, db_id: &str, set: &ShardSet) -> Result<()> {
        let bytes = format::serialize(set)?;
        self.commit_bytes(db_id, &bytes)
    }

    /// Commit pre-serialized shard-file bytes (e.g. a remote download).
    ///
    /// The bytes are parsed first so garbage can never be installed as
    /// the current vault.
    pub fn commit_bytes(&self, db_id: &str, bytes: &[u8]) -> Result<()> {
        validate_db_id(db_id)?;
        format::parse(bytes)?;

        let staging = self.staging_path(db_id);
        let current = self.db_path(db_id);
        let backup = self.backup_path(db_id);

        // 1. Stage the new set and flush it to the platter.
        {
            let mut file = fs::File::create(&staging)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }

        // 2. Retain the previous set until the new one is referenced.
        if current.exists() {
            fs::rename(&current, &backup)?;
        }

        // 3. Atomically repoint "current" at the new set.
        fs::rename(&staging, &current)?;

        // 4. Reclaim the previous set.
        if backup.exists() {
            if let Err(e) = fs::remove_file(&backup) {
                tracing::debug!(db_id, error = %e, "backup reclaim deferred");
            }
        }

        Ok(())
    }

    /// Load the committed shard set for a db id.
    ///
    /// Resolves the current reference first, then the retained backup
    /// (covering a crash between the two commit renames), then fails
    /// with `NotFound`.
    pub fn load(&self, db_id: &str) -> Result<ShardSet> {
        validate_db_id(db_id)?;
        let bytes = self.read_bytes(db_id)?;
        format::parse(&bytes)
    }

    /// Raw committed bytes for a db id, with the same backup fallback
    /// as `load`.  Used by the sync engine for uploads.
    pub fn read_bytes(&self, db_id: &str) -> Result<Vec<u8>> {
        validate_db_id(db_id)?;
        let current = self.db_path(db_id);
        if current.exists() {
            return Ok(fs::read(&current)?);
        }

        let backup = self.backup_path(db_id);
        if backup.exists() {
            tracing::warn!(db_id, "current vault missing, recovering from backup");
            return Ok(fs::read(&backup)?);
        }

        Err(CofferError::NotFound(db_id.to_string()))
    }

    /// Whether any committed state exists for a db id.
    pub fn exists(&self, db_id: &str) -> bool {
        self.db_path(db_id).exists() || self.backup_path(db_id).exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Container;
    use crate::crypto::encryption::NONCE_LEN;
    use crate::erasure::{self, Geometry};
    use tempfile::TempDir;

    fn shard_set(revision: u64, fill: u8) -> ShardSet {
        let container = Container {
            revision,
            nonce: [fill; NONCE_LEN],
            ciphertext: vec![fill; 6000],
        };
        erasure::split(&container, Geometry::default()).unwrap()
    }

    #[test]
    fn commit_then_load() {
        let dir = TempDir::new().unwrap();
        let store = AtomicStore::new(dir.path()).unwrap();

        store.commit("abc123", &shard_set(1, 0x11)).unwrap();
        let loaded = store.load("abc123").unwrap();
        assert_eq!(loaded.revision, 1);
    }

    #[test]
    fn recommit_replaces_and_reclaims() {
        let dir = TempDir::new().unwrap();
        let store = AtomicStore::new(dir.path()).unwrap();

        store.commit("abc123", &shard_set(1, 0x11)).unwrap();
        store.commit("abc123", &shard_set(2, 0x22)).unwrap();

        assert_eq!(store.load("abc123").unwrap().revision, 2);
        assert!(!dir.path().join("abc123.coffer.bak").exists());
    }

    #[test]
    fn load_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = AtomicStore::new(dir.path()).unwrap();
        assert!(matches!(
            store.load("abc123"),
            Err(CofferError::NotFound(_))
        ));
    }

    #[test]
    fn backup_fallback_after_simulated_crash() {
        let dir = TempDir::new().unwrap();
        let store = AtomicStore::new(dir.path()).unwrap();
        store.commit("abc123", &shard_set(1, 0x11)).unwrap();

        // Crash between the two renames: current moved to backup, new
        // set never installed.
        fs::rename(
            dir.path().join("abc123.coffer"),
            dir.path().join("abc123.coffer.bak"),
        )
        .unwrap();

        assert_eq!(store.load("abc123").unwrap().revision, 1);
    }

    #[test]
    fn garbage_bytes_never_committed() {
        let dir = TempDir::new().unwrap();
        let store = AtomicStore::new(dir.path()).unwrap();
        store.commit("abc123", &shard_set(1, 0x11)).unwrap();

        let result = store.commit_bytes("abc123", b"not a shard file");
        assert!(result.is_err());

        // Prior state untouched.
        assert_eq!(store.load("abc123").unwrap().revision, 1);
    }

    #[test]
    fn db_id_validation() {
        assert!(validate_db_id("abc123").is_ok());
        assert!(validate_db_id("a").is_ok());
        assert!(validate_db_id("").is_err());
        assert!(validate_db_id("toolongid").is_err());
        assert!(validate_db_id("UPPER").is_err());
        assert!(validate_db_id("has space").is_err());
        assert!(validate_db_id("../../x").is_err());
    }
}

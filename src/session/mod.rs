//! The vault session state machine.
//!
//! `VaultSession` is the only surface a presentation layer sees:
//!
//! ```text
//! Locked --unlock--> Unlocked --set--> Unlocked (dirty) --save--> Unlocked
//!    ^                                                               |
//!    +------------------------------ lock ---------------------------+
//! ```
//!
//! Unlock runs key derivation, then load → reconstruct → decode; save
//! runs encode → split → commit, then pushes to the remote.  On any
//! unlock failure the session stays `Locked` and external callers get a
//! uniform `UnlockFailed`; which step failed is recorded only in the
//! local diagnostic log, so an attacker probing the API cannot tell a
//! wrong password from a corrupted vault or a missing pepper.
//!
//! The master key and every decrypted entry live inside the session and
//! are zeroized on lock, drop, cancellation and every error path.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use zeroize::Zeroize;

use crate::config::Settings;
use crate::container::{self, Container};
use crate::credentials::CredentialProvider;
use crate::crypto::{self, MasterKey};
use crate::erasure;
use crate::errors::{CofferError, Result};
use crate::store::{validate_db_id, AtomicStore, LockGuard};
use crate::sync::{PushOutcome, SyncEngine};

/// Maximum entry key length in characters (after normalization).
pub const MAX_KEY_CHARS: usize = 32;

/// Maximum entry value length in characters.
pub const MAX_VALUE_CHARS: usize = 8000;

/// Cooperative cancellation for unlock/save.
///
/// The flag is checked between pipeline stages, always before the
/// commit point; cancelled work is zeroized and never partially
/// persisted.
#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(CofferError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Externally visible session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Locked,
    Unlocked { dirty: bool },
}

/// How the remote fared during a save.  The local commit is already
/// durable whatever this says.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStatus {
    /// Uploaded (or already current) on the remote.
    Synced,
    /// No sync backend is attached.
    Disabled,
    /// Upload failed after retries; will be retried on the next save.
    Failed(String),
    /// Local and remote revisions diverged; resolution is deferred.
    Conflicted { local: u64, remote: u64 },
}

/// Result of a successful save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOutcome {
    /// The committed revision.
    pub revision: u64,
    pub remote: RemoteStatus,
}

/// Entry state held only while unlocked.
struct Unlocked {
    master_key: MasterKey,
    entries: BTreeMap<String, String>,
    revision: u64,
    dirty: bool,
    // Held for the whole unlocked lifetime; releasing it is what allows
    // another session to open this db id.
    _lock: LockGuard,
}

impl Unlocked {
    /// Scrub every plaintext entry.  The master key zeroizes itself on
    /// drop.
    fn scrub(&mut self) {
        let entries = std::mem::take(&mut self.entries);
        for (mut key, mut value) in entries {
            key.zeroize();
            value.zeroize();
        }
    }
}

impl Drop for Unlocked {
    fn drop(&mut self) {
        self.scrub();
    }
}

/// One vault, one operator, one unlock at a time.
pub struct VaultSession {
    db_id: String,
    store: AtomicStore,
    provider: Box<dyn CredentialProvider>,
    sync: Option<SyncEngine>,
    settings: Settings,
    unlocked: Option<Unlocked>,
}

impl VaultSession {
    /// Create a session for `db_id`.  No disk or network access happens
    /// until `unlock`.
    pub fn new(
        db_id: &str,
        store: AtomicStore,
        provider: Box<dyn CredentialProvider>,
        settings: Settings,
    ) -> Result<Self> {
        validate_db_id(db_id)?;
        Ok(Self {
            db_id: db_id.to_string(),
            store,
            provider,
            sync: None,
            settings,
            unlocked: None,
        })
    }

    /// Attach a remote sync engine.
    pub fn with_sync(mut self, engine: SyncEngine) -> Self {
        self.sync = Some(engine);
        self
    }

    pub fn db_id(&self) -> &str {
        &self.db_id
    }

    pub fn state(&self) -> SessionState {
        match &self.unlocked {
            None => SessionState::Locked,
            Some(inner) => SessionState::Unlocked { dirty: inner.dirty },
        }
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked.is_some()
    }

    // ------------------------------------------------------------------
    // Unlock / lock
    // ------------------------------------------------------------------

    /// Unlock the vault with the operator's password.
    pub fn unlock(&mut self, password: &str) -> Result<()> {
        self.unlock_with(password, &CancelToken::new())
    }

    /// Unlock with cooperative cancellation.
    ///
    /// External callers see `UnlockFailed` for every derivation, auth,
    /// or reconstruction failure; the concrete cause goes to the
    /// diagnostic log only.  `SessionBusy` and `Cancelled` pass through
    /// unchanged; they are not oracles about the vault contents.
    pub fn unlock_with(&mut self, password: &str, cancel: &CancelToken) -> Result<()> {
        if self.unlocked.is_some() {
            return Ok(());
        }

        match self.try_unlock(password, cancel) {
            Ok(inner) => {
                self.unlocked = Some(inner);
                tracing::info!(db_id = %self.db_id, "vault unlocked");
                Ok(())
            }
            Err(e @ (CofferError::SessionBusy(_) | CofferError::Cancelled)) => Err(e),
            Err(e) => {
                tracing::warn!(db_id = %self.db_id, cause = %e, "unlock failed");
                Err(CofferError::UnlockFailed)
            }
        }
    }

    fn try_unlock(&mut self, password: &str, cancel: &CancelToken) -> Result<Unlocked> {
        let lock = LockGuard::acquire(self.store.lock_path(&self.db_id))?;
        cancel.check()?;

        // Reconcile with the remote before trusting the local copy.
        if let Some(engine) = &self.sync {
            if self.settings.pull_on_unlock {
                match engine.pull(&self.store, &self.db_id) {
                    Ok(outcome) => {
                        tracing::debug!(db_id = %self.db_id, ?outcome, "pre-unlock pull")
                    }
                    Err(e) if self.settings.require_fresh => return Err(e),
                    Err(e) => {
                        tracing::warn!(db_id = %self.db_id, error = %e,
                            "pull failed, proceeding with local copy");
                    }
                }
            }
        }
        cancel.check()?;

        let pepper = self.provider.pepper()?;
        let master_key = crypto::derive_master_key(
            &pepper,
            password.as_bytes(),
            &self.db_id,
            &self.settings.kdf_params(),
        )?;
        cancel.check()?;

        let (entries, revision) = if self.store.exists(&self.db_id) {
            let mut shard_set = self.store.load(&self.db_id)?;
            let container = erasure::reconstruct(&mut shard_set)?;
            cancel.check()?;
            let entries = container::decode(&container, &master_key)?;
            (entries, container.revision)
        } else {
            // First unlock of a fresh db id starts an empty vault.
            tracing::debug!(db_id = %self.db_id, "no prior vault, starting empty");
            (BTreeMap::new(), 0)
        };
        cancel.check()?;

        Ok(Unlocked {
            master_key,
            entries,
            revision,
            dirty: false,
            _lock: lock,
        })
    }

    /// Lock the vault.  Always available; zeroizes the master key and
    /// every entry and releases the session lock.
    pub fn lock(&mut self) {
        if self.unlocked.take().is_some() {
            tracing::info!(db_id = %self.db_id, "vault locked");
        }
    }

    // ------------------------------------------------------------------
    // Entry operations
    // ------------------------------------------------------------------

    /// Look up an entry.  The key is trimmed and lowercased first.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let inner = self.unlocked.as_ref().ok_or(CofferError::NotUnlocked)?;
        let key = normalize_key(key);
        Ok(inner.entries.get(&key).cloned())
    }

    /// Insert or replace an entry and mark the session dirty.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let inner = self.unlocked.as_mut().ok_or(CofferError::NotUnlocked)?;

        let key = normalize_key(key);
        if key.is_empty() {
            return Err(CofferError::InvalidEntry("key must not be empty".into()));
        }
        if key.chars().count() > MAX_KEY_CHARS {
            return Err(CofferError::InvalidEntry(format!(
                "key exceeds {MAX_KEY_CHARS} characters"
            )));
        }
        if value.chars().count() > MAX_VALUE_CHARS {
            return Err(CofferError::InvalidEntry(format!(
                "value exceeds {MAX_VALUE_CHARS} characters"
            )));
        }

        if let Some(mut old) = inner.entries.insert(key, value.to_string()) {
            old.zeroize();
        }
        inner.dirty = true;
        Ok(())
    }

    /// Remove an entry; returns whether it existed.
    pub fn remove(&mut self, key: &str) -> Result<bool> {
        let inner = self.unlocked.as_mut().ok_or(CofferError::NotUnlocked)?;
        let key = normalize_key(key);
        match inner.entries.remove(&key) {
            Some(mut value) => {
                value.zeroize();
                inner.dirty = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// All entry keys, sorted.
    pub fn keys(&self) -> Result<Vec<String>> {
        let inner = self.unlocked.as_ref().ok_or(CofferError::NotUnlocked)?;
        Ok(inner.entries.keys().cloned().collect())
    }

    /// Number of entries.
    pub fn len(&self) -> Result<usize> {
        let inner = self.unlocked.as_ref().ok_or(CofferError::NotUnlocked)?;
        Ok(inner.entries.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    // ------------------------------------------------------------------
    // Save
    // ------------------------------------------------------------------

    /// Encode, split and commit the current entries, then push.
    pub fn save(&mut self) -> Result<SaveOutcome> {
        self.save_with(&CancelToken::new())
    }

    /// Save with cooperative cancellation (checked before the commit
    /// point; once the commit lands the push always runs).
    pub fn save_with(&mut self, cancel: &CancelToken) -> Result<SaveOutcome> {
        let inner = self.unlocked.as_mut().ok_or(CofferError::NotUnlocked)?;
        cancel.check()?;

        let revision = inner.revision + 1;
        let container: Container = container::encode(
            &inner.entries,
            &inner.master_key,
            revision,
            self.settings.compression_level,
        )?;
        cancel.check()?;

        let shard_set = erasure::split(&container, self.settings.geometry())?;
        cancel.check()?;

        self.store.commit(&self.db_id, &shard_set)?;
        inner.revision = revision;
        inner.dirty = false;
        tracing::info!(db_id = %self.db_id, revision, "vault committed");

        // Remote push never rolls back the local commit.
        let remote = match &self.sync {
            None => RemoteStatus::Disabled,
            Some(engine) => match engine.push(&self.store, &self.db_id) {
                Ok(PushOutcome::Pushed { .. }) | Ok(PushOutcome::UpToDate) => RemoteStatus::Synced,
                Err(CofferError::Conflict { local, remote }) => {
                    tracing::warn!(db_id = %self.db_id, local, remote, "push conflict");
                    RemoteStatus::Conflicted { local, remote }
                }
                Err(e) => {
                    tracing::warn!(db_id = %self.db_id, error = %e, "push failed");
                    RemoteStatus::Failed(e.to_string())
                }
            },
        };

        Ok(SaveOutcome { revision, remote })
    }
}

impl Drop for VaultSession {
    fn drop(&mut self) {
        self.lock();
    }
}

/// Normalize an entry key: trim surrounding whitespace, lowercase.
fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase()
}

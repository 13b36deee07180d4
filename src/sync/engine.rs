//! Push/pull reconciliation against the remote object store.
//!
//! Every committed shard file carries a monotonically increasing
//! revision in its header, readable without decryption.  The engine
//! also keeps a small JSON sidecar per db id recording the last
//! revision both sides were known to share (the sync base).  The three
//! numbers (local, remote, base) decide every outcome:
//!
//! - local ahead, remote at base            → push
//! - remote ahead, local at base            → fast-forward pull
//! - both ahead of base                     → `Conflict`, deferred to
//!   the caller (entries have no per-field merge semantics)
//!
//! Push failures are retried with bounded exponential backoff and never
//! roll back the local commit; local durability is independent of
//! remote availability.

use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{CofferError, Result};
use crate::store::{format, AtomicStore};
use crate::sync::remote::ObjectStore;

/// Upload attempts before a push is reported failed.
const MAX_PUSH_ATTEMPTS: u32 = 3;

/// Base delay between push attempts; doubles per retry.
const PUSH_BACKOFF: Duration = Duration::from_millis(250);

/// The last known shared state with the remote, persisted as a JSON
/// sidecar next to the container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSnapshot {
    /// Revision both sides held after the last successful push or pull.
    pub last_synced_revision: u64,
    /// When that sync completed.
    pub synced_at: DateTime<Utc>,
}

/// Result of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The local revision was uploaded.
    Pushed { revision: u64 },
    /// The remote already holds this revision.
    UpToDate,
}

/// Result of a pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    /// The remote was ahead and has been committed locally.
    FastForwarded { revision: u64 },
    /// The local copy is current (or ahead, pending push).
    LocalCurrent,
    /// Nothing exists remotely yet.
    NoRemote,
}

/// The synchronization engine.  Holds the remote backend; all local
/// state goes through the `AtomicStore` passed per call.
pub struct SyncEngine {
    remote: Box<dyn ObjectStore>,
}

impl SyncEngine {
    pub fn new(remote: Box<dyn ObjectStore>) -> Self {
        Self { remote }
    }

    /// Remote object name for a db id.
    fn object_name(db_id: &str) -> String {
        format!("{db_id}/vault.coffer")
    }

    // ------------------------------------------------------------------
    // Push
    // ------------------------------------------------------------------

    /// Upload the committed container for `db_id`.
    ///
    /// Raises `Conflict` when the remote advanced past the sync base on
    /// its own; uploading would overwrite someone else's save.  Two
    /// independent saves can land on the same revision number, so a
    /// revision tie only counts as "already synced" when the payload
    /// bytes match too (every save carries a fresh nonce, so distinct
    /// saves never collide byte-for-byte).
    pub fn push(&self, store: &AtomicStore, db_id: &str) -> Result<PushOutcome> {
        let bytes = store.read_bytes(db_id)?;
        let local = format::revision_of(&bytes)?;
        let base = self
            .load_snapshot(store, db_id)?
            .map_or(0, |s| s.last_synced_revision);

        if let Some(remote_bytes) = self.remote.get(&Self::object_name(db_id))? {
            let remote = format::revision_of(&remote_bytes)?;
            if remote == local && remote_bytes == bytes {
                tracing::debug!(db_id, revision = local, "remote already current");
                self.save_snapshot(store, db_id, remote)?;
                return Ok(PushOutcome::UpToDate);
            }
            if remote > base {
                return Err(CofferError::Conflict { local, remote });
            }
        }

        self.put_with_retry(&Self::object_name(db_id), &bytes)?;
        self.save_snapshot(store, db_id, local)?;
        tracing::info!(db_id, revision = local, "pushed to remote");
        Ok(PushOutcome::Pushed { revision: local })
    }

    /// Upload with bounded exponential backoff.
    fn put_with_retry(&self, name: &str, data: &[u8]) -> Result<()> {
        let mut delay = PUSH_BACKOFF;
        let mut last_error = None;

        for attempt in 1..=MAX_PUSH_ATTEMPTS {
            match self.remote.put(name, data) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(name, attempt, error = %e, "upload attempt failed");
                    last_error = Some(e);
                    if attempt < MAX_PUSH_ATTEMPTS {
                        thread::sleep(delay);
                        delay *= 2;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| CofferError::Sync("upload failed".into())))
    }

    // ------------------------------------------------------------------
    // Pull
    // ------------------------------------------------------------------

    /// Reconcile the local copy with the remote before unlock.
    ///
    /// A fast-forward commits the remote bytes through the atomic store
    /// (which re-validates the format); divergence raises `Conflict`
    /// and leaves local state untouched.
    pub fn pull(&self, store: &AtomicStore, db_id: &str) -> Result<PullOutcome> {
        let Some(remote_bytes) = self.remote.get(&Self::object_name(db_id))? else {
            return Ok(PullOutcome::NoRemote);
        };
        let remote = format::revision_of(&remote_bytes)?;

        if !store.exists(db_id) {
            store.commit_bytes(db_id, &remote_bytes)?;
            self.save_snapshot(store, db_id, remote)?;
            tracing::info!(db_id, revision = remote, "fetched remote vault");
            return Ok(PullOutcome::FastForwarded { revision: remote });
        }

        let local_bytes = store.read_bytes(db_id)?;
        let local = format::revision_of(&local_bytes)?;
        let base = self
            .load_snapshot(store, db_id)?
            .map_or(0, |s| s.last_synced_revision);

        if remote == local && remote_bytes == local_bytes {
            self.save_snapshot(store, db_id, remote)?;
            return Ok(PullOutcome::LocalCurrent);
        }

        if remote <= base {
            // Remote has not moved; local is current or ahead pending
            // push.
            return Ok(PullOutcome::LocalCurrent);
        }

        if local > base {
            // Both sides advanced independently; no per-field merge
            // semantics exist, so resolution is deferred.
            return Err(CofferError::Conflict { local, remote });
        }

        store.commit_bytes(db_id, &remote_bytes)?;
        self.save_snapshot(store, db_id, remote)?;
        tracing::info!(db_id, revision = remote, "fast-forwarded from remote");
        Ok(PullOutcome::FastForwarded { revision: remote })
    }

    // ------------------------------------------------------------------
    // Snapshot sidecar
    // ------------------------------------------------------------------

    fn load_snapshot(&self, store: &AtomicStore, db_id: &str) -> Result<Option<RemoteSnapshot>> {
        let path = store.sync_state_path(db_id);
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)?;
        let snapshot = serde_json::from_str(&contents)
            .map_err(|e| CofferError::Serialization(format!("sync sidecar: {e}")))?;
        Ok(Some(snapshot))
    }

    fn save_snapshot(&self, store: &AtomicStore, db_id: &str, revision: u64) -> Result<()> {
        let snapshot = RemoteSnapshot {
            last_synced_revision: revision,
            synced_at: Utc::now(),
        };
        let contents = serde_json::to_string(&snapshot)
            .map_err(|e| CofferError::Serialization(format!("sync sidecar: {e}")))?;
        std::fs::write(store.sync_state_path(db_id), contents)?;
        Ok(())
    }
}

//! End-to-end tests for the vault session state machine.

use std::fs;
use std::path::Path;

use coffer::config::Settings;
use coffer::credentials::StaticCredentials;
use coffer::errors::CofferError;
use coffer::session::{CancelToken, RemoteStatus, SessionState};
use coffer::store::AtomicStore;
use coffer::VaultSession;
use tempfile::TempDir;

/// Helper: settings with a cheap KDF so tests stay fast.
fn fast_settings() -> Settings {
    Settings {
        kdf_memory_kib: 8_192,
        kdf_iterations: 1,
        kdf_parallelism: 1,
        ..Settings::default()
    }
}

/// Helper: build a locked session over `dir` for db id "abc123".
fn session(dir: &Path) -> VaultSession {
    let store = AtomicStore::new(dir).unwrap();
    let provider = Box::new(StaticCredentials::new([0x42; 32]));
    VaultSession::new("abc123", store, provider, fast_settings()).unwrap()
}

// ---------------------------------------------------------------------------
// Fresh vault scenario
// ---------------------------------------------------------------------------

#[test]
fn fresh_unlock_set_save_lock_reopen() {
    let dir = TempDir::new().unwrap();

    // Unlock with no prior vault: empty entry map.
    let mut s = session(dir.path());
    s.unlock("correct").unwrap();
    assert_eq!(s.state(), SessionState::Unlocked { dirty: false });
    assert!(s.is_empty().unwrap());

    // Keys are case-normalized and trimmed.
    s.set("Email", "a@b.com").unwrap();
    assert_eq!(s.get("email").unwrap().as_deref(), Some("a@b.com"));
    assert_eq!(s.get("  EMAIL ").unwrap().as_deref(), Some("a@b.com"));
    assert_eq!(s.state(), SessionState::Unlocked { dirty: true });

    let outcome = s.save().unwrap();
    assert_eq!(outcome.revision, 1);
    assert_eq!(outcome.remote, RemoteStatus::Disabled);
    assert_eq!(s.state(), SessionState::Unlocked { dirty: false });

    s.lock();
    assert_eq!(s.state(), SessionState::Locked);
    assert!(matches!(s.get("email"), Err(CofferError::NotUnlocked)));

    // Re-unlock and find the entry again.
    s.unlock("correct").unwrap();
    assert_eq!(s.get("email").unwrap().as_deref(), Some("a@b.com"));
}

#[test]
fn wrong_password_stays_locked_with_uniform_error() {
    let dir = TempDir::new().unwrap();

    let mut s = session(dir.path());
    s.unlock("correct").unwrap();
    s.set("email", "a@b.com").unwrap();
    s.save().unwrap();
    s.lock();

    let result = s.unlock("incorrect");
    assert!(matches!(result, Err(CofferError::UnlockFailed)));
    assert_eq!(s.state(), SessionState::Locked);
    assert!(matches!(s.get("email"), Err(CofferError::NotUnlocked)));

    // The right password still works afterwards.
    s.unlock("correct").unwrap();
    assert_eq!(s.get("email").unwrap().as_deref(), Some("a@b.com"));
}

// ---------------------------------------------------------------------------
// Entry validation
// ---------------------------------------------------------------------------

#[test]
fn entry_limits_enforced() {
    let dir = TempDir::new().unwrap();
    let mut s = session(dir.path());
    s.unlock("correct").unwrap();

    assert!(matches!(
        s.set("", "v"),
        Err(CofferError::InvalidEntry(_))
    ));
    assert!(matches!(
        s.set("   ", "v"),
        Err(CofferError::InvalidEntry(_))
    ));
    assert!(matches!(
        s.set(&"k".repeat(33), "v"),
        Err(CofferError::InvalidEntry(_))
    ));
    assert!(matches!(
        s.set("k", &"v".repeat(8001)),
        Err(CofferError::InvalidEntry(_))
    ));

    // At the limits is fine.
    s.set(&"k".repeat(32), &"v".repeat(8000)).unwrap();
}

#[test]
fn remove_and_overwrite() {
    let dir = TempDir::new().unwrap();
    let mut s = session(dir.path());
    s.unlock("correct").unwrap();

    s.set("email", "old@b.com").unwrap();
    s.set("Email", "new@b.com").unwrap();
    assert_eq!(s.len().unwrap(), 1);
    assert_eq!(s.get("email").unwrap().as_deref(), Some("new@b.com"));

    assert!(s.remove("EMAIL").unwrap());
    assert!(!s.remove("email").unwrap());
    assert!(s.is_empty().unwrap());
}

#[test]
fn operations_require_unlock() {
    let dir = TempDir::new().unwrap();
    let mut s = session(dir.path());

    assert!(matches!(s.get("k"), Err(CofferError::NotUnlocked)));
    assert!(matches!(s.set("k", "v"), Err(CofferError::NotUnlocked)));
    assert!(matches!(s.save(), Err(CofferError::NotUnlocked)));
    assert!(matches!(s.keys(), Err(CofferError::NotUnlocked)));
}

// ---------------------------------------------------------------------------
// Save idempotence
// ---------------------------------------------------------------------------

#[test]
fn save_twice_differs_only_in_nonce_and_revision() {
    let dir = TempDir::new().unwrap();
    let store = AtomicStore::new(dir.path()).unwrap();

    let mut s = session(dir.path());
    s.unlock("correct").unwrap();
    s.set("email", "a@b.com").unwrap();

    let first = s.save().unwrap();
    let bytes_a = store.read_bytes("abc123").unwrap();

    let second = s.save().unwrap();
    let bytes_b = store.read_bytes("abc123").unwrap();

    assert_eq!(second.revision, first.revision + 1);
    // Same entries, same geometry: identical file size.
    assert_eq!(bytes_a.len(), bytes_b.len());

    // Both decode to the same entries.
    s.lock();
    s.unlock("correct").unwrap();
    assert_eq!(s.get("email").unwrap().as_deref(), Some("a@b.com"));
}

// ---------------------------------------------------------------------------
// Single-writer lock
// ---------------------------------------------------------------------------

#[test]
fn second_session_is_rejected_while_unlocked() {
    let dir = TempDir::new().unwrap();

    let mut a = session(dir.path());
    a.unlock("correct").unwrap();

    let mut b = session(dir.path());
    assert!(matches!(
        b.unlock("correct"),
        Err(CofferError::SessionBusy(_))
    ));

    // Locking the first session releases the id.
    a.lock();
    b.unlock("correct").unwrap();
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[test]
fn cancelled_unlock_leaves_session_locked() {
    let dir = TempDir::new().unwrap();
    let mut s = session(dir.path());

    let token = CancelToken::new();
    token.cancel();

    assert!(matches!(
        s.unlock_with("correct", &token),
        Err(CofferError::Cancelled)
    ));
    assert_eq!(s.state(), SessionState::Locked);

    // The lock file was released on the cancel path.
    s.unlock("correct").unwrap();
}

#[test]
fn cancelled_save_commits_nothing() {
    let dir = TempDir::new().unwrap();
    let store = AtomicStore::new(dir.path()).unwrap();

    let mut s = session(dir.path());
    s.unlock("correct").unwrap();
    s.set("email", "a@b.com").unwrap();

    let token = CancelToken::new();
    token.cancel();
    assert!(matches!(
        s.save_with(&token),
        Err(CofferError::Cancelled)
    ));

    // Nothing was persisted and the session is still dirty.
    assert!(!store.exists("abc123"));
    assert_eq!(s.state(), SessionState::Unlocked { dirty: true });
}

// ---------------------------------------------------------------------------
// Corruption recovery through the whole stack
// ---------------------------------------------------------------------------

/// Flip one byte inside each of `count` shards of the committed file.
fn corrupt_shards(dir: &Path, count: usize) {
    let store = AtomicStore::new(dir).unwrap();
    let path = store.db_path("abc123");
    let mut bytes = fs::read(&path).unwrap();

    let set = store.load("abc123").unwrap();
    let header_len = bytes.len() - set.shard_len * set.geometry.total_shards();
    for shard in 0..count {
        bytes[header_len + shard * set.shard_len] ^= 0xFF;
    }
    fs::write(&path, &bytes).unwrap();
}

#[test]
fn unlock_survives_bit_rot_within_parity() {
    let dir = TempDir::new().unwrap();
    let mut s = session(dir.path());
    s.unlock("correct").unwrap();
    s.set("email", "a@b.com").unwrap();
    s.save().unwrap();
    s.lock();

    corrupt_shards(dir.path(), 4);

    s.unlock("correct").unwrap();
    assert_eq!(s.get("email").unwrap().as_deref(), Some("a@b.com"));
}

#[test]
fn unlock_fails_uniformly_past_parity() {
    let dir = TempDir::new().unwrap();
    let mut s = session(dir.path());
    s.unlock("correct").unwrap();
    s.set("email", "a@b.com").unwrap();
    s.save().unwrap();
    s.lock();

    corrupt_shards(dir.path(), 5);

    // Unrecoverable corruption reports the same generic failure as a
    // wrong password.
    assert!(matches!(
        s.unlock("correct"),
        Err(CofferError::UnlockFailed)
    ));
    assert_eq!(s.state(), SessionState::Locked);
}

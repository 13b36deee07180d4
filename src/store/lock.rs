//! Single-writer session lock.
//!
//! Only one `VaultSession` may hold `Unlocked` state for a given db id.
//! The lock is a file next to the container, created with `create_new`
//! so acquisition is atomic on every filesystem; the guard removes it on
//! drop, which covers lock(), errors and panics alike.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use crate::errors::{CofferError, Result};

/// RAII guard for the exclusive vault lock.
pub struct LockGuard {
    path: PathBuf,
}

impl LockGuard {
    /// Acquire the lock, failing with `SessionBusy` if another session
    /// holds it.
    ///
    /// TODO: detect stale locks left by a killed process (compare the
    /// recorded pid against the live process table).
    pub fn acquire(path: PathBuf) -> Result<Self> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(CofferError::SessionBusy(path));
            }
            Err(e) => return Err(e.into()),
        };

        // Record the owning pid for operator diagnosis.
        let _ = writeln!(file, "{}", std::process::id());

        Ok(Self { path })
    }

    /// Path of the lock file, for diagnostics.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to remove lock file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn acquire_release_reacquire() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("abc123.lock");

        let guard = LockGuard::acquire(path.clone()).unwrap();
        assert!(path.exists());
        drop(guard);
        assert!(!path.exists());

        // Can be re-acquired after release.
        let _guard = LockGuard::acquire(path).unwrap();
    }

    #[test]
    fn second_acquire_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("abc123.lock");

        let _guard = LockGuard::acquire(path.clone()).unwrap();
        assert!(matches!(
            LockGuard::acquire(path),
            Err(CofferError::SessionBusy(_))
        ));
    }
}

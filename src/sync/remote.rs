//! The remote object store seam.
//!
//! The sync engine only ever sees this trait: an addressed blob store
//! holding opaque encrypted payloads.  Production uses the B2 backend;
//! tests and local-only setups use the in-memory one.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::errors::{CofferError, Result};

/// A remote store of opaque objects addressed by name.
///
/// The payloads are committed shard files, already encrypted, so the
/// remote never sees plaintext or keys.
pub trait ObjectStore {
    /// Upload an object, replacing any previous version.
    fn put(&self, name: &str, data: &[u8]) -> Result<()>;

    /// Download an object, or `None` if it does not exist.
    fn get(&self, name: &str) -> Result<Option<Vec<u8>>>;
}

// Engines built by different sessions can share one backend.
impl<T: ObjectStore + ?Sized> ObjectStore for std::sync::Arc<T> {
    fn put(&self, name: &str, data: &[u8]) -> Result<()> {
        (**self).put(name, data)
    }

    fn get(&self, name: &str) -> Result<Option<Vec<u8>>> {
        (**self).get(name)
    }
}

/// In-memory object store.
///
/// Backs the sync-engine tests and embedders that want the sync state
/// machine without a network; `fail_next_puts` injects transient upload
/// failures to exercise the retry path.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    failing_puts: Mutex<u32>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` calls to `put` fail with a transient error.
    pub fn fail_next_puts(&self, n: u32) {
        *self.failing_puts.lock().expect("mutex poisoned") = n;
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.lock().expect("mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ObjectStore for MemoryObjectStore {
    fn put(&self, name: &str, data: &[u8]) -> Result<()> {
        {
            let mut failing = self.failing_puts.lock().expect("mutex poisoned");
            if *failing > 0 {
                *failing -= 1;
                return Err(CofferError::Sync("injected transient failure".into()));
            }
        }
        self.objects
            .lock()
            .expect("mutex poisoned")
            .insert(name.to_string(), data.to_vec());
        Ok(())
    }

    fn get(&self, name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .objects
            .lock()
            .expect("mutex poisoned")
            .get(name)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_roundtrip() {
        let store = MemoryObjectStore::new();
        store.put("abc123/vault.coffer", b"payload").unwrap();
        assert_eq!(
            store.get("abc123/vault.coffer").unwrap(),
            Some(b"payload".to_vec())
        );
    }

    #[test]
    fn missing_object_is_none() {
        let store = MemoryObjectStore::new();
        assert_eq!(store.get("nope").unwrap(), None);
    }

    #[test]
    fn injected_failures_are_transient() {
        let store = MemoryObjectStore::new();
        store.fail_next_puts(2);
        assert!(store.put("x", b"1").is_err());
        assert!(store.put("x", b"1").is_err());
        assert!(store.put("x", b"1").is_ok());
    }
}

//! Remote synchronization.
//!
//! This module provides:
//! - The `ObjectStore` trait and an in-memory implementation (`remote`)
//! - A Backblaze-B2-style HTTP backend (`b2`, feature `remote-b2`)
//! - The push/pull reconciliation engine (`engine`)

#[cfg(feature = "remote-b2")]
pub mod b2;
pub mod engine;
pub mod remote;

// Re-export the most commonly used items.
#[cfg(feature = "remote-b2")]
pub use b2::B2Client;
pub use engine::{PullOutcome, PushOutcome, RemoteSnapshot, SyncEngine};
pub use remote::{MemoryObjectStore, ObjectStore};

//! On-disk storage for committed shard sets.
//!
//! This module provides:
//! - The versioned shard-file format (`format`)
//! - Crash-safe commit/load with backup retention (`atomic`)
//! - The single-writer session lock (`lock`)

pub mod atomic;
pub mod format;
pub mod lock;

// Re-export the most commonly used items.
pub use atomic::{validate_db_id, AtomicStore};
pub use lock::LockGuard;

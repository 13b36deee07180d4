//! Container module — the serialized, compressed, encrypted vault body.
//!
//! This module provides:
//! - The tag-length-value entry stream (`tlv`)
//! - The `Container` type and the encode/decode pipeline (`codec`)

pub mod codec;
pub mod tlv;

// Re-export the most commonly used items.
pub use codec::{decode, encode, Container};

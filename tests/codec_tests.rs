//! Integration tests for the container codec.

use std::collections::BTreeMap;

use coffer::container::{self, codec::MAX_COMPRESSION_LEVEL};
use coffer::credentials::Pepper;
use coffer::crypto::{self, KdfParams, MasterKey};
use coffer::errors::CofferError;

/// Helper: cheap KDF parameters so tests stay fast.
fn fast_kdf() -> KdfParams {
    KdfParams {
        memory_kib: 8_192,
        iterations: 1,
        parallelism: 1,
    }
}

/// Helper: derive a real master key from a password.
fn derived_key(password: &str) -> MasterKey {
    let pepper = Pepper::new([0x42; 32]);
    crypto::derive_master_key(&pepper, password.as_bytes(), "abc123", &fast_kdf()).unwrap()
}

fn entries(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

// ---------------------------------------------------------------------------
// Round-trip under the correct key
// ---------------------------------------------------------------------------

#[test]
fn roundtrip_various_entry_sets() {
    let key = derived_key("correct");

    let cases = [
        entries(&[]),
        entries(&[("email", "a@b.com")]),
        entries(&[("email", "a@b.com"), ("pin", "1234"), ("note", "hello")]),
        entries(&[("unicode", "pässwörd ☃"), ("empty", "")]),
    ];

    for (i, case) in cases.iter().enumerate() {
        let container = container::encode(case, &key, i as u64, MAX_COMPRESSION_LEVEL).unwrap();
        let decoded = container::decode(&container, &key).unwrap();
        assert_eq!(&decoded, case, "case {i} must round-trip");
    }
}

#[test]
fn large_values_roundtrip() {
    let key = derived_key("correct");
    let big = entries(&[("blob", &"x".repeat(8000))]);

    let container = container::encode(&big, &key, 1, MAX_COMPRESSION_LEVEL).unwrap();
    assert_eq!(container::decode(&container, &key).unwrap(), big);
}

// ---------------------------------------------------------------------------
// Authentication: wrong key fails closed
// ---------------------------------------------------------------------------

#[test]
fn wrong_derived_key_fails_with_auth() {
    let set = entries(&[("email", "a@b.com")]);
    let container = container::encode(&set, &derived_key("correct"), 1, 9).unwrap();

    let result = container::decode(&container, &derived_key("incorrect"));
    assert!(matches!(result, Err(CofferError::Auth)));
}

#[test]
fn every_tampered_byte_fails_with_auth() {
    let set = entries(&[("email", "a@b.com")]);
    let key = derived_key("correct");
    let container = container::encode(&set, &key, 1, 9).unwrap();

    // Flip each of a spread of ciphertext bytes; all must fail with
    // Auth, never a parse or decompression error.
    let len = container.ciphertext.len();
    for offset in [0, 1, len / 2, len - 2, len - 1] {
        let mut tampered = container.clone();
        tampered.ciphertext[offset] ^= 0x01;
        assert!(
            matches!(container::decode(&tampered, &key), Err(CofferError::Auth)),
            "byte {offset} must fail authentication"
        );
    }
}

#[test]
fn tampered_nonce_fails_with_auth() {
    let set = entries(&[("email", "a@b.com")]);
    let key = derived_key("correct");
    let mut container = container::encode(&set, &key, 1, 9).unwrap();
    container.nonce[0] ^= 0xFF;

    assert!(matches!(
        container::decode(&container, &key),
        Err(CofferError::Auth)
    ));
}

// ---------------------------------------------------------------------------
// Save idempotence at the codec level
// ---------------------------------------------------------------------------

#[test]
fn same_entries_encode_to_same_size_with_fresh_nonce() {
    let set = entries(&[("email", "a@b.com"), ("pin", "1234")]);
    let key = derived_key("correct");

    let a = container::encode(&set, &key, 7, 9).unwrap();
    let b = container::encode(&set, &key, 7, 9).unwrap();

    // Deterministic TLV + compression: identical payload size.
    assert_eq!(a.ciphertext.len(), b.ciphertext.len());
    // Fresh nonce per save: the encrypted bytes differ.
    assert_ne!(a.nonce, b.nonce);
    assert_ne!(a.ciphertext, b.ciphertext);
    // Both decode to the same entries.
    assert_eq!(
        container::decode(&a, &key).unwrap(),
        container::decode(&b, &key).unwrap()
    );
}

//! Canonical serialization for fingerprints and tokens.
//!
//! Snapshot fingerprints and resolve-token payloads are computed over the
//! JSON encoding of the value, so the encoding must be deterministic:
//!
//! - Struct fields serialize in declaration order
//! - Vectors serialize in index order
//! - Maps in hashed data are `BTreeMap` (or `serde_json::Map`, which is ordered)

use serde::Serialize;
use xxhash_rust::xxh64::xxh64;

/// Serialize a value to canonical JSON bytes.
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).expect("Canonical serialization failed")
}

/// xxh64 of the canonical bytes of `value`.
pub fn canonical_hash<T: Serialize>(value: &T) -> u64 {
    xxh64(&to_canonical_bytes(value), 0)
}

/// Fingerprint of `value` as 16 lowercase hex digits.
pub fn fingerprint<T: Serialize>(value: &T) -> String {
    format!("{:016x}", canonical_hash(value))
}

//! Deterministic bucketing.
//!
//! `bucket(unit, salt, n)` hashes `"{salt}|{unit}"` with MurmurHash3 x64/128
//! (seed 0), takes the low 64 bits of the digest, drops the lowest four bits
//! and the sign bit, and reduces modulo `n`. The result must agree with every
//! other implementation of the resolver, so none of these steps may change.

use std::io::Cursor;

use crate::types::SegmentBitset;

/// Size of the standard bucket space shared by segment bitsets.
pub const BUCKET_COUNT: u64 = 1_000_000;

const HASH_MASK: u64 = 0x0FFF_FFFF_FFFF_FFFF;

/// Low 64 bits of the MurmurHash3 x64/128 digest of `"{salt}|{unit}"`.
fn unit_hash(unit: &str, salt: &str) -> u64 {
    let key = format!("{salt}|{unit}");
    let digest = murmur3::murmur3_x64_128(&mut Cursor::new(key.as_bytes()), 0)
        .expect("reading from an in-memory buffer cannot fail");
    digest as u64
}

/// Bucket of `unit` in a space of `bucket_count` buckets.
///
/// # Panics
///
/// Panics if `bucket_count` is zero. State construction rejects such specs.
pub fn bucket(unit: &str, salt: &str, bucket_count: u64) -> u64 {
    ((unit_hash(unit, salt) >> 4) & HASH_MASK) % bucket_count
}

/// Whether `unit` falls into the segment's population sample.
///
/// A missing bitset means the segment has no population.
pub fn in_segment_bitset(bitset: Option<&SegmentBitset>, unit: &str, account_salt: &str) -> bool {
    match bitset {
        None => false,
        Some(SegmentBitset::Full) => true,
        Some(bits) => bits.contains(bucket(unit, account_salt, BUCKET_COUNT)),
    }
}

//! Segment types: targeting plus population sampling.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

use super::criterion::Criterion;
use super::expr::Expr;
use crate::bucket::BUCKET_COUNT;

/// Number of bytes in a full population bitset (one bit per bucket).
pub const BITSET_BYTES: usize = (BUCKET_COUNT as usize) / 8;

/// Targeting of a segment: an expression over named criteria.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Targeting {
    /// Expression whose references name entries of `criteria`.
    pub expression: Expr,
    /// Reference name -> criterion.
    #[serde(default)]
    pub criteria: BTreeMap<String, Criterion>,
}

impl Targeting {
    /// Targeting that admits every unit.
    pub fn everyone() -> Self {
        Self { expression: Expr::True, criteria: BTreeMap::new() }
    }

    /// Targeting from an expression and its criteria.
    pub fn new(expression: Expr, criteria: BTreeMap<String, Criterion>) -> Self {
        Self { expression, criteria }
    }

    /// References used by the expression that have no criterion.
    pub fn dangling_refs(&self) -> Vec<String> {
        self.expression
            .refs()
            .into_iter()
            .filter(|name| !self.criteria.contains_key(*name))
            .map(str::to_string)
            .collect()
    }
}

impl Default for Targeting {
    fn default() -> Self {
        Self::everyone()
    }
}

/// A named population predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Segment name.
    pub name: String,
    /// Targeting expression and criteria.
    #[serde(default)]
    pub targeting: Targeting,
}

impl Segment {
    /// Segment with the given targeting.
    pub fn new(name: impl Into<String>, targeting: Targeting) -> Self {
        Self { name: name.into(), targeting }
    }
}

/// Population sample of a segment over the standard bucket space.
///
/// Bit `i` (little-endian within each byte) is set when bucket `i` is in the
/// population.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentBitset {
    /// Every bucket is in the population.
    Full,
    /// Exactly [`BUCKET_COUNT`] bits.
    Bits(Vec<u8>),
}

impl SegmentBitset {
    /// An all-zero bitset.
    pub fn empty() -> Self {
        Self::Bits(vec![0; BITSET_BYTES])
    }

    /// Bitset with the given buckets set.
    pub fn from_buckets(buckets: impl IntoIterator<Item = u64>) -> Self {
        let mut bytes = vec![0u8; BITSET_BYTES];
        for bucket in buckets {
            let i = bucket as usize;
            if i < BUCKET_COUNT as usize {
                bytes[i / 8] |= 1 << (i % 8);
            }
        }
        Self::Bits(bytes)
    }

    /// Bitset covering `[lower, upper)`.
    pub fn from_range(lower: u64, upper: u64) -> Self {
        Self::from_buckets(lower..upper)
    }

    /// Whether the bitset has the expected size.
    pub fn is_well_formed(&self) -> bool {
        match self {
            Self::Full => true,
            Self::Bits(bytes) => bytes.len() == BITSET_BYTES,
        }
    }

    /// Whether bucket `i` is in the population.
    pub fn contains(&self, bucket: u64) -> bool {
        match self {
            Self::Full => true,
            Self::Bits(bytes) => {
                let i = bucket as usize;
                bytes.get(i / 8).map_or(false, |byte| byte & (1 << (i % 8)) != 0)
            }
        }
    }

    /// Number of buckets in the population.
    pub fn population(&self) -> u64 {
        match self {
            Self::Full => BUCKET_COUNT,
            Self::Bits(bytes) => bytes.iter().map(|b| u64::from(b.count_ones())).sum(),
        }
    }
}

/// Wire form: `"full"` or a hex string of the raw bytes.
impl Serialize for SegmentBitset {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Full => serializer.serialize_str("full"),
            Self::Bits(bytes) => serializer.serialize_str(&hex::encode(bytes)),
        }
    }
}

impl<'de> Deserialize<'de> for SegmentBitset {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s == "full" {
            return Ok(Self::Full);
        }
        hex::decode(&s).map(Self::Bits).map_err(serde::de::Error::custom)
    }
}

//! Account state snapshots.
//!
//! An [`AccountState`] is built once per configuration fetch and never
//! mutated afterwards. Every concurrent resolve reads the same snapshot until
//! a new one replaces it wholesale.
//!
//! Construction validates the configuration so resolution can assume it:
//!
//! - every reference in a segment's targeting expression names a criterion
//! - every bitset has exactly one bit per standard bucket
//! - every rule's bucket ranges are disjoint and inside `[0, bucket_count)`
//! - every assignment names a variant the flag defines
//! - every variant value conforms to the flag schema (and is expanded with nulls)

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::canonical::fingerprint;
use crate::types::{
    AssignmentKind, Criterion, CriterionError, Expr, Flag, SchemaViolation, Segment, SegmentBitset,
};

/// Prefix of the per-account bucketing salt.
pub const ACCOUNT_SALT_PREFIX: &str = "MegaSalt-";

/// Errors building an [`AccountState`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StateError {
    /// Snapshot bytes do not decode.
    #[error("State decode error: {0}")]
    Decode(String),
    /// Targeting expression references a name missing from the criteria.
    #[error("Segment '{segment}' references unknown criterion '{reference}'")]
    UnknownReference {
        /// Segment name.
        segment: String,
        /// Missing reference.
        reference: String,
    },
    /// Segment criterion references a segment that does not exist.
    #[error("Segment '{segment}' references unknown segment '{target}'")]
    UnknownSegment {
        /// Referencing segment.
        segment: String,
        /// Missing segment.
        target: String,
    },
    /// Criterion rule is malformed.
    #[error("Criterion '{criterion}' of segment '{segment}' is invalid: {source}")]
    InvalidCriterion {
        /// Segment name.
        segment: String,
        /// Criterion name.
        criterion: String,
        /// Underlying error.
        source: CriterionError,
    },
    /// Bitset does not have one bit per bucket.
    #[error("Bitset of segment '{segment}' has {len} bytes, expected {expected}")]
    InvalidBitset {
        /// Segment name.
        segment: String,
        /// Actual byte length.
        len: usize,
        /// Expected byte length.
        expected: usize,
    },
    /// Bucket ranges of a rule overlap or leave the bucket space.
    #[error("Rule '{rule}' of flag '{flag}' has invalid bucket ranges: {reason}")]
    InvalidAssignmentSpec {
        /// Flag name.
        flag: String,
        /// Rule name.
        rule: String,
        /// Description of the violation.
        reason: String,
    },
    /// Assignment names a variant the flag does not define.
    #[error("Rule '{rule}' of flag '{flag}' assigns unknown variant '{variant}'")]
    UnknownVariant {
        /// Flag name.
        flag: String,
        /// Rule name.
        rule: String,
        /// Variant name.
        variant: String,
    },
    /// Variant value does not conform to the flag schema.
    #[error("Variant '{variant}' of flag '{flag}' violates schema: {source}")]
    Schema {
        /// Flag name.
        flag: String,
        /// Variant name.
        variant: String,
        /// Underlying violation.
        source: SchemaViolation,
    },
    /// Two definitions share a name.
    #[error("Duplicate {kind} '{name}'")]
    Duplicate {
        /// What was duplicated.
        kind: &'static str,
        /// Duplicated name.
        name: String,
    },
}

/// A client credential: resolves presenting `secret` act as `client`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCredential {
    /// Client name.
    pub client: String,
    /// Secret the client presents.
    pub secret: String,
}

/// Decoded configuration snapshot, as delivered by the fetch pipeline.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AccountStateInput {
    /// Account name.
    pub account: String,
    /// Flags.
    #[serde(default)]
    pub flags: Vec<Flag>,
    /// Segments.
    #[serde(default)]
    pub segments: Vec<Segment>,
    /// Segment name -> population bitset.
    #[serde(default)]
    pub bitsets: BTreeMap<String, SegmentBitset>,
    /// Client credentials.
    #[serde(default)]
    pub clients: Vec<ClientCredential>,
}

/// Immutable, validated snapshot of one account's configuration.
#[derive(Debug)]
pub struct AccountState {
    account: String,
    salt: String,
    flags: BTreeMap<String, Flag>,
    segments: HashMap<String, Segment>,
    bitsets: HashMap<String, SegmentBitset>,
    targeting: HashMap<String, Expr>,
    secrets: HashMap<String, String>,
    fingerprint: String,
}

impl AccountState {
    /// Decode and build a snapshot from JSON bytes.
    pub fn from_json(bytes: &[u8]) -> Result<Self, StateError> {
        let input: AccountStateInput =
            serde_json::from_slice(bytes).map_err(|e| StateError::Decode(e.to_string()))?;
        Self::build(input)
    }

    /// Validate `input` and build the snapshot.
    pub fn build(input: AccountStateInput) -> Result<Self, StateError> {
        let fingerprint = fingerprint(&input);
        let AccountStateInput {
            account,
            flags,
            segments,
            bitsets,
            clients,
        } = input;

        let mut segment_map = HashMap::with_capacity(segments.len());
        for segment in segments {
            if segment_map.contains_key(&segment.name) {
                return Err(StateError::Duplicate { kind: "segment", name: segment.name });
            }
            segment_map.insert(segment.name.clone(), segment);
        }

        let mut targeting = HashMap::with_capacity(segment_map.len());
        for segment in segment_map.values() {
            validate_segment(segment, &segment_map)?;
            targeting.insert(segment.name.clone(), segment.targeting.expression.simplify());
        }

        let mut bitset_map = HashMap::with_capacity(bitsets.len());
        for (name, bitset) in bitsets {
            if let SegmentBitset::Bits(bytes) = &bitset {
                if !bitset.is_well_formed() {
                    return Err(StateError::InvalidBitset {
                        segment: name,
                        len: bytes.len(),
                        expected: crate::types::BITSET_BYTES,
                    });
                }
            }
            bitset_map.insert(name, bitset);
        }

        let mut flag_map = BTreeMap::new();
        for flag in flags {
            let flag = validate_flag(flag)?;
            if flag_map.contains_key(&flag.name) {
                return Err(StateError::Duplicate { kind: "flag", name: flag.name });
            }
            flag_map.insert(flag.name.clone(), flag);
        }

        let secrets = clients.into_iter().map(|c| (c.secret, c.client)).collect();

        let salt = format!("{ACCOUNT_SALT_PREFIX}{account}");
        tracing::debug!(
            account = %account,
            flags = flag_map.len(),
            segments = segment_map.len(),
            fingerprint = %fingerprint,
            "Built account state"
        );

        Ok(Self {
            account,
            salt,
            flags: flag_map,
            segments: segment_map,
            bitsets: bitset_map,
            targeting,
            secrets,
            fingerprint,
        })
    }

    /// Account name.
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Salt for segment population bucketing, derived from the account name.
    pub fn salt(&self) -> &str {
        &self.salt
    }

    /// Flag by name.
    pub fn flag(&self, name: &str) -> Option<&Flag> {
        self.flags.get(name)
    }

    /// All flags, ordered by name.
    pub fn flags(&self) -> impl Iterator<Item = &Flag> {
        self.flags.values()
    }

    /// Segment by name.
    pub fn segment(&self, name: &str) -> Option<&Segment> {
        self.segments.get(name)
    }

    /// Population bitset of a segment.
    pub fn bitset(&self, segment: &str) -> Option<&SegmentBitset> {
        self.bitsets.get(segment)
    }

    /// Simplified targeting expression of a segment.
    pub fn targeting_expr(&self, segment: &str) -> Option<&Expr> {
        self.targeting.get(segment)
    }

    /// Client owning `secret`.
    pub fn client_for_secret(&self, secret: &str) -> Option<&str> {
        self.secrets.get(secret).map(String::as_str)
    }

    /// Canonical hash of the input this snapshot was built from.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

fn validate_segment(segment: &Segment, segments: &HashMap<String, Segment>) -> Result<(), StateError> {
    if let Some(reference) = segment.targeting.dangling_refs().into_iter().next() {
        return Err(StateError::UnknownReference {
            segment: segment.name.clone(),
            reference,
        });
    }
    for (name, criterion) in &segment.targeting.criteria {
        match criterion {
            Criterion::Attribute { rule, .. } => {
                rule.validate().map_err(|source| StateError::InvalidCriterion {
                    segment: segment.name.clone(),
                    criterion: name.clone(),
                    source,
                })?;
            }
            Criterion::Segment { segment: target } => {
                if !segments.contains_key(target) {
                    return Err(StateError::UnknownSegment {
                        segment: segment.name.clone(),
                        target: target.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}

fn validate_flag(mut flag: Flag) -> Result<Flag, StateError> {
    for rule in &flag.rules {
        rule.assignment_spec
            .check_partition()
            .map_err(|reason| StateError::InvalidAssignmentSpec {
                flag: flag.name.clone(),
                rule: rule.name.clone(),
                reason,
            })?;
        for assignment in &rule.assignment_spec.assignments {
            if let AssignmentKind::Variant { variant } = &assignment.kind {
                if flag.variant(variant).is_none() {
                    return Err(StateError::UnknownVariant {
                        flag: flag.name.clone(),
                        rule: rule.name.clone(),
                        variant: variant.clone(),
                    });
                }
            }
        }
    }
    for variant in &mut flag.variants {
        variant.value = flag.schema.expand(&variant.value).map_err(|source| StateError::Schema {
            flag: flag.name.clone(),
            variant: variant.name.clone(),
            source,
        })?;
    }
    Ok(flag)
}

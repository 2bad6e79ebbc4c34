//! # flag-resolver
//!
//! Feature flag resolution with deterministic bucketing and sticky assignments.
//!
//! The resolver answers one question:
//!
//! > Given a client and an evaluation context, which variant of each flag applies?
//!
//! ## Core Contract
//!
//! 1. Walk a flag's rules in order; the first rule whose segment matches and
//!    whose bucket range covers the unit decides the variant
//! 2. Bucket units with a salted MurmurHash3 so every process, in every
//!    language, agrees on the assignment
//! 3. Keep previously materialized ("sticky") assignments stable when
//!    configuration or traffic allocation changes
//! 4. Swap configuration snapshots without disturbing in-flight resolves
//!
//! ## Architecture
//!
//! ```text
//! ResolveRequest → StickyResolutionCoordinator → StateRotator → EvaluationRuntime
//!                          ↓                                         ↓
//!                 MaterializationStore                Resolver → SegmentEvaluator → Expr
//!                 (memory / LRU / Postgres)              ↓              ↓
//!                                                     Bucketer   AttributeRule + matcher
//! ```
//!
//! ## Determinism Guarantees
//!
//! - Same unit + same salt + same bucket count → same bucket, everywhere
//! - Snapshots are immutable; each resolve pins one snapshot for its duration
//! - Snapshot fingerprints are canonical xxh64 hashes of the snapshot input

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod types;
pub mod matcher;
pub mod bucket;
pub mod canonical;
pub mod config;
pub mod state;
pub mod segment;
pub mod resolver;
pub mod runtime;
pub mod rotator;
pub mod sticky;
pub mod store;

// Re-exports
pub use types::{
    AssignedFlag, Assignment, AssignmentKind, AssignmentMatch, AssignmentSpec, AttributeRule, Bound,
    BucketRange, Criterion, CriterionError, EvaluationContext, Expr, FallthroughRule, FieldSchema,
    Flag, FlagSchema, FlagState, MaterializationContext, MaterializationInfo, MaterializationMode,
    MaterializationSpec, MaterializationUpdate, MissingMaterialization, RangeRule, ResolveReason,
    ResolveToken, ResolvedFlag, ResolvedValue, Rule, ScalarValue, SealedToken, Segment,
    SegmentBitset, SemanticVersion, Targeting, TokenError, ValueKind, Variant,
};
pub use bucket::{bucket, in_segment_bitset, BUCKET_COUNT};
pub use canonical::{canonical_hash, fingerprint, to_canonical_bytes};
pub use config::ResolverConfig;
pub use state::{AccountState, AccountStateInput, ClientCredential, StateError};
pub use segment::{SegmentError, SegmentEvaluator};
pub use resolver::{
    AppliedFlag, ApplyRequest, AssignmentEvent, FlagOutcome, Resolution, ResolveError, ResolveOutcome,
    ResolveRequest, ResolveResponse, Resolver,
};
pub use runtime::{EvaluationRuntime, LocalRuntime, ResolveLogEntry, RuntimeError, RuntimeLogs, RuntimeResponse};
pub use rotator::{RuntimeFactory, StateRotator};
pub use sticky::{FallbackResolver, StickyError, StickyResolutionCoordinator, StickyStrategy};
pub use store::{
    CacheConfig, CacheStats, CachedMaterializationStore, InMemoryMaterializationStore,
    MaterializationStore, StoreError,
};
#[cfg(feature = "postgres")]
pub use store::{PostgresConfig, PostgresMaterializationStore};

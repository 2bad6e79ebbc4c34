//! Core types for the flag resolver.

pub mod expr;
pub mod value;
pub mod context;
pub mod criterion;
pub mod segment;
pub mod schema;
pub mod flag;
pub mod materialization;
pub mod resolved;
pub mod token;

pub use expr::Expr;
pub use value::{ScalarValue, SemanticVersion, ValueKind};
pub use context::{coerce, EvaluationContext, DEFAULT_TARGETING_KEY};
pub use criterion::{AttributeRule, Bound, Criterion, CriterionError, RangeRule};
pub use segment::{Segment, SegmentBitset, Targeting, BITSET_BYTES};
pub use schema::{FieldSchema, FlagSchema, SchemaViolation};
pub use flag::{
    Assignment, AssignmentKind, AssignmentSpec, BucketRange, Flag, FlagState,
    MaterializationMode, MaterializationSpec, Rule, Variant,
};
pub use materialization::{
    group_updates, MaterializationContext, MaterializationInfo, MaterializationUpdate,
    MissingMaterialization,
};
pub use resolved::{AssignmentMatch, FallthroughRule, ResolveReason, ResolvedFlag, ResolvedValue};
pub use token::{AssignedFlag, ResolveToken, SealedToken, TokenError};

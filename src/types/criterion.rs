//! Targeting criteria: typed attribute rules and segment references.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::context::coerce;
use super::value::{ScalarValue, ValueKind};
use crate::matcher;

/// Errors raised by criterion validation and the set/range algebra.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CriterionError {
    /// Two operands of different scalar kinds were combined.
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// Kind of the first operand.
        expected: ValueKind,
        /// Kind of the offending operand.
        found: ValueKind,
    },
    /// `Any`/`All` wrapping another quantifier.
    #[error("Quantified rule cannot wrap another quantifier")]
    NestedQuantifier,
}

/// One boundary of a range. Inclusive boundaries contain their value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bound {
    /// Boundary value.
    pub value: ScalarValue,
    /// Whether the boundary value itself is inside the range.
    pub inclusive: bool,
}

impl Bound {
    /// Inclusive bound.
    pub fn inclusive(value: impl Into<ScalarValue>) -> Self {
        Self { value: value.into(), inclusive: true }
    }

    /// Exclusive bound.
    pub fn exclusive(value: impl Into<ScalarValue>) -> Self {
        Self { value: value.into(), inclusive: false }
    }
}

/// Range over one scalar kind. An unset boundary is unbounded on that side.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RangeRule {
    /// Lower boundary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<Bound>,
    /// Upper boundary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<Bound>,
}

impl RangeRule {
    /// Range with the given boundaries.
    pub fn new(start: Option<Bound>, end: Option<Bound>) -> Self {
        Self { start, end }
    }

    /// Kind of the boundary values, if any boundary is set.
    pub fn kind(&self) -> Result<Option<ValueKind>, CriterionError> {
        let kinds = self
            .start
            .iter()
            .chain(self.end.iter())
            .map(|b| b.value.kind());
        uniform_kind(kinds)
    }
}

/// Rule applied to a single context attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeRule {
    /// Attribute equals the value.
    Eq(ScalarValue),
    /// Attribute is one of the values.
    Set(Vec<ScalarValue>),
    /// Attribute lies within the range.
    Range(RangeRule),
    /// At least one element of a list attribute satisfies the inner rule.
    Any(Box<AttributeRule>),
    /// Every element of a non-empty list attribute satisfies the inner rule.
    All(Box<AttributeRule>),
}

impl AttributeRule {
    /// The scalar kind this rule is declared over.
    ///
    /// `Ok(None)` for rules without any value (empty set, unbounded range).
    pub fn kind(&self) -> Result<Option<ValueKind>, CriterionError> {
        match self {
            Self::Eq(v) => Ok(Some(v.kind())),
            Self::Set(values) => uniform_kind(values.iter().map(ScalarValue::kind)),
            Self::Range(range) => range.kind(),
            Self::Any(inner) | Self::All(inner) => inner.kind(),
        }
    }

    /// Check that the rule is well formed: one scalar kind, no nested quantifiers.
    pub fn validate(&self) -> Result<(), CriterionError> {
        match self {
            Self::Any(inner) | Self::All(inner) => {
                if matches!(inner.as_ref(), Self::Any(_) | Self::All(_)) {
                    return Err(CriterionError::NestedQuantifier);
                }
                inner.validate()
            }
            other => other.kind().map(|_| ()),
        }
    }

    /// Whether a context attribute satisfies this rule.
    ///
    /// The attribute is coerced to the rule's kind; an attribute that cannot
    /// be coerced (missing, null, wrong shape) does not satisfy the rule.
    pub fn matches(&self, attribute: &Value) -> bool {
        match self {
            Self::Any(inner) => broadcast(attribute).iter().any(|v| inner.matches(v)),
            Self::All(inner) => {
                let elements = broadcast(attribute);
                !elements.is_empty() && elements.iter().all(|v| inner.matches(v))
            }
            Self::Eq(expected) => coerce(attribute, expected.kind())
                .map(|actual| actual.same_as(expected))
                .unwrap_or(false),
            Self::Set(values) => {
                let kind = match values.first() {
                    Some(first) => first.kind(),
                    None => return false,
                };
                match coerce(attribute, kind) {
                    Some(actual) => values.iter().any(|v| v.same_as(&actual)),
                    None => false,
                }
            }
            Self::Range(range) => match range.kind() {
                Ok(Some(kind)) => coerce(attribute, kind)
                    .map(|actual| matcher::is_in_range(range, &actual).unwrap_or(false))
                    .unwrap_or(false),
                // Fully unbounded: any present scalar is in range.
                Ok(None) => !attribute.is_null() && !attribute.is_array() && !attribute.is_object(),
                Err(_) => false,
            },
        }
    }

    /// Whether some attribute value could satisfy both rules.
    ///
    /// Quantifiers are looked through: a scalar attribute behaves as a
    /// one-element list, so the question reduces to the inner rules.
    pub fn overlaps(&self, other: &AttributeRule) -> Result<bool, CriterionError> {
        use AttributeRule::*;
        match (self, other) {
            (Any(a) | All(a), b) => a.overlaps(b),
            (a, Any(b) | All(b)) => a.overlaps(b),
            (Eq(a), Eq(b)) => matcher::eq_overlap(a, b),
            (Eq(a), Set(b)) | (Set(b), Eq(a)) => matcher::eq_set_overlap(a, b),
            (Eq(a), Range(r)) | (Range(r), Eq(a)) => matcher::eq_range_overlap(a, r),
            (Set(a), Set(b)) => matcher::sets_overlap(a, b),
            (Set(s), Range(r)) | (Range(r), Set(s)) => {
                let mut any = false;
                for v in s {
                    any |= matcher::eq_range_overlap(v, r)?;
                }
                Ok(any)
            }
            (Range(a), Range(b)) => matcher::range_overlap(a, b),
        }
    }
}

/// Treat a scalar as a one-element list; `null` as an empty one.
fn broadcast(attribute: &Value) -> Vec<&Value> {
    match attribute {
        Value::Null => Vec::new(),
        Value::Array(items) => items.iter().collect(),
        scalar => vec![scalar],
    }
}

pub(crate) fn uniform_kind(
    mut kinds: impl Iterator<Item = ValueKind>,
) -> Result<Option<ValueKind>, CriterionError> {
    let first = match kinds.next() {
        Some(k) => k,
        None => return Ok(None),
    };
    for k in kinds {
        if k != first {
            return Err(CriterionError::TypeMismatch { expected: first, found: k });
        }
    }
    Ok(Some(first))
}

/// A named criterion inside a segment's targeting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    /// Rule over a context attribute addressed by dot path.
    Attribute {
        /// Dot path into the evaluation context.
        attribute: String,
        /// Rule the attribute must satisfy.
        rule: AttributeRule,
    },
    /// Satisfied when the unit is in another segment.
    Segment {
        /// Referenced segment name.
        segment: String,
    },
}

impl Criterion {
    /// Attribute criterion.
    pub fn attribute(attribute: impl Into<String>, rule: AttributeRule) -> Self {
        Self::Attribute { attribute: attribute.into(), rule }
    }

    /// Segment-reference criterion.
    pub fn segment(segment: impl Into<String>) -> Self {
        Self::Segment { segment: segment.into() }
    }
}

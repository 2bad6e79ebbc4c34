//! Set and range algebra over typed scalar values.
//!
//! Every operation is total over well-typed inputs. Combining operands of
//! different [`ValueKind`](crate::types::ValueKind)s is a hard
//! [`CriterionError::TypeMismatch`], never a silent non-match.
//!
//! ## Range semantics
//!
//! | start | end | contains `v` when |
//! |-------|-----|-------------------|
//! | inclusive `a` | inclusive `b` | `a <= v <= b` |
//! | exclusive `a` | inclusive `b` | `a < v <= b` |
//! | inclusive `a` | exclusive `b` | `a <= v < b` |
//! | exclusive `a` | exclusive `b` | `a < v < b` |
//!
//! An unset boundary is unbounded on that side.

use std::cmp::Ordering;

use crate::types::criterion::{uniform_kind, Bound, CriterionError, RangeRule};
use crate::types::value::ScalarValue;

fn check_kinds<'a>(values: impl IntoIterator<Item = &'a ScalarValue>) -> Result<(), CriterionError> {
    uniform_kind(values.into_iter().map(ScalarValue::kind)).map(|_| ())
}

fn range_values(range: &RangeRule) -> impl Iterator<Item = &ScalarValue> {
    range.start.iter().chain(range.end.iter()).map(|b| &b.value)
}

fn compare(a: &ScalarValue, b: &ScalarValue) -> Result<Ordering, CriterionError> {
    a.compare(b).ok_or(CriterionError::TypeMismatch {
        expected: a.kind(),
        found: b.kind(),
    })
}

/// Whether two values are equal.
pub fn eq_overlap(a: &ScalarValue, b: &ScalarValue) -> Result<bool, CriterionError> {
    Ok(compare(a, b)? == Ordering::Equal)
}

/// Whether `value` is a member of `set`.
pub fn eq_set_overlap(value: &ScalarValue, set: &[ScalarValue]) -> Result<bool, CriterionError> {
    check_kinds(std::iter::once(value).chain(set.iter()))?;
    Ok(set.iter().any(|v| v.same_as(value)))
}

/// Whether `value` lies within `range`.
pub fn eq_range_overlap(value: &ScalarValue, range: &RangeRule) -> Result<bool, CriterionError> {
    is_in_range(range, value)
}

/// Whether `value` lies within `range`, honouring each boundary's inclusivity.
pub fn is_in_range(range: &RangeRule, value: &ScalarValue) -> Result<bool, CriterionError> {
    check_kinds(std::iter::once(value).chain(range_values(range)))?;

    if let Some(start) = &range.start {
        let ord = compare(value, &start.value)?;
        let ok = if start.inclusive { ord != Ordering::Less } else { ord == Ordering::Greater };
        if !ok {
            return Ok(false);
        }
    }
    if let Some(end) = &range.end {
        let ord = compare(value, &end.value)?;
        let ok = if end.inclusive { ord != Ordering::Greater } else { ord == Ordering::Less };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

/// A range is empty if `start > end`, or `start == end` while either boundary
/// is exclusive. Ranges with an unbounded side are never empty.
pub fn is_empty_range(range: &RangeRule) -> Result<bool, CriterionError> {
    match (&range.start, &range.end) {
        (Some(start), Some(end)) => Ok(match compare(&start.value, &end.value)? {
            Ordering::Greater => true,
            Ordering::Equal => !start.inclusive || !end.inclusive,
            Ordering::Less => false,
        }),
        _ => Ok(false),
    }
}

/// Tighter of two lower bounds; on a tie the exclusive one wins.
fn tighter_start(a: Option<&Bound>, b: Option<&Bound>) -> Result<Option<Bound>, CriterionError> {
    Ok(match (a, b) {
        (None, other) | (other, None) => other.cloned(),
        (Some(x), Some(y)) => Some(match compare(&x.value, &y.value)? {
            Ordering::Greater => x.clone(),
            Ordering::Less => y.clone(),
            Ordering::Equal => Bound { value: x.value.clone(), inclusive: x.inclusive && y.inclusive },
        }),
    })
}

/// Tighter of two upper bounds; on a tie the exclusive one wins.
fn tighter_end(a: Option<&Bound>, b: Option<&Bound>) -> Result<Option<Bound>, CriterionError> {
    Ok(match (a, b) {
        (None, other) | (other, None) => other.cloned(),
        (Some(x), Some(y)) => Some(match compare(&x.value, &y.value)? {
            Ordering::Less => x.clone(),
            Ordering::Greater => y.clone(),
            Ordering::Equal => Bound { value: x.value.clone(), inclusive: x.inclusive && y.inclusive },
        }),
    })
}

/// Intersection of two ranges.
pub fn intersect_ranges(a: &RangeRule, b: &RangeRule) -> Result<RangeRule, CriterionError> {
    check_kinds(range_values(a).chain(range_values(b)))?;
    Ok(RangeRule {
        start: tighter_start(a.start.as_ref(), b.start.as_ref())?,
        end: tighter_end(a.end.as_ref(), b.end.as_ref())?,
    })
}

/// Whether two ranges share at least one point.
///
/// Touching boundaries overlap only when both touching sides are inclusive.
pub fn range_overlap(a: &RangeRule, b: &RangeRule) -> Result<bool, CriterionError> {
    let intersection = intersect_ranges(a, b)?;
    Ok(!is_empty_range(&intersection)?)
}

/// Whether the sets share an element.
pub fn sets_overlap(a: &[ScalarValue], b: &[ScalarValue]) -> Result<bool, CriterionError> {
    check_kinds(a.iter().chain(b.iter()))?;
    Ok(a.iter().any(|x| b.iter().any(|y| x.same_as(y))))
}

/// Whether "in `a`" and "not in `b`" can both hold: some element of `a` is
/// missing from `b`.
pub fn sets_overlap_negated(a: &[ScalarValue], b: &[ScalarValue]) -> Result<bool, CriterionError> {
    check_kinds(a.iter().chain(b.iter()))?;
    Ok(a.iter().any(|x| !b.iter().any(|y| x.same_as(y))))
}

fn push_unique(out: &mut Vec<ScalarValue>, value: &ScalarValue) {
    if !out.iter().any(|v| v.same_as(value)) {
        out.push(value.clone());
    }
}

/// Elements of `a` also in `b`, in first-seen order of `a`.
pub fn intersect_sets(
    a: &[ScalarValue],
    b: &[ScalarValue],
) -> Result<Vec<ScalarValue>, CriterionError> {
    check_kinds(a.iter().chain(b.iter()))?;
    let mut out = Vec::new();
    for x in a.iter().filter(|x| b.iter().any(|y| x.same_as(y))) {
        push_unique(&mut out, x);
    }
    Ok(out)
}

/// Elements of `a` then `b`, first-seen order, de-duplicated.
pub fn union_sets(a: &[ScalarValue], b: &[ScalarValue]) -> Result<Vec<ScalarValue>, CriterionError> {
    check_kinds(a.iter().chain(b.iter()))?;
    let mut out = Vec::with_capacity(a.len() + b.len());
    for x in a.iter().chain(b.iter()) {
        push_unique(&mut out, x);
    }
    Ok(out)
}

/// Elements of `a` not in `b`, in first-seen order of `a`.
pub fn subtract_sets(
    a: &[ScalarValue],
    b: &[ScalarValue],
) -> Result<Vec<ScalarValue>, CriterionError> {
    check_kinds(a.iter().chain(b.iter()))?;
    let mut out = Vec::new();
    for x in a.iter().filter(|x| !b.iter().any(|y| x.same_as(y))) {
        push_unique(&mut out, x);
    }
    Ok(out)
}

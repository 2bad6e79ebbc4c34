//! Segment evaluation.
//!
//! A unit is in a segment when the segment's targeting expression holds for
//! the evaluation context **and** the unit's bucket is in the segment's
//! population bitset. Criteria may reference other segments; those are
//! evaluated recursively along a cycle-checked path. Each segment is evaluated
//! at most once per `matches` call.

use std::collections::{HashMap, HashSet};

use crate::bucket::in_segment_bitset;
use crate::state::AccountState;
use crate::types::{Criterion, EvaluationContext};

/// Errors evaluating segment membership.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SegmentError {
    /// A segment references itself, directly or transitively.
    #[error("Circular segment dependency: {path}")]
    CircularDependency {
        /// Segments on the cycle, joined by `->`.
        path: String,
    },
    /// A referenced segment is not in the snapshot.
    #[error("Unknown segment: {0}")]
    UnknownSegment(String),
}

/// Evaluates segment membership against one snapshot and context.
pub struct SegmentEvaluator<'a> {
    state: &'a AccountState,
    context: &'a EvaluationContext,
}

impl<'a> SegmentEvaluator<'a> {
    /// Evaluator over `state` for `context`.
    pub fn new(state: &'a AccountState, context: &'a EvaluationContext) -> Self {
        Self { state, context }
    }

    /// Whether `unit` is in `segment`.
    pub fn matches(&self, segment: &str, unit: &str) -> Result<bool, SegmentError> {
        let mut visited = Vec::new();
        let mut memo = HashMap::new();
        self.matches_on_path(segment, unit, &mut visited, &mut memo)
    }

    fn matches_on_path(
        &self,
        name: &str,
        unit: &str,
        visited: &mut Vec<String>,
        memo: &mut HashMap<String, bool>,
    ) -> Result<bool, SegmentError> {
        // A memoized segment finished evaluating, so it is not on the path.
        if let Some(&known) = memo.get(name) {
            return Ok(known);
        }
        if visited.iter().any(|v| v == name) {
            let mut path = visited.join(" -> ");
            path.push_str(" -> ");
            path.push_str(name);
            return Err(SegmentError::CircularDependency { path });
        }
        let segment = self
            .state
            .segment(name)
            .ok_or_else(|| SegmentError::UnknownSegment(name.to_string()))?;
        visited.push(name.to_string());

        // Every criterion the expression names is evaluated, so cycles are
        // reported even where the expression would short-circuit.
        let mut satisfied = HashSet::new();
        for reference in segment.targeting.expression.refs() {
            let holds = match segment.targeting.criteria.get(reference) {
                Some(Criterion::Attribute { attribute, rule }) => rule.matches(self.context.get(attribute)),
                Some(Criterion::Segment { segment }) => self.matches_on_path(segment, unit, visited, memo)?,
                None => false,
            };
            if holds {
                satisfied.insert(reference.to_string());
            }
        }
        visited.pop();

        let targeted = match self.state.targeting_expr(name) {
            Some(expr) => expr.eval(&satisfied),
            None => segment.targeting.expression.eval(&satisfied),
        };
        let member = targeted && in_segment_bitset(self.state.bitset(name), unit, self.state.salt());
        memo.insert(name.to_string(), member);
        Ok(member)
    }
}

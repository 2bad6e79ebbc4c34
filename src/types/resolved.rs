//! Resolution results.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Why a flag resolved the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResolveReason {
    /// A rule matched and produced an assignment.
    #[serde(rename = "RESOLVE_REASON_MATCH")]
    Match,
    /// No rule's segment matched the unit.
    #[serde(rename = "RESOLVE_REASON_NO_SEGMENT_MATCH")]
    NoSegmentMatch,
    /// A segment matched but the unit's bucket had no assignment.
    #[serde(rename = "RESOLVE_REASON_NO_TREATMENT_MATCH")]
    NoTreatmentMatch,
    /// The flag is archived.
    #[serde(rename = "RESOLVE_REASON_FLAG_ARCHIVED")]
    FlagArchived,
    /// The targeting key has the wrong type.
    #[serde(rename = "RESOLVE_REASON_TARGETING_KEY_ERROR")]
    TargetingKeyError,
    /// Resolution of this flag failed.
    #[serde(rename = "RESOLVE_REASON_ERROR")]
    Error,
}

impl fmt::Display for ResolveReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Match => "RESOLVE_REASON_MATCH",
            Self::NoSegmentMatch => "RESOLVE_REASON_NO_SEGMENT_MATCH",
            Self::NoTreatmentMatch => "RESOLVE_REASON_NO_TREATMENT_MATCH",
            Self::FlagArchived => "RESOLVE_REASON_FLAG_ARCHIVED",
            Self::TargetingKeyError => "RESOLVE_REASON_TARGETING_KEY_ERROR",
            Self::Error => "RESOLVE_REASON_ERROR",
        };
        f.write_str(s)
    }
}

/// The terminal assignment of a flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentMatch {
    /// Matched rule.
    pub rule: String,
    /// Segment of the matched rule.
    pub segment: String,
    /// Matched assignment id.
    pub assignment_id: String,
    /// Unit that was bucketed.
    pub targeting_key: String,
    /// Context field the unit came from.
    pub targeting_key_selector: String,
    /// Assigned variant; `None` for client-default assignments.
    pub variant: Option<String>,
    /// Variant value, expanded against the flag schema.
    pub value: Option<Map<String, Value>>,
}

/// A fallthrough assignment passed while scanning rules.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FallthroughRule {
    /// Rule that fell through.
    pub rule: String,
    /// Fallthrough assignment id.
    pub assignment_id: String,
    /// Unit that was bucketed.
    pub targeting_key: String,
}

/// Full outcome of resolving one flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedValue {
    /// Flag name.
    pub flag: String,
    /// Reason code.
    pub reason: ResolveReason,
    /// Terminal match, if any.
    pub assignment_match: Option<AssignmentMatch>,
    /// Fallthroughs accumulated before the terminal outcome.
    pub fallthrough_rules: Vec<FallthroughRule>,
    /// Error detail when `reason` is `Error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResolvedValue {
    /// Outcome with a reason and nothing else.
    pub fn new(flag: impl Into<String>, reason: ResolveReason) -> Self {
        Self {
            flag: flag.into(),
            reason,
            assignment_match: None,
            fallthrough_rules: Vec::new(),
            error: None,
        }
    }

    /// Error outcome carrying a message.
    pub fn error(flag: impl Into<String>, message: impl Into<String>) -> Self {
        let mut value = Self::new(flag, ResolveReason::Error);
        value.error = Some(message.into());
        value
    }

    /// Whether the client should report the assignment as applied: it has a
    /// terminal match, or it passed at least one fallthrough.
    pub fn should_apply(&self) -> bool {
        self.assignment_match.is_some() || !self.fallthrough_rules.is_empty()
    }

    /// Assigned variant, if any.
    pub fn variant(&self) -> Option<&str> {
        self.assignment_match.as_ref().and_then(|m| m.variant.as_deref())
    }
}

/// Per-flag entry of a resolve response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedFlag {
    /// Flag name.
    pub flag: String,
    /// Reason code.
    pub reason: ResolveReason,
    /// Assigned variant.
    pub variant: Option<String>,
    /// Variant value.
    pub value: Option<Map<String, Value>>,
    /// Whether the client should emit an apply for this flag.
    pub should_apply: bool,
    /// Fallthroughs passed while resolving.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fallthrough_rules: Vec<FallthroughRule>,
    /// Error detail when `reason` is `Error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&ResolvedValue> for ResolvedFlag {
    fn from(resolved: &ResolvedValue) -> Self {
        Self {
            flag: resolved.flag.clone(),
            reason: resolved.reason,
            variant: resolved.variant().map(str::to_string),
            value: resolved.assignment_match.as_ref().and_then(|m| m.value.clone()),
            should_apply: resolved.should_apply(),
            fallthrough_rules: resolved.fallthrough_rules.clone(),
            error: resolved.error.clone(),
        }
    }
}

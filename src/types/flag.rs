//! Flag, rule, and assignment types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use super::schema::FlagSchema;

/// Lifecycle state of a flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlagState {
    /// Flag is resolved normally.
    #[default]
    Active,
    /// Flag is archived; resolves short-circuit.
    Archived,
}

impl fmt::Display for FlagState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "ACTIVE"),
            Self::Archived => write!(f, "ARCHIVED"),
        }
    }
}

/// A named flag value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    /// Variant name.
    pub name: String,
    /// Structured value, conforming to the flag schema.
    #[serde(default)]
    pub value: Map<String, Value>,
}

impl Variant {
    /// Variant with a value.
    pub fn new(name: impl Into<String>, value: Map<String, Value>) -> Self {
        Self { name: name.into(), value }
    }
}

/// Half-open bucket interval `[lower, upper)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketRange {
    /// First bucket in the range.
    pub lower: u64,
    /// One past the last bucket in the range.
    pub upper: u64,
}

impl BucketRange {
    /// Range `[lower, upper)`.
    pub fn new(lower: u64, upper: u64) -> Self {
        Self { lower, upper }
    }

    /// Whether `bucket` is inside the range.
    pub fn contains(&self, bucket: u64) -> bool {
        self.lower <= bucket && bucket < self.upper
    }
}

/// What a matched assignment does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentKind {
    /// Assign a flag variant.
    Variant {
        /// Name of the variant.
        variant: String,
    },
    /// Record the rule and keep scanning later rules.
    Fallthrough,
    /// Match with no value; the client uses its default.
    ClientDefault,
}

/// One slice of a rule's bucket space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    /// Assignment identifier.
    pub assignment_id: String,
    /// What a match does.
    pub kind: AssignmentKind,
    /// Buckets covered by this assignment.
    pub bucket_ranges: Vec<BucketRange>,
}

impl Assignment {
    /// Assignment of `variant` over the given ranges.
    pub fn variant(id: impl Into<String>, variant: impl Into<String>, ranges: Vec<BucketRange>) -> Self {
        Self {
            assignment_id: id.into(),
            kind: AssignmentKind::Variant { variant: variant.into() },
            bucket_ranges: ranges,
        }
    }

    /// Fallthrough assignment over the given ranges.
    pub fn fallthrough(id: impl Into<String>, ranges: Vec<BucketRange>) -> Self {
        Self {
            assignment_id: id.into(),
            kind: AssignmentKind::Fallthrough,
            bucket_ranges: ranges,
        }
    }

    /// Client-default assignment over the given ranges.
    pub fn client_default(id: impl Into<String>, ranges: Vec<BucketRange>) -> Self {
        Self {
            assignment_id: id.into(),
            kind: AssignmentKind::ClientDefault,
            bucket_ranges: ranges,
        }
    }

    /// Whether any of the ranges covers `bucket`.
    pub fn covers(&self, bucket: u64) -> bool {
        self.bucket_ranges.iter().any(|r| r.contains(bucket))
    }
}

/// Ordered assignments over a bucket space of `bucket_count` buckets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentSpec {
    /// Size of the rule's bucket space.
    pub bucket_count: u64,
    /// Assignments, first covering match wins.
    pub assignments: Vec<Assignment>,
}

impl AssignmentSpec {
    /// Spec over `bucket_count` buckets.
    pub fn new(bucket_count: u64, assignments: Vec<Assignment>) -> Self {
        Self { bucket_count, assignments }
    }

    /// First assignment covering `bucket`.
    pub fn assignment_for(&self, bucket: u64) -> Option<&Assignment> {
        self.assignments.iter().find(|a| a.covers(bucket))
    }

    /// Check that all ranges are non-empty, inside `[0, bucket_count)` and
    /// pairwise disjoint. Coverage need not be exhaustive.
    pub fn check_partition(&self) -> Result<(), String> {
        if self.bucket_count == 0 {
            return Err("bucket_count must be positive".to_string());
        }
        let mut ranges: Vec<(BucketRange, &str)> = Vec::new();
        for assignment in &self.assignments {
            for range in &assignment.bucket_ranges {
                if range.lower >= range.upper || range.upper > self.bucket_count {
                    return Err(format!(
                        "range [{}, {}) of assignment '{}' is outside [0, {})",
                        range.lower, range.upper, assignment.assignment_id, self.bucket_count
                    ));
                }
                ranges.push((*range, assignment.assignment_id.as_str()));
            }
        }
        ranges.sort_by_key(|(r, _)| (r.lower, r.upper));
        for pair in ranges.windows(2) {
            let ((a, a_id), (b, b_id)) = (&pair[0], &pair[1]);
            if b.lower < a.upper {
                return Err(format!(
                    "range [{}, {}) of '{}' overlaps [{}, {}) of '{}'",
                    a.lower, a.upper, a_id, b.lower, b.upper, b_id
                ));
            }
        }
        Ok(())
    }
}

/// How a rule treats previously materialized assignments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MaterializationMode {
    /// Skip the rule for units not in the read materialization.
    #[serde(default)]
    pub materialization_must_match: bool,
    /// Return a materialized variant without re-checking segment targeting.
    #[serde(default)]
    pub segment_targeting_can_be_ignored: bool,
}

/// Sticky read/write materializations of a rule.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MaterializationSpec {
    /// Materialization consulted for previous assignments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_materialization: Option<String>,
    /// Materialization new assignments are recorded into.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_materialization: Option<String>,
    /// Read behaviour.
    #[serde(default)]
    pub mode: MaterializationMode,
}

/// One targeting rule of a flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Rule identifier.
    pub name: String,
    /// Disabled rules are skipped.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Segment the unit must be in.
    pub segment: String,
    /// Context field holding the unit; defaults to `targeting_key`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targeting_key_selector: Option<String>,
    /// Bucket allocation.
    pub assignment_spec: AssignmentSpec,
    /// Sticky materializations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub materialization_spec: Option<MaterializationSpec>,
}

fn default_true() -> bool {
    true
}

impl Rule {
    /// Enabled rule without materializations.
    pub fn new(name: impl Into<String>, segment: impl Into<String>, spec: AssignmentSpec) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            segment: segment.into(),
            targeting_key_selector: None,
            assignment_spec: spec,
            materialization_spec: None,
        }
    }

    /// Set the targeting key selector.
    pub fn with_targeting_key(mut self, selector: impl Into<String>) -> Self {
        self.targeting_key_selector = Some(selector.into());
        self
    }

    /// Set the materialization spec.
    pub fn with_materialization(mut self, spec: MaterializationSpec) -> Self {
        self.materialization_spec = Some(spec);
        self
    }

    /// Set whether the rule is enabled.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Context field holding the unit.
    pub fn targeting_key(&self) -> &str {
        self.targeting_key_selector
            .as_deref()
            .unwrap_or(super::context::DEFAULT_TARGETING_KEY)
    }

    /// Read materialization, if the rule has one.
    pub fn read_materialization(&self) -> Option<&str> {
        self.materialization_spec
            .as_ref()
            .and_then(|m| m.read_materialization.as_deref())
    }

    /// Write materialization, if the rule has one.
    pub fn write_materialization(&self) -> Option<&str> {
        self.materialization_spec
            .as_ref()
            .and_then(|m| m.write_materialization.as_deref())
    }
}

/// A feature flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flag {
    /// Flag name.
    pub name: String,
    /// Lifecycle state.
    #[serde(default)]
    pub state: FlagState,
    /// Value schema for variants.
    #[serde(default)]
    pub schema: FlagSchema,
    /// Variants.
    #[serde(default)]
    pub variants: Vec<Variant>,
    /// Rules, in evaluation order.
    #[serde(default)]
    pub rules: Vec<Rule>,
    /// Clients the flag is available to.
    #[serde(default)]
    pub clients: Vec<String>,
}

impl Flag {
    /// Active flag with no rules.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: FlagState::Active,
            schema: FlagSchema::default(),
            variants: Vec::new(),
            rules: Vec::new(),
            clients: Vec::new(),
        }
    }

    /// Look up a variant by name.
    pub fn variant(&self, name: &str) -> Option<&Variant> {
        self.variants.iter().find(|v| v.name == name)
    }

    /// Whether the client may resolve this flag.
    pub fn is_available_to(&self, client: &str) -> bool {
        self.clients.iter().any(|c| c == client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assignment_for_first_match() {
        let spec = AssignmentSpec::new(
            100,
            vec![
                Assignment::variant("a", "on", vec![BucketRange::new(0, 50)]),
                Assignment::fallthrough("b", vec![BucketRange::new(50, 60)]),
            ],
        );
        assert_eq!(spec.assignment_for(0).map(|a| a.assignment_id.as_str()), Some("a"));
        assert_eq!(spec.assignment_for(55).map(|a| a.assignment_id.as_str()), Some("b"));
        assert!(spec.assignment_for(60).is_none());
        assert!(spec.check_partition().is_ok());
    }

    #[test]
    fn test_partition_rejects_overlap() {
        let spec = AssignmentSpec::new(
            100,
            vec![
                Assignment::variant("a", "on", vec![BucketRange::new(0, 50)]),
                Assignment::variant("b", "off", vec![BucketRange::new(49, 100)]),
            ],
        );
        assert!(spec.check_partition().unwrap_err().contains("overlaps"));
    }

    #[test]
    fn test_partition_rejects_out_of_bounds() {
        let spec = AssignmentSpec::new(
            10,
            vec![Assignment::variant("a", "on", vec![BucketRange::new(0, 11)])],
        );
        assert!(spec.check_partition().is_err());
        let empty = AssignmentSpec::new(
            10,
            vec![Assignment::variant("a", "on", vec![BucketRange::new(5, 5)])],
        );
        assert!(empty.check_partition().is_err());
    }

    #[test]
    fn test_rule_defaults() {
        let rule = Rule::new("r", "everyone", AssignmentSpec::new(1, vec![]));
        assert_eq!(rule.targeting_key(), "targeting_key");
        assert!(rule.read_materialization().is_none());
        let json = serde_json::json!({
            "name": "r",
            "segment": "s",
            "assignment_spec": {"bucket_count": 2, "assignments": []}
        });
        let parsed: Rule = serde_json::from_value(json).unwrap();
        assert!(parsed.enabled);
    }
}

//! Flag resolution.
//!
//! ## Per-flag state machine
//!
//! Rules are walked in declared order and the first terminal outcome wins:
//!
//! 1. An archived flag resolves to `FLAG_ARCHIVED` without looking at rules.
//! 2. Disabled rules are skipped.
//! 3. The rule's targeting key is read from the context. A missing key skips
//!    the rule; a non-string key ends resolution with `TARGETING_KEY_ERROR`.
//! 4. A rule with a read materialization consults the sticky context first.
//! 5. The rule's segment must match the unit.
//! 6. The unit is bucketed with the rule's segment name as salt and the
//!    first covering assignment decides: `VARIANT` and `CLIENT_DEFAULT` terminate,
//!    `FALLTHROUGH` is recorded and scanning continues, no covering
//!    assignment moves on to the next rule.
//!
//! ## Batches
//!
//! A request resolves many flags. Request-level problems (bad secret, too
//! many flags, unknown or ineligible flags) reject the whole request. An
//! error inside one flag becomes `RESOLVE_REASON_ERROR` on that flag only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bucket::bucket;
use crate::config::ResolverConfig;
use crate::segment::{SegmentError, SegmentEvaluator};
use crate::state::AccountState;
use crate::types::{
    AssignedFlag, AssignmentKind, AssignmentMatch, EvaluationContext, FallthroughRule, Flag,
    FlagState, MaterializationContext, MaterializationInfo, MaterializationUpdate,
    MissingMaterialization, ResolveReason, ResolveToken, ResolvedFlag, ResolvedValue, Rule,
    SealedToken, TokenError, Variant,
};

/// Errors raised while resolving.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResolveError {
    /// The request names more flags than allowed.
    #[error("Too many flags requested: {requested} (max {max})")]
    TooManyFlags {
        /// Number requested.
        requested: usize,
        /// Configured maximum.
        max: usize,
    },
    /// The client secret is unknown.
    #[error("Invalid client secret")]
    InvalidClientSecret,
    /// A requested flag does not exist.
    #[error("Flag not found: {0}")]
    FlagNotFound(String),
    /// A requested flag is not available to the client.
    #[error("Flag '{flag}' is not available to client '{client}'")]
    FlagNotEligible {
        /// Flag name.
        flag: String,
        /// Client name.
        client: String,
    },
    /// Targeting key exceeds the configured length.
    #[error("Targeting key too long: {len} characters (max {max})")]
    TargetingKeyTooLong {
        /// Actual length in characters.
        len: usize,
        /// Configured maximum.
        max: usize,
    },
    /// Assignment names a variant the flag does not define.
    #[error("Variant '{variant}' of flag '{flag}' is not defined")]
    UnknownVariant {
        /// Flag name.
        flag: String,
        /// Variant name.
        variant: String,
    },
    /// Segment evaluation failed.
    #[error(transparent)]
    Segment(#[from] SegmentError),
    /// Resolve token could not be opened.
    #[error(transparent)]
    Token(#[from] TokenError),
    /// Token was issued for another account.
    #[error("Resolve token belongs to account '{found}', expected '{expected}'")]
    AccountMismatch {
        /// Account of this snapshot.
        expected: String,
        /// Account in the token.
        found: String,
    },
    /// Applied flag was not part of the resolve.
    #[error("Flag '{0}' is not in the resolve token")]
    FlagNotInToken(String),
}

impl ResolveError {
    /// Whether the caller caused the error.
    ///
    /// Everything except configuration faults found while evaluating is a
    /// bad request.
    pub fn is_bad_request(&self) -> bool {
        !matches!(self, Self::Segment(_) | Self::UnknownVariant { .. })
    }
}

/// A request to resolve flags for one evaluation context.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResolveRequest {
    /// Secret identifying the calling client.
    pub client_secret: String,
    /// Flags to resolve. Empty means every flag available to the client.
    #[serde(default)]
    pub flags: Vec<String>,
    /// Context the flags are resolved against.
    #[serde(default)]
    pub evaluation_context: EvaluationContext,
    /// Whether assignments are applied immediately.
    #[serde(default)]
    pub apply: bool,
    /// Sticky assignments known for the units in this request.
    #[serde(default)]
    pub materializations: MaterializationContext,
}

impl ResolveRequest {
    /// Request resolving `flags` for `context`.
    pub fn new(client_secret: impl Into<String>, flags: Vec<String>, context: EvaluationContext) -> Self {
        Self {
            client_secret: client_secret.into(),
            flags,
            evaluation_context: context,
            apply: false,
            materializations: MaterializationContext::new(),
        }
    }

    /// Set whether assignments are applied immediately.
    pub fn with_apply(mut self, apply: bool) -> Self {
        self.apply = apply;
        self
    }
}

/// Response to a resolve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolveResponse {
    /// Identifier of this resolve.
    pub resolve_id: String,
    /// Per-flag results, in request order.
    pub resolved_flags: Vec<ResolvedFlag>,
    /// Token for a later apply; present when the request did not apply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolve_token: Option<SealedToken>,
    /// Fingerprint of the snapshot used.
    pub state_fingerprint: String,
}

impl ResolveResponse {
    /// Result for `flag`.
    pub fn flag(&self, flag: &str) -> Option<&ResolvedFlag> {
        self.resolved_flags.iter().find(|f| f.flag == flag)
    }
}

/// One flag reported as used by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedFlag {
    /// Flag name.
    pub flag: String,
    /// When the client used the assignment.
    #[serde(default = "Utc::now")]
    pub applied_at: DateTime<Utc>,
}

/// Report that previously resolved assignments were used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyRequest {
    /// Secret identifying the calling client.
    pub client_secret: String,
    /// Token from the resolve response.
    pub resolve_token: SealedToken,
    /// Flags the client used.
    pub flags: Vec<AppliedFlag>,
}

/// Exposure of one assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentEvent {
    /// Resolve the assignment came from.
    pub resolve_id: String,
    /// Client that used it.
    pub client: String,
    /// Assignment details.
    pub assignment: AssignedFlag,
    /// When it was applied.
    pub applied_at: DateTime<Utc>,
}

/// Outcome of resolving one flag.
#[derive(Debug, Clone, PartialEq)]
pub enum FlagOutcome {
    /// The flag was decided.
    Resolved {
        /// Resolution result.
        value: ResolvedValue,
        /// Sticky assignment to persist.
        update: Option<MaterializationUpdate>,
    },
    /// Sticky assignments must be loaded before the flag can be decided.
    Missing(Vec<MissingMaterialization>),
}

/// A completed batch resolve.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Client that made the request.
    pub client: String,
    /// Response for the caller.
    pub response: ResolveResponse,
    /// Full per-flag results.
    pub values: Vec<ResolvedValue>,
    /// Sticky assignments to persist.
    pub updates: Vec<MaterializationUpdate>,
    /// Exposures produced by an applying resolve.
    pub events: Vec<AssignmentEvent>,
}

/// Outcome of a batch resolve.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolveOutcome {
    /// Every flag was decided.
    Resolved(Resolution),
    /// At least one flag needs sticky assignments that were not supplied.
    MissingMaterializations(Vec<MissingMaterialization>),
}

/// Resolves flags against one snapshot.
pub struct Resolver<'a> {
    state: &'a AccountState,
    config: &'a ResolverConfig,
}

impl<'a> Resolver<'a> {
    /// Resolver over `state`.
    pub fn new(state: &'a AccountState, config: &'a ResolverConfig) -> Self {
        Self { state, config }
    }

    /// Resolve a batch of flags.
    pub fn resolve(&self, request: &ResolveRequest) -> Result<ResolveOutcome, ResolveError> {
        let client = self
            .state
            .client_for_secret(&request.client_secret)
            .ok_or(ResolveError::InvalidClientSecret)?;
        if request.flags.len() > self.config.max_flags_per_request {
            return Err(ResolveError::TooManyFlags {
                requested: request.flags.len(),
                max: self.config.max_flags_per_request,
            });
        }
        let flags = self.select_flags(client, &request.flags)?;

        let mut values = Vec::with_capacity(flags.len());
        let mut updates = Vec::new();
        let mut missing = Vec::new();
        for flag in flags {
            match self.resolve_flag(flag, &request.evaluation_context, &request.materializations) {
                Ok(FlagOutcome::Resolved { value, update }) => {
                    tracing::debug!(flag = %flag.name, reason = %value.reason, "Resolved flag");
                    values.push(value);
                    updates.extend(update);
                }
                Ok(FlagOutcome::Missing(items)) => missing.extend(items),
                Err(e) => {
                    tracing::warn!(flag = %flag.name, error = %e, "Flag resolution failed");
                    values.push(ResolvedValue::error(&flag.name, e.to_string()));
                }
            }
        }

        if !missing.is_empty() {
            missing.sort();
            missing.dedup();
            return Ok(ResolveOutcome::MissingMaterializations(missing));
        }

        let resolve_id = uuid::Uuid::new_v4().to_string();
        let assigned: Vec<AssignedFlag> = values.iter().map(AssignedFlag::from).collect();
        let (resolve_token, events) = if request.apply {
            let now = Utc::now();
            let events = assigned
                .into_iter()
                .filter(AssignedFlag::should_apply)
                .map(|assignment| AssignmentEvent {
                    resolve_id: resolve_id.clone(),
                    client: client.to_string(),
                    assignment,
                    applied_at: now,
                })
                .collect();
            (None, events)
        } else {
            let token = ResolveToken {
                account: self.state.account().to_string(),
                resolve_id: resolve_id.clone(),
                state_fingerprint: self.state.fingerprint().to_string(),
                evaluation_context: request.evaluation_context.clone(),
                assigned_flags: assigned,
            };
            (Some(token.seal(&self.config.token_secret)), Vec::new())
        };

        let response = ResolveResponse {
            resolve_id,
            resolved_flags: values.iter().map(ResolvedFlag::from).collect(),
            resolve_token,
            state_fingerprint: self.state.fingerprint().to_string(),
        };
        Ok(ResolveOutcome::Resolved(Resolution {
            client: client.to_string(),
            response,
            values,
            updates,
            events,
        }))
    }

    fn select_flags(&self, client: &str, names: &[String]) -> Result<Vec<&'a Flag>, ResolveError> {
        if names.is_empty() {
            return Ok(self.state.flags().filter(|f| f.is_available_to(client)).collect());
        }
        names
            .iter()
            .map(|name| {
                let flag = self
                    .state
                    .flag(name)
                    .ok_or_else(|| ResolveError::FlagNotFound(name.clone()))?;
                if !flag.is_available_to(client) {
                    return Err(ResolveError::FlagNotEligible {
                        flag: name.clone(),
                        client: client.to_string(),
                    });
                }
                Ok(flag)
            })
            .collect()
    }

    /// Resolve one flag.
    pub fn resolve_flag(
        &self,
        flag: &Flag,
        context: &EvaluationContext,
        materializations: &MaterializationContext,
    ) -> Result<FlagOutcome, ResolveError> {
        if flag.state == FlagState::Archived {
            return Ok(resolved(ResolvedValue::new(&flag.name, ResolveReason::FlagArchived)));
        }

        let mut fallthroughs = Vec::new();
        let mut missing = Vec::new();
        let mut untreated = false;

        for rule in flag.rules.iter().filter(|r| r.enabled) {
            let unit = match context.get(rule.targeting_key()) {
                Value::Null => continue,
                Value::String(s) => s.as_str(),
                _ if missing.is_empty() => {
                    let mut value = ResolvedValue::new(&flag.name, ResolveReason::TargetingKeyError);
                    value.fallthrough_rules = fallthroughs;
                    return Ok(resolved(value));
                }
                _ => continue,
            };
            let len = unit.chars().count();
            if len > self.config.max_targeting_key_len {
                return Err(ResolveError::TargetingKeyTooLong {
                    len,
                    max: self.config.max_targeting_key_len,
                });
            }

            let sticky = match rule.read_materialization() {
                Some(materialization) => match materializations.get(unit, materialization) {
                    Some(info) => Some((materialization, info)),
                    None => {
                        missing.push(MissingMaterialization {
                            unit: unit.to_string(),
                            rule: rule.name.clone(),
                            read_materialization: materialization.to_string(),
                        });
                        continue;
                    }
                },
                None => None,
            };
            // Once a rule is undecided, later rules only report what they need.
            if !missing.is_empty() {
                continue;
            }

            if let Some((read, info)) = sticky {
                let mode = rule
                    .materialization_spec
                    .as_ref()
                    .map(|m| m.mode)
                    .unwrap_or_default();
                if info.is_unit_in_materialization {
                    if let Some(variant) = sticky_variant(flag, rule, info) {
                        let targeted = mode.segment_targeting_can_be_ignored
                            || self.segment_matches(&rule.segment, unit, context)?;
                        if targeted {
                            let update = rule
                                .write_materialization()
                                .filter(|write| *write != read)
                                .map(|write| MaterializationUpdate {
                                    unit: unit.to_string(),
                                    rule: rule.name.clone(),
                                    write_materialization: write.to_string(),
                                    variant: variant.name.clone(),
                                });
                            let assignment_id = sticky_assignment_id(rule, &variant.name);
                            let value = matched(flag, rule, unit, assignment_id, Some(variant), fallthroughs);
                            return Ok(FlagOutcome::Resolved { value, update });
                        }
                    }
                } else if mode.materialization_must_match {
                    continue;
                }
            }

            if !self.segment_matches(&rule.segment, unit, context)? {
                continue;
            }

            let spec = &rule.assignment_spec;
            let assignment = match spec.assignment_for(bucket(unit, &rule.segment, spec.bucket_count)) {
                Some(a) => a,
                None => {
                    untreated = true;
                    continue;
                }
            };
            match &assignment.kind {
                AssignmentKind::Fallthrough => {
                    fallthroughs.push(FallthroughRule {
                        rule: rule.name.clone(),
                        assignment_id: assignment.assignment_id.clone(),
                        targeting_key: unit.to_string(),
                    });
                }
                AssignmentKind::ClientDefault => {
                    let value = matched(flag, rule, unit, assignment.assignment_id.clone(), None, fallthroughs);
                    return Ok(FlagOutcome::Resolved { value, update: None });
                }
                AssignmentKind::Variant { variant } => {
                    let variant = flag.variant(variant).ok_or_else(|| ResolveError::UnknownVariant {
                        flag: flag.name.clone(),
                        variant: variant.clone(),
                    })?;
                    let update = rule.write_materialization().map(|write| MaterializationUpdate {
                        unit: unit.to_string(),
                        rule: rule.name.clone(),
                        write_materialization: write.to_string(),
                        variant: variant.name.clone(),
                    });
                    let value = matched(
                        flag,
                        rule,
                        unit,
                        assignment.assignment_id.clone(),
                        Some(variant),
                        fallthroughs,
                    );
                    return Ok(FlagOutcome::Resolved { value, update });
                }
            }
        }

        if !missing.is_empty() {
            return Ok(FlagOutcome::Missing(missing));
        }

        let reason = if untreated && fallthroughs.is_empty() {
            ResolveReason::NoTreatmentMatch
        } else {
            ResolveReason::NoSegmentMatch
        };
        let mut value = ResolvedValue::new(&flag.name, reason);
        value.fallthrough_rules = fallthroughs;
        Ok(resolved(value))
    }

    fn segment_matches(&self, segment: &str, unit: &str, context: &EvaluationContext) -> Result<bool, ResolveError> {
        if self.state.segment(segment).is_none() {
            tracing::debug!(segment = %segment, "Rule references unknown segment");
            return Ok(false);
        }
        Ok(SegmentEvaluator::new(self.state, context).matches(segment, unit)?)
    }

    /// Turn a resolve token into exposure events for the applied flags.
    pub fn apply(&self, request: &ApplyRequest) -> Result<Vec<AssignmentEvent>, ResolveError> {
        let client = self
            .state
            .client_for_secret(&request.client_secret)
            .ok_or(ResolveError::InvalidClientSecret)?;
        let token = ResolveToken::open(&self.config.token_secret, &request.resolve_token)?;
        if token.account != self.state.account() {
            return Err(ResolveError::AccountMismatch {
                expected: self.state.account().to_string(),
                found: token.account,
            });
        }

        let mut events = Vec::with_capacity(request.flags.len());
        for applied in &request.flags {
            let assignment = token
                .assigned(&applied.flag)
                .ok_or_else(|| ResolveError::FlagNotInToken(applied.flag.clone()))?;
            if assignment.should_apply() {
                events.push(AssignmentEvent {
                    resolve_id: token.resolve_id.clone(),
                    client: client.to_string(),
                    assignment: assignment.clone(),
                    applied_at: applied.applied_at,
                });
            }
        }
        tracing::debug!(resolve_id = %token.resolve_id, events = events.len(), "Applied flags");
        Ok(events)
    }
}

fn resolved(value: ResolvedValue) -> FlagOutcome {
    FlagOutcome::Resolved { value, update: None }
}

/// Variant a materialization recorded for `rule`, if the flag still defines it.
fn sticky_variant<'f>(flag: &'f Flag, rule: &Rule, info: &MaterializationInfo) -> Option<&'f Variant> {
    info.variant_for(&rule.name).and_then(|name| flag.variant(name))
}

fn sticky_assignment_id(rule: &Rule, variant: &str) -> String {
    rule.assignment_spec
        .assignments
        .iter()
        .find(|a| matches!(&a.kind, AssignmentKind::Variant { variant: v } if v == variant))
        .map(|a| a.assignment_id.clone())
        .unwrap_or_default()
}

fn matched(
    flag: &Flag,
    rule: &Rule,
    unit: &str,
    assignment_id: String,
    variant: Option<&Variant>,
    fallthroughs: Vec<FallthroughRule>,
) -> ResolvedValue {
    let mut value = ResolvedValue::new(&flag.name, ResolveReason::Match);
    value.assignment_match = Some(AssignmentMatch {
        rule: rule.name.clone(),
        segment: rule.segment.clone(),
        assignment_id,
        targeting_key: unit.to_string(),
        targeting_key_selector: rule.targeting_key().to_string(),
        variant: variant.map(|v| v.name.clone()),
        value: variant.map(|v| v.value.clone()),
    });
    value.fallthrough_rules = fallthroughs;
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{AccountStateInput, ClientCredential};
    use crate::types::{
        Assignment, AssignmentSpec, BucketRange, FieldSchema, FlagSchema, MaterializationMode,
        MaterializationSpec, Segment, SegmentBitset, Targeting,
    };
    use serde_json::json;

    const SECRET: &str = "web-secret";

    fn variant(name: &str, enabled: bool) -> Variant {
        Variant::new(name, json!({ "enabled": enabled }).as_object().cloned().unwrap())
    }

    fn whole(id: &str, variant: &str) -> Assignment {
        Assignment::variant(id, variant, vec![BucketRange::new(0, 100)])
    }

    fn flag(name: &str, rules: Vec<Rule>) -> Flag {
        let mut flag = Flag::new(name);
        flag.schema = FlagSchema::new([("enabled".to_string(), FieldSchema::Bool)]);
        flag.variants = vec![variant("on", true), variant("off", false)];
        flag.rules = rules;
        flag.clients = vec!["web".to_string()];
        flag
    }

    fn state(flags: Vec<Flag>) -> AccountState {
        AccountState::build(AccountStateInput {
            account: "acme".to_string(),
            flags,
            segments: vec![Segment::new("everyone", Targeting::everyone())],
            bitsets: [("everyone".to_string(), SegmentBitset::Full)].into_iter().collect(),
            clients: vec![ClientCredential {
                client: "web".to_string(),
                secret: SECRET.to_string(),
            }],
        })
        .unwrap()
    }

    fn ctx(unit: &str) -> EvaluationContext {
        EvaluationContext::new().with("targeting_key", unit)
    }

    fn outcome_value(outcome: FlagOutcome) -> ResolvedValue {
        match outcome {
            FlagOutcome::Resolved { value, .. } => value,
            FlagOutcome::Missing(m) => panic!("unexpected missing: {m:?}"),
        }
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let st = state(vec![flag(
            "f",
            vec![
                Rule::new("r1", "everyone", AssignmentSpec::new(100, vec![whole("a1", "on")])),
                Rule::new("r2", "everyone", AssignmentSpec::new(100, vec![whole("a2", "off")])),
            ],
        )]);
        let config = ResolverConfig::default();
        let resolver = Resolver::new(&st, &config);
        let value = outcome_value(
            resolver
                .resolve_flag(st.flag("f").unwrap(), &ctx("u"), &MaterializationContext::new())
                .unwrap(),
        );
        assert_eq!(value.reason, ResolveReason::Match);
        assert_eq!(value.variant(), Some("on"));
    }

    #[test]
    fn test_disabled_rule_skipped() {
        let st = state(vec![flag(
            "f",
            vec![
                Rule::new("r1", "everyone", AssignmentSpec::new(100, vec![whole("a1", "on")])).enabled(false),
                Rule::new("r2", "everyone", AssignmentSpec::new(100, vec![whole("a2", "off")])),
            ],
        )]);
        let config = ResolverConfig::default();
        let value = outcome_value(
            Resolver::new(&st, &config)
                .resolve_flag(st.flag("f").unwrap(), &ctx("u"), &MaterializationContext::new())
                .unwrap(),
        );
        assert_eq!(value.variant(), Some("off"));
    }

    #[test]
    fn test_missing_targeting_key_skips_rule() {
        let st = state(vec![flag(
            "f",
            vec![
                Rule::new("r1", "everyone", AssignmentSpec::new(100, vec![whole("a1", "on")]))
                    .with_targeting_key("user.id"),
                Rule::new("r2", "everyone", AssignmentSpec::new(100, vec![whole("a2", "off")])),
            ],
        )]);
        let config = ResolverConfig::default();
        let value = outcome_value(
            Resolver::new(&st, &config)
                .resolve_flag(st.flag("f").unwrap(), &ctx("u"), &MaterializationContext::new())
                .unwrap(),
        );
        assert_eq!(value.variant(), Some("off"));
        let m = value.assignment_match.unwrap();
        assert_eq!(m.targeting_key_selector, "targeting_key");
    }

    #[test]
    fn test_non_string_targeting_key() {
        let st = state(vec![flag(
            "f",
            vec![Rule::new("r1", "everyone", AssignmentSpec::new(100, vec![whole("a1", "on")]))],
        )]);
        let config = ResolverConfig::default();
        let context = EvaluationContext::new().with("targeting_key", 42);
        let value = outcome_value(
            Resolver::new(&st, &config)
                .resolve_flag(st.flag("f").unwrap(), &context, &MaterializationContext::new())
                .unwrap(),
        );
        assert_eq!(value.reason, ResolveReason::TargetingKeyError);
    }

    #[test]
    fn test_targeting_key_too_long() {
        let st = state(vec![flag(
            "f",
            vec![Rule::new("r1", "everyone", AssignmentSpec::new(100, vec![whole("a1", "on")]))],
        )]);
        let config = ResolverConfig::default();
        let long = "x".repeat(101);
        let err = Resolver::new(&st, &config)
            .resolve_flag(st.flag("f").unwrap(), &ctx(&long), &MaterializationContext::new())
            .unwrap_err();
        assert_eq!(err, ResolveError::TargetingKeyTooLong { len: 101, max: 100 });
        assert!(err.is_bad_request());
    }

    #[test]
    fn test_targeting_key_limit_counts_characters() {
        let st = state(vec![flag(
            "f",
            vec![Rule::new("r1", "everyone", AssignmentSpec::new(100, vec![whole("a1", "on")]))],
        )]);
        let config = ResolverConfig::default();
        let resolver = Resolver::new(&st, &config);

        let accented = "é".repeat(60);
        assert_eq!(accented.len(), 120);
        let value = outcome_value(
            resolver
                .resolve_flag(st.flag("f").unwrap(), &ctx(&accented), &MaterializationContext::new())
                .unwrap(),
        );
        assert_eq!(value.variant(), Some("on"));

        let err = resolver
            .resolve_flag(st.flag("f").unwrap(), &ctx(&"é".repeat(101)), &MaterializationContext::new())
            .unwrap_err();
        assert_eq!(err, ResolveError::TargetingKeyTooLong { len: 101, max: 100 });
    }

    #[test]
    fn test_no_treatment_match() {
        // "tester" lands in bucket 40 of 100 under the "everyone" salt.
        let st = state(vec![flag(
            "f",
            vec![Rule::new(
                "r1",
                "everyone",
                AssignmentSpec::new(100, vec![Assignment::variant("a1", "on", vec![BucketRange::new(50, 100)])]),
            )],
        )]);
        let config = ResolverConfig::default();
        let value = outcome_value(
            Resolver::new(&st, &config)
                .resolve_flag(st.flag("f").unwrap(), &ctx("tester"), &MaterializationContext::new())
                .unwrap(),
        );
        assert_eq!(value.reason, ResolveReason::NoTreatmentMatch);
    }

    #[test]
    fn test_rule_buckets_with_segment_salt() {
        assert_eq!(bucket("tester", "everyone", 100), 40);
        assert_eq!(bucket("tester", "f", 100), 75);
        let st = state(vec![flag(
            "f",
            vec![Rule::new(
                "r1",
                "everyone",
                AssignmentSpec::new(100, vec![Assignment::variant("a1", "on", vec![BucketRange::new(40, 41)])]),
            )],
        )]);
        let config = ResolverConfig::default();
        let value = outcome_value(
            Resolver::new(&st, &config)
                .resolve_flag(st.flag("f").unwrap(), &ctx("tester"), &MaterializationContext::new())
                .unwrap(),
        );
        assert_eq!(value.reason, ResolveReason::Match);
        assert_eq!(value.variant(), Some("on"));
    }

    #[test]
    fn test_client_default_has_no_variant() {
        let st = state(vec![flag(
            "f",
            vec![Rule::new(
                "r1",
                "everyone",
                AssignmentSpec::new(100, vec![Assignment::client_default("cd", vec![BucketRange::new(0, 100)])]),
            )],
        )]);
        let config = ResolverConfig::default();
        let value = outcome_value(
            Resolver::new(&st, &config)
                .resolve_flag(st.flag("f").unwrap(), &ctx("u"), &MaterializationContext::new())
                .unwrap(),
        );
        assert_eq!(value.reason, ResolveReason::Match);
        assert!(value.variant().is_none());
        assert!(value.should_apply());
    }

    #[test]
    fn test_fallthrough_then_match_keeps_attribution() {
        let st = state(vec![flag(
            "f",
            vec![
                Rule::new(
                    "r1",
                    "everyone",
                    AssignmentSpec::new(100, vec![Assignment::fallthrough("ft", vec![BucketRange::new(0, 100)])]),
                ),
                Rule::new("r2", "everyone", AssignmentSpec::new(100, vec![whole("a2", "off")])),
            ],
        )]);
        let config = ResolverConfig::default();
        let value = outcome_value(
            Resolver::new(&st, &config)
                .resolve_flag(st.flag("f").unwrap(), &ctx("u"), &MaterializationContext::new())
                .unwrap(),
        );
        assert_eq!(value.variant(), Some("off"));
        assert_eq!(value.fallthrough_rules.len(), 1);
        assert_eq!(value.fallthrough_rules[0].assignment_id, "ft");
    }

    fn sticky_rule(mode: MaterializationMode) -> Rule {
        Rule::new("r1", "everyone", AssignmentSpec::new(100, vec![whole("a1", "on")])).with_materialization(
            MaterializationSpec {
                read_materialization: Some("exp".to_string()),
                write_materialization: Some("exp".to_string()),
                mode,
            },
        )
    }

    #[test]
    fn test_sticky_missing_reported() {
        let st = state(vec![flag("f", vec![sticky_rule(MaterializationMode::default())])]);
        let config = ResolverConfig::default();
        let outcome = Resolver::new(&st, &config)
            .resolve_flag(st.flag("f").unwrap(), &ctx("u"), &MaterializationContext::new())
            .unwrap();
        assert_eq!(
            outcome,
            FlagOutcome::Missing(vec![MissingMaterialization {
                unit: "u".to_string(),
                rule: "r1".to_string(),
                read_materialization: "exp".to_string(),
            }])
        );
    }

    #[test]
    fn test_sticky_variant_wins_over_bucketing() {
        let st = state(vec![flag("f", vec![sticky_rule(MaterializationMode::default())])]);
        let config = ResolverConfig::default();
        let mut materializations = MaterializationContext::new();
        materializations.insert("u", "exp", MaterializationInfo::assigned("r1", "off"));
        let outcome = Resolver::new(&st, &config)
            .resolve_flag(st.flag("f").unwrap(), &ctx("u"), &materializations)
            .unwrap();
        match outcome {
            FlagOutcome::Resolved { value, update } => {
                assert_eq!(value.variant(), Some("off"));
                assert!(update.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_fresh_assignment_emits_update() {
        let st = state(vec![flag("f", vec![sticky_rule(MaterializationMode::default())])]);
        let config = ResolverConfig::default();
        let mut materializations = MaterializationContext::new();
        materializations.insert("u", "exp", MaterializationInfo::default());
        let outcome = Resolver::new(&st, &config)
            .resolve_flag(st.flag("f").unwrap(), &ctx("u"), &materializations)
            .unwrap();
        match outcome {
            FlagOutcome::Resolved { value, update } => {
                assert_eq!(value.variant(), Some("on"));
                let update = update.unwrap();
                assert_eq!(update.write_materialization, "exp");
                assert_eq!(update.variant, "on");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_must_match_skips_unmaterialized_unit() {
        let mode = MaterializationMode {
            materialization_must_match: true,
            segment_targeting_can_be_ignored: false,
        };
        let st = state(vec![flag("f", vec![sticky_rule(mode)])]);
        let config = ResolverConfig::default();
        let mut materializations = MaterializationContext::new();
        materializations.insert("u", "exp", MaterializationInfo::default());
        let value = outcome_value(
            Resolver::new(&st, &config)
                .resolve_flag(st.flag("f").unwrap(), &ctx("u"), &materializations)
                .unwrap(),
        );
        assert_eq!(value.reason, ResolveReason::NoSegmentMatch);
    }

    #[test]
    fn test_batch_request_errors() {
        let st = state(vec![flag("f", vec![])]);
        let config = ResolverConfig::default();
        let resolver = Resolver::new(&st, &config);

        let bad_secret = ResolveRequest::new("nope", vec![], ctx("u"));
        assert_eq!(resolver.resolve(&bad_secret), Err(ResolveError::InvalidClientSecret));

        let unknown = ResolveRequest::new(SECRET, vec!["ghost".to_string()], ctx("u"));
        assert_eq!(resolver.resolve(&unknown), Err(ResolveError::FlagNotFound("ghost".to_string())));

        let too_many = ResolveRequest::new(SECRET, vec!["f".to_string(); 201], ctx("u"));
        assert!(matches!(resolver.resolve(&too_many), Err(ResolveError::TooManyFlags { .. })));
    }

    #[test]
    fn test_ineligible_flag() {
        let mut hidden = flag("hidden", vec![]);
        hidden.clients.clear();
        let st = state(vec![flag("f", vec![]), hidden]);
        let config = ResolverConfig::default();
        let resolver = Resolver::new(&st, &config);
        let request = ResolveRequest::new(SECRET, vec!["hidden".to_string()], ctx("u"));
        assert!(matches!(resolver.resolve(&request), Err(ResolveError::FlagNotEligible { .. })));

        let all = ResolveRequest::new(SECRET, vec![], ctx("u"));
        match resolver.resolve(&all).unwrap() {
            ResolveOutcome::Resolved(resolution) => {
                assert_eq!(resolution.response.resolved_flags.len(), 1);
                assert_eq!(resolution.response.resolved_flags[0].flag, "f");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_token_round_trip_through_apply() {
        let st = state(vec![flag(
            "f",
            vec![Rule::new("r1", "everyone", AssignmentSpec::new(100, vec![whole("a1", "on")]))],
        )]);
        let config = ResolverConfig::default();
        let resolver = Resolver::new(&st, &config);
        let request = ResolveRequest::new(SECRET, vec!["f".to_string()], ctx("u"));
        let resolution = match resolver.resolve(&request).unwrap() {
            ResolveOutcome::Resolved(r) => r,
            other => panic!("unexpected {other:?}"),
        };
        assert!(resolution.events.is_empty());
        let token = resolution.response.resolve_token.clone().unwrap();

        let apply = ApplyRequest {
            client_secret: SECRET.to_string(),
            resolve_token: token,
            flags: vec![AppliedFlag { flag: "f".to_string(), applied_at: Utc::now() }],
        };
        let events = resolver.apply(&apply).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].resolve_id, resolution.response.resolve_id);
        assert_eq!(events[0].assignment.variant.as_deref(), Some("on"));

        let wrong = ApplyRequest {
            flags: vec![AppliedFlag { flag: "g".to_string(), applied_at: Utc::now() }],
            ..apply
        };
        assert_eq!(resolver.apply(&wrong), Err(ResolveError::FlagNotInToken("g".to_string())));
    }

    #[test]
    fn test_applying_resolve_emits_events() {
        let st = state(vec![flag(
            "f",
            vec![Rule::new("r1", "everyone", AssignmentSpec::new(100, vec![whole("a1", "on")]))],
        )]);
        let config = ResolverConfig::default();
        let request = ResolveRequest::new(SECRET, vec!["f".to_string()], ctx("u")).with_apply(true);
        match Resolver::new(&st, &config).resolve(&request).unwrap() {
            ResolveOutcome::Resolved(resolution) => {
                assert!(resolution.response.resolve_token.is_none());
                assert_eq!(resolution.events.len(), 1);
                assert_eq!(resolution.events[0].client, "web");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}

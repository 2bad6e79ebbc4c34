//! Golden tests for flag resolution.
//!
//! These pin bucket values shared with other resolver implementations and the
//! reason codes of the canonical resolution scenarios.

use flag_resolver::{
    bucket, AccountState, AccountStateInput, Assignment, AssignmentSpec, AttributeRule, BucketRange,
    ClientCredential, Criterion, EvaluationContext, Expr, FieldSchema, Flag, FlagSchema, FlagState,
    ResolveOutcome, ResolveReason, ResolveRequest, ResolveToken, Resolution, Resolver, ResolverConfig,
    Rule, ScalarValue, Segment, SegmentBitset, Targeting, Variant, BUCKET_COUNT,
};
use serde_json::json;
use std::collections::BTreeMap;

const SECRET: &str = "golden-client-secret";

/// Bucket of "tester" in the account salt of "acme".
const TESTER_BUCKET: u64 = 75_995;

// ─────────────────────────────────────────────────────────────────────────────
// Test Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn flag(name: &str, rules: Vec<Rule>) -> Flag {
    let mut flag = Flag::new(name);
    flag.schema = FlagSchema::new([
        ("color".to_string(), FieldSchema::String),
        ("size".to_string(), FieldSchema::Int),
    ]);
    flag.variants = vec![
        Variant::new("blue", json!({ "color": "blue", "size": 2 }).as_object().cloned().unwrap()),
        Variant::new("red", json!({ "color": "red" }).as_object().cloned().unwrap()),
    ];
    flag.rules = rules;
    flag.clients = vec!["web".to_string()];
    flag
}

fn full_range(id: &str, variant: &str) -> Rule {
    Rule::new(
        "rule-1",
        "sampled",
        AssignmentSpec::new(
            BUCKET_COUNT,
            vec![Assignment::variant(id, variant, vec![BucketRange::new(0, BUCKET_COUNT)])],
        ),
    )
}

fn state_with_bitset(flags: Vec<Flag>, bitset: SegmentBitset) -> AccountState {
    let mut criteria = BTreeMap::new();
    criteria.insert(
        "sweden".to_string(),
        Criterion::attribute("country", AttributeRule::Eq(ScalarValue::from("SE"))),
    );
    AccountState::build(AccountStateInput {
        account: "acme".to_string(),
        flags,
        segments: vec![
            Segment::new("sampled", Targeting::everyone()),
            Segment::new("swedes", Targeting::new(Expr::reference("sweden"), criteria)),
        ],
        bitsets: [
            ("sampled".to_string(), bitset),
            ("swedes".to_string(), SegmentBitset::Full),
        ]
        .into_iter()
        .collect(),
        clients: vec![ClientCredential {
            client: "web".to_string(),
            secret: SECRET.to_string(),
        }],
    })
    .expect("golden state is valid")
}

fn resolve(state: &AccountState, flags: &[&str], context: EvaluationContext) -> Resolution {
    let config = ResolverConfig::default();
    let request = ResolveRequest::new(SECRET, flags.iter().map(|f| f.to_string()).collect(), context);
    match Resolver::new(state, &config).resolve(&request).unwrap() {
        ResolveOutcome::Resolved(resolution) => resolution,
        other => panic!("unexpected outcome: {other:?}"),
    }
}

fn tester() -> EvaluationContext {
    EvaluationContext::new().with("targeting_key", "tester")
}

// ─────────────────────────────────────────────────────────────────────────────
// Golden Bucket Values
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_golden_bucket_values() {
    assert_eq!(bucket("user-1", "salt", BUCKET_COUNT), 997_251);
    assert_eq!(bucket("user-2", "salt", BUCKET_COUNT), 354_096);
    assert_eq!(bucket("user-1", "other-salt", BUCKET_COUNT), 997_449);
    assert_eq!(bucket("tester", "MegaSalt-acme", BUCKET_COUNT), TESTER_BUCKET);
}

#[test]
fn test_bucket_stable_across_calls() {
    let first = bucket("user-1", "salt", BUCKET_COUNT);
    for _ in 0..100 {
        assert_eq!(bucket("user-1", "salt", BUCKET_COUNT), first);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Resolution Scenarios
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_match_when_bitset_contains_bucket() {
    let state = state_with_bitset(
        vec![flag("button", vec![full_range("blue-all", "blue")])],
        SegmentBitset::from_buckets([TESTER_BUCKET]),
    );
    let resolution = resolve(&state, &["button"], tester());

    let resolved = resolution.response.flag("button").unwrap();
    assert_eq!(resolved.reason, ResolveReason::Match);
    assert_eq!(resolved.variant.as_deref(), Some("blue"));
    assert_eq!(
        resolved.value.as_ref().unwrap(),
        json!({ "color": "blue", "size": 2 }).as_object().unwrap()
    );
    assert!(resolved.should_apply);

    let m = resolution.values[0].assignment_match.as_ref().unwrap();
    assert_eq!(m.rule, "rule-1");
    assert_eq!(m.segment, "sampled");
    assert_eq!(m.assignment_id, "blue-all");
    assert_eq!(m.targeting_key, "tester");
}

#[test]
fn test_value_expanded_against_schema() {
    let state = state_with_bitset(
        vec![flag("button", vec![full_range("red-all", "red")])],
        SegmentBitset::Full,
    );
    let resolution = resolve(&state, &["button"], tester());
    let resolved = resolution.response.flag("button").unwrap();
    assert_eq!(
        resolved.value.as_ref().unwrap(),
        json!({ "color": "red", "size": null }).as_object().unwrap()
    );
}

#[test]
fn test_no_segment_match_when_bit_unset() {
    let state = state_with_bitset(
        vec![flag("button", vec![full_range("blue-all", "blue")])],
        SegmentBitset::from_buckets([TESTER_BUCKET + 1]),
    );
    let resolution = resolve(&state, &["button"], tester());

    let resolved = resolution.response.flag("button").unwrap();
    assert_eq!(resolved.reason, ResolveReason::NoSegmentMatch);
    assert!(resolved.variant.is_none());
    assert!(resolved.value.is_none());
    assert!(!resolved.should_apply);
}

#[test]
fn test_fallthrough_only_keeps_attribution() {
    let rule = Rule::new(
        "rule-1",
        "sampled",
        AssignmentSpec::new(
            BUCKET_COUNT,
            vec![Assignment::fallthrough("holdout", vec![BucketRange::new(0, BUCKET_COUNT)])],
        ),
    );
    let state = state_with_bitset(vec![flag("button", vec![rule])], SegmentBitset::Full);
    let resolution = resolve(&state, &["button"], tester());

    let resolved = resolution.response.flag("button").unwrap();
    assert_eq!(resolved.reason, ResolveReason::NoSegmentMatch);
    assert!(resolved.variant.is_none());
    assert_eq!(resolved.fallthrough_rules.len(), 1);
    assert_eq!(resolved.fallthrough_rules[0].rule, "rule-1");
    assert_eq!(resolved.fallthrough_rules[0].assignment_id, "holdout");
    assert!(resolved.should_apply);
}

#[test]
fn test_archived_flag() {
    let mut archived = flag("button", vec![full_range("blue-all", "blue")]);
    archived.state = FlagState::Archived;
    let state = state_with_bitset(vec![archived], SegmentBitset::Full);
    let resolution = resolve(&state, &["button"], tester());

    let resolved = resolution.response.flag("button").unwrap();
    assert_eq!(resolved.reason, ResolveReason::FlagArchived);
    assert!(resolved.variant.is_none());
}

#[test]
fn test_targeting_criterion() {
    let rule = Rule::new(
        "swedes-only",
        "swedes",
        AssignmentSpec::new(100, vec![Assignment::variant("a", "red", vec![BucketRange::new(0, 100)])]),
    );
    let state = state_with_bitset(vec![flag("button", vec![rule])], SegmentBitset::Full);

    let swede = tester().with("country", "SE");
    let resolution = resolve(&state, &["button"], swede);
    assert_eq!(resolution.response.flag("button").unwrap().variant.as_deref(), Some("red"));

    let other = tester().with("country", "NO");
    let resolution = resolve(&state, &["button"], other);
    assert_eq!(
        resolution.response.flag("button").unwrap().reason,
        ResolveReason::NoSegmentMatch
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Batch Resolve
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_batch_preserves_request_order() {
    let mut archived = flag("banner", vec![]);
    archived.state = FlagState::Archived;
    let state = state_with_bitset(
        vec![flag("button", vec![full_range("blue-all", "blue")]), archived],
        SegmentBitset::Full,
    );
    let resolution = resolve(&state, &["banner", "button"], tester());

    let names: Vec<&str> = resolution.response.resolved_flags.iter().map(|f| f.flag.as_str()).collect();
    assert_eq!(names, vec!["banner", "button"]);
    assert_eq!(resolution.response.resolved_flags[0].reason, ResolveReason::FlagArchived);
    assert_eq!(resolution.response.resolved_flags[1].reason, ResolveReason::Match);
}

#[test]
fn test_token_carries_assignments() {
    let state = state_with_bitset(
        vec![flag("button", vec![full_range("blue-all", "blue")])],
        SegmentBitset::Full,
    );
    let resolution = resolve(&state, &[], tester());
    let sealed = resolution.response.resolve_token.as_ref().unwrap();

    let token = ResolveToken::open(&ResolverConfig::default().token_secret, sealed).unwrap();
    assert_eq!(token.account, "acme");
    assert_eq!(token.resolve_id, resolution.response.resolve_id);
    assert_eq!(token.state_fingerprint, state.fingerprint());
    let assigned = token.assigned("button").unwrap();
    assert_eq!(assigned.variant.as_deref(), Some("blue"));
    assert_eq!(assigned.assignment_id.as_deref(), Some("blue-all"));
}

#[test]
fn test_reason_wire_format() {
    let state = state_with_bitset(
        vec![flag("button", vec![full_range("blue-all", "blue")])],
        SegmentBitset::Full,
    );
    let resolution = resolve(&state, &["button"], tester());
    let json = serde_json::to_value(&resolution.response).unwrap();
    assert_eq!(json["resolved_flags"][0]["reason"], "RESOLVE_REASON_MATCH");
    assert_eq!(json["resolved_flags"][0]["variant"], "blue");
}

// ─────────────────────────────────────────────────────────────────────────────
// Failure Isolation
// ─────────────────────────────────────────────────────────────────────────────

fn looped_state(flags: Vec<Flag>) -> AccountState {
    let refers_to = |other: &str| {
        let mut criteria = BTreeMap::new();
        criteria.insert("next".to_string(), Criterion::segment(other));
        Targeting::new(Expr::reference("next"), criteria)
    };
    AccountState::build(AccountStateInput {
        account: "acme".to_string(),
        flags,
        segments: vec![
            Segment::new("sampled", Targeting::everyone()),
            Segment::new("loop-a", refers_to("loop-b")),
            Segment::new("loop-b", refers_to("loop-a")),
        ],
        bitsets: [
            ("sampled".to_string(), SegmentBitset::Full),
            ("loop-a".to_string(), SegmentBitset::Full),
            ("loop-b".to_string(), SegmentBitset::Full),
        ]
        .into_iter()
        .collect(),
        clients: vec![ClientCredential {
            client: "web".to_string(),
            secret: SECRET.to_string(),
        }],
    })
    .expect("cycles are found at resolve time")
}

#[test]
fn test_cyclic_segment_fails_only_its_flag() {
    let broken = flag(
        "broken",
        vec![Rule::new(
            "rule-1",
            "loop-a",
            AssignmentSpec::new(
                BUCKET_COUNT,
                vec![Assignment::variant("red-all", "red", vec![BucketRange::new(0, BUCKET_COUNT)])],
            ),
        )],
    );
    let state = looped_state(vec![broken, flag("button", vec![full_range("blue-all", "blue")])]);
    let resolution = resolve(&state, &["broken", "button"], tester());
    let flags = &resolution.response.resolved_flags;

    assert_eq!(flags[0].flag, "broken");
    assert_eq!(flags[0].reason, ResolveReason::Error);
    let message = flags[0].error.as_deref().unwrap();
    assert!(message.contains("Circular segment dependency"), "{message}");
    assert!(message.contains("loop-a -> loop-b -> loop-a"), "{message}");
    assert_eq!(flags[0].variant, None);

    assert_eq!(flags[1].flag, "button");
    assert_eq!(flags[1].reason, ResolveReason::Match);
    assert_eq!(flags[1].variant.as_deref(), Some("blue"));
}

#[test]
fn test_oversized_targeting_key_fails_only_its_flag() {
    let by_user_id = full_range("blue-all", "blue").with_targeting_key("user.id");
    let state = state_with_bitset(
        vec![
            flag("broken", vec![full_range("red-all", "red")]),
            flag("button", vec![by_user_id]),
        ],
        SegmentBitset::Full,
    );
    let context = EvaluationContext::new()
        .with("targeting_key", "k".repeat(101))
        .with("user.id", "tester");
    let resolution = resolve(&state, &["broken", "button"], context);
    let flags = &resolution.response.resolved_flags;

    assert_eq!(flags[0].reason, ResolveReason::Error);
    assert!(flags[0].error.as_deref().unwrap().contains("101"));
    assert_eq!(flags[1].reason, ResolveReason::Match);
    assert_eq!(flags[1].variant.as_deref(), Some("blue"));
}

//! Evaluation context: the typed key/value struct a resolve is evaluated against.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::value::{ScalarValue, SemanticVersion, ValueKind};

/// Default context field holding the unit to bucket.
pub const DEFAULT_TARGETING_KEY: &str = "targeting_key";

/// Evaluation context supplied with a resolve request.
///
/// Attributes are addressed by dot-separated paths (`user.country`). A
/// missing path resolves to `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvaluationContext(Map<String, Value>);

static NULL: Value = Value::Null;

impl EvaluationContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing JSON object.
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Set a top-level field (builder style). Dotted names are stored
    /// as nested objects.
    pub fn with(mut self, path: &str, value: impl Into<Value>) -> Self {
        self.insert(path, value.into());
        self
    }

    /// Insert a value at a dot path, creating intermediate objects.
    pub fn insert(&mut self, path: &str, value: Value) {
        let mut segments: Vec<&str> = path.split('.').collect();
        let last = match segments.pop() {
            Some(last) => last,
            None => return,
        };
        let mut current = &mut self.0;
        for segment in segments {
            let entry = current
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            current = match entry {
                Value::Object(map) => map,
                _ => return,
            };
        }
        current.insert(last.to_string(), value);
    }

    /// Resolve a dot path. Missing segments yield `Value::Null`.
    pub fn get(&self, path: &str) -> &Value {
        let mut segments = path.split('.');
        let first = match segments.next() {
            Some(first) => first,
            None => return &NULL,
        };
        let mut current = match self.0.get(first) {
            Some(v) => v,
            None => return &NULL,
        };
        for segment in segments {
            current = match current {
                Value::Object(map) => match map.get(segment) {
                    Some(v) => v,
                    None => return &NULL,
                },
                _ => return &NULL,
            };
        }
        current
    }

    /// The underlying JSON object.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Whether the context holds no fields.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for EvaluationContext {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Convert a context attribute to the given kind.
///
/// Conversion is best-effort: `None` means "not convertible" and is treated
/// by callers as "criterion not satisfied". It never fails loudly.
pub fn coerce(value: &Value, kind: ValueKind) -> Option<ScalarValue> {
    match (kind, value) {
        (_, Value::Null) => None,
        (ValueKind::Bool, Value::Bool(b)) => Some(ScalarValue::Bool(*b)),
        (ValueKind::Bool, Value::String(s)) => match s.to_ascii_lowercase().as_str() {
            "true" => Some(ScalarValue::Bool(true)),
            "false" => Some(ScalarValue::Bool(false)),
            _ => None,
        },
        (ValueKind::Number, Value::Number(n)) => n.as_f64().map(ScalarValue::Number),
        (ValueKind::Number, Value::String(s)) => s.trim().parse::<f64>().ok().map(ScalarValue::Number),
        (ValueKind::String, Value::String(s)) => Some(ScalarValue::String(s.clone())),
        (ValueKind::String, Value::Number(n)) => Some(ScalarValue::String(n.to_string())),
        (ValueKind::String, Value::Bool(b)) => Some(ScalarValue::String(b.to_string())),
        (ValueKind::Timestamp, Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| ScalarValue::Timestamp(t.with_timezone(&Utc))),
        (ValueKind::Timestamp, Value::Number(n)) => {
            // Epoch seconds, fractional part as sub-second precision.
            let secs = n.as_f64()?;
            let millis = (secs * 1000.0).round() as i64;
            Utc.timestamp_millis_opt(millis).single().map(ScalarValue::Timestamp)
        }
        (ValueKind::Version, Value::String(s)) => SemanticVersion::parse(s).map(ScalarValue::Version),
        _ => None,
    }
}

//! Flag value schemas.
//!
//! Variant values are validated and expanded against the flag schema when a
//! state snapshot is built, so resolution never sees a missing field: fields
//! the variant omits are filled with `null`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Type of one schema field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldSchema {
    /// Boolean.
    Bool,
    /// Integer.
    Int,
    /// Floating point.
    Double,
    /// String.
    String,
    /// Nested struct.
    Struct(FlagSchema),
    /// Homogeneous list.
    List(Box<FieldSchema>),
}

/// Struct schema of a flag value.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlagSchema {
    /// Field name -> type.
    pub fields: BTreeMap<String, FieldSchema>,
}

/// A value that does not conform to its schema.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Field '{path}' does not match schema: expected {expected}")]
pub struct SchemaViolation {
    /// Dot path of the offending field.
    pub path: String,
    /// Human-readable expected type.
    pub expected: String,
}

impl FlagSchema {
    /// Schema with the given fields.
    pub fn new(fields: impl IntoIterator<Item = (String, FieldSchema)>) -> Self {
        Self { fields: fields.into_iter().collect() }
    }

    /// Validate `value` and return it with every schema field present.
    ///
    /// Missing fields become `null`; nested structs are expanded recursively.
    /// Fields not in the schema are rejected.
    pub fn expand(&self, value: &Map<String, Value>) -> Result<Map<String, Value>, SchemaViolation> {
        self.expand_at("", value)
    }

    fn expand_at(&self, prefix: &str, value: &Map<String, Value>) -> Result<Map<String, Value>, SchemaViolation> {
        for key in value.keys() {
            if !self.fields.contains_key(key) {
                return Err(SchemaViolation {
                    path: join(prefix, key),
                    expected: "no such field".to_string(),
                });
            }
        }
        let mut out = Map::new();
        for (name, field) in &self.fields {
            let path = join(prefix, name);
            let expanded = match value.get(name) {
                None | Some(Value::Null) => match field {
                    FieldSchema::Struct(inner) => Value::Object(inner.expand_at(&path, &Map::new())?),
                    _ => Value::Null,
                },
                Some(v) => field.check(&path, v)?,
            };
            out.insert(name.clone(), expanded);
        }
        Ok(out)
    }
}

impl FieldSchema {
    fn check(&self, path: &str, value: &Value) -> Result<Value, SchemaViolation> {
        let violation = |expected: &str| SchemaViolation {
            path: path.to_string(),
            expected: expected.to_string(),
        };
        match (self, value) {
            (_, Value::Null) => Ok(Value::Null),
            (Self::Bool, Value::Bool(_)) => Ok(value.clone()),
            (Self::Bool, _) => Err(violation("bool")),
            (Self::Int, Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(value.clone()),
            (Self::Int, _) => Err(violation("int")),
            (Self::Double, Value::Number(_)) => Ok(value.clone()),
            (Self::Double, _) => Err(violation("double")),
            (Self::String, Value::String(_)) => Ok(value.clone()),
            (Self::String, _) => Err(violation("string")),
            (Self::Struct(inner), Value::Object(map)) => Ok(Value::Object(inner.expand_at(path, map)?)),
            (Self::Struct(_), _) => Err(violation("struct")),
            (Self::List(item), Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(i, v)| item.check(&format!("{path}[{i}]"), v))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            (Self::List(_), _) => Err(violation("list")),
        }
    }
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

//! Sticky assignment (materialization) types.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// What a materialization records about one unit.
///
/// The empty value is the identity: the unit is not in the materialization
/// and no rule has a recorded variant.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MaterializationInfo {
    /// Whether the unit has been written into the materialization.
    #[serde(default)]
    pub is_unit_in_materialization: bool,
    /// Rule name -> variant name previously assigned.
    #[serde(default)]
    pub rule_to_variant: BTreeMap<String, String>,
}

impl MaterializationInfo {
    /// Info for a unit assigned `variant` by `rule`.
    pub fn assigned(rule: impl Into<String>, variant: impl Into<String>) -> Self {
        let mut rule_to_variant = BTreeMap::new();
        rule_to_variant.insert(rule.into(), variant.into());
        Self {
            is_unit_in_materialization: true,
            rule_to_variant,
        }
    }

    /// Fold `other` into `self`. Later variants for the same rule win.
    pub fn merge(&mut self, other: &MaterializationInfo) {
        self.is_unit_in_materialization |= other.is_unit_in_materialization;
        for (rule, variant) in &other.rule_to_variant {
            self.rule_to_variant.insert(rule.clone(), variant.clone());
        }
    }

    /// Variant previously assigned by `rule`.
    pub fn variant_for(&self, rule: &str) -> Option<&str> {
        self.rule_to_variant.get(rule).map(String::as_str)
    }
}

/// Materializations known for the units in a request:
/// unit -> materialization -> info.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MaterializationContext {
    units: HashMap<String, HashMap<String, MaterializationInfo>>,
}

impl MaterializationContext {
    /// Empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Info for `(unit, materialization)`, if it has been loaded.
    pub fn get(&self, unit: &str, materialization: &str) -> Option<&MaterializationInfo> {
        self.units.get(unit).and_then(|m| m.get(materialization))
    }

    /// Record info for `(unit, materialization)`, replacing any previous entry.
    pub fn insert(&mut self, unit: impl Into<String>, materialization: impl Into<String>, info: MaterializationInfo) {
        self.units
            .entry(unit.into())
            .or_default()
            .insert(materialization.into(), info);
    }

    /// Merge a loaded per-unit map into the context.
    pub fn extend_unit(&mut self, unit: &str, infos: HashMap<String, MaterializationInfo>) {
        let entry = self.units.entry(unit.to_string()).or_default();
        for (materialization, info) in infos {
            entry.insert(materialization, info);
        }
    }

    /// Number of units with at least one entry.
    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    /// Whether nothing has been loaded.
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

/// A `(unit, materialization)` pair a resolve needs before it can decide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MissingMaterialization {
    /// The unit.
    pub unit: String,
    /// Rule that reads the materialization.
    pub rule: String,
    /// Read materialization name.
    pub read_materialization: String,
}

/// A new sticky assignment to persist after a successful resolve.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MaterializationUpdate {
    /// The unit.
    pub unit: String,
    /// Rule that made the assignment.
    pub rule: String,
    /// Materialization to write into.
    pub write_materialization: String,
    /// Assigned variant.
    pub variant: String,
}

/// Group updates into one store call per unit.
pub fn group_updates(
    updates: &[MaterializationUpdate],
) -> BTreeMap<String, HashMap<String, MaterializationInfo>> {
    let mut grouped: BTreeMap<String, HashMap<String, MaterializationInfo>> = BTreeMap::new();
    for update in updates {
        grouped
            .entry(update.unit.clone())
            .or_default()
            .entry(update.write_materialization.clone())
            .or_default()
            .merge(&MaterializationInfo::assigned(&update.rule, &update.variant));
    }
    grouped
}

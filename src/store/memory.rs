//! In-memory materialization store for testing and local runs.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::types::MaterializationInfo;
use super::{MaterializationStore, StoreError};

/// In-memory materialization store.
///
/// Keyed by `(unit, materialization)`. Stores merge into existing records.
/// Load and store calls are counted so tests can assert on traffic.
#[derive(Debug, Default)]
pub struct InMemoryMaterializationStore {
    records: RwLock<BTreeMap<(String, String), MaterializationInfo>>,
    loads: AtomicUsize,
    stores: AtomicUsize,
}

impl InMemoryMaterializationStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record directly.
    pub fn insert(&self, unit: &str, materialization: &str, info: MaterializationInfo) {
        self.records
            .write()
            .insert((unit.to_string(), materialization.to_string()), info);
    }

    /// Current record for `(unit, materialization)`.
    pub fn get(&self, unit: &str, materialization: &str) -> Option<MaterializationInfo> {
        self.records
            .read()
            .get(&(unit.to_string(), materialization.to_string()))
            .cloned()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether the store has no records.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Number of load calls served.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Number of store calls served.
    pub fn store_count(&self) -> usize {
        self.stores.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MaterializationStore for InMemoryMaterializationStore {
    async fn load_materialized_assignments_for_unit(
        &self,
        unit: &str,
        rule_materializations: &HashMap<String, String>,
    ) -> Result<HashMap<String, MaterializationInfo>, StoreError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let records = self.records.read();
        Ok(rule_materializations
            .values()
            .filter_map(|materialization| {
                records
                    .get(&(unit.to_string(), materialization.clone()))
                    .map(|info| (materialization.clone(), info.clone()))
            })
            .collect())
    }

    async fn store_assignment(
        &self,
        unit: &str,
        assignments: HashMap<String, MaterializationInfo>,
    ) -> Result<(), StoreError> {
        self.stores.fetch_add(1, Ordering::SeqCst);
        let mut records = self.records.write();
        for (materialization, info) in assignments {
            records
                .entry((unit.to_string(), materialization))
                .or_default()
                .merge(&info);
        }
        Ok(())
    }
}

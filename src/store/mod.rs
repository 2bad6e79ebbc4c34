//! Materialization storage backends.

pub mod memory;
pub mod cached;

#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use std::collections::HashMap;

use crate::types::MaterializationInfo;

/// Error type for materialization store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The backend failed.
    #[error("Materialization store error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Wrap any backend error.
    pub fn backend(e: impl std::fmt::Display) -> Self {
        Self::Backend(e.to_string())
    }
}

/// Persistent sticky assignments.
///
/// Implementations must treat a missing `(unit, materialization)` pair as
/// "not in the materialization": loads may omit it from the result.
#[async_trait]
pub trait MaterializationStore: Send + Sync {
    /// Load the materializations named in `rule_materializations`
    /// (rule -> materialization) for `unit`.
    ///
    /// Returns materialization -> info for the pairs that exist.
    async fn load_materialized_assignments_for_unit(
        &self,
        unit: &str,
        rule_materializations: &HashMap<String, String>,
    ) -> Result<HashMap<String, MaterializationInfo>, StoreError>;

    /// Merge `assignments` (materialization -> info) into the unit's records.
    async fn store_assignment(
        &self,
        unit: &str,
        assignments: HashMap<String, MaterializationInfo>,
    ) -> Result<(), StoreError>;
}

pub use memory::InMemoryMaterializationStore;
pub use cached::{CacheConfig, CacheStats, CachedMaterializationStore};

#[cfg(feature = "postgres")]
pub use postgres::{PostgresConfig, PostgresMaterializationStore};

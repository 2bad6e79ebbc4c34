//! Sticky resolution.
//!
//! Flags with read materializations cannot be decided until the unit's
//! previous assignments are known. The coordinator wraps a runtime and runs
//! the round trip:
//!
//! ```text
//! resolve ──► Success ──► persist updates (background) ──► response
//!    │
//!    └──► MissingMaterializations
//!            ├── Fallback strategy:   delegate the original request
//!            └── Repository strategy: load per unit, merge, resolve again
//! ```
//!
//! The repository loop is bounded by `max_materialization_rounds`. Pairs the
//! store does not return are filled in as "not in the materialization", so a
//! well-behaved runtime converges after one retry.

use async_trait::async_trait;
use futures::future::try_join_all;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::config::ResolverConfig;
use crate::resolver::{ResolveRequest, ResolveResponse};
use crate::runtime::{EvaluationRuntime, RuntimeError, RuntimeResponse};
use crate::store::{MaterializationStore, StoreError};
use crate::types::{group_updates, MaterializationInfo, MaterializationUpdate, MissingMaterialization};

/// Errors raised by sticky resolution.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StickyError {
    /// The runtime call failed.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    /// Loading materializations failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The fallback resolver failed.
    #[error("Fallback resolve failed: {0}")]
    Fallback(String),
    /// The runtime kept reporting missing materializations.
    #[error("Sticky resolve did not converge after {rounds} rounds")]
    NotConverged {
        /// Rounds attempted.
        rounds: usize,
    },
}

/// Resolver used when sticky assignments are not available locally.
#[async_trait]
pub trait FallbackResolver: Send + Sync {
    /// Resolve `request` elsewhere.
    async fn resolve(&self, request: &ResolveRequest) -> Result<ResolveResponse, StickyError>;
}

/// How missing materializations are handled.
#[derive(Clone)]
pub enum StickyStrategy {
    /// Hand the whole request to another resolver.
    Fallback(Arc<dyn FallbackResolver>),
    /// Load from a materialization store and retry locally.
    Repository(Arc<dyn MaterializationStore>),
}

/// Runs resolves with the sticky round trip.
pub struct StickyResolutionCoordinator<R> {
    runtime: Arc<R>,
    strategy: StickyStrategy,
    max_rounds: usize,
    handle: Handle,
    pending_writes: Mutex<Vec<JoinHandle<()>>>,
}

impl<R: EvaluationRuntime + 'static> StickyResolutionCoordinator<R> {
    /// Coordinator over `runtime`, retrying at most
    /// `config.max_materialization_rounds` times. Persistence tasks are
    /// spawned on `handle`.
    pub fn new(runtime: Arc<R>, strategy: StickyStrategy, config: &ResolverConfig, handle: Handle) -> Self {
        Self {
            runtime,
            strategy,
            max_rounds: config.max_materialization_rounds,
            handle,
            pending_writes: Mutex::new(Vec::new()),
        }
    }

    /// The wrapped runtime.
    pub fn runtime(&self) -> &Arc<R> {
        &self.runtime
    }

    /// Resolve `request`, loading sticky assignments as needed.
    pub async fn resolve(&self, request: ResolveRequest) -> Result<ResolveResponse, StickyError> {
        let mut request = request;
        let mut rounds = 0;
        loop {
            let items = match self.runtime.resolve(&request).await? {
                RuntimeResponse::Success { response, updates } => {
                    self.persist(updates);
                    return Ok(response);
                }
                RuntimeResponse::MissingMaterializations(items) => items,
            };
            match &self.strategy {
                StickyStrategy::Fallback(fallback) => {
                    tracing::debug!(missing = items.len(), "Delegating sticky resolve to fallback");
                    return fallback.resolve(&request).await;
                }
                StickyStrategy::Repository(store) => {
                    if rounds >= self.max_rounds {
                        return Err(StickyError::NotConverged { rounds });
                    }
                    rounds += 1;
                    load_missing(store.as_ref(), &mut request, &items).await?;
                }
            }
        }
    }

    fn persist(&self, updates: Vec<MaterializationUpdate>) {
        if updates.is_empty() {
            return;
        }
        let store = match &self.strategy {
            StickyStrategy::Repository(store) => store.clone(),
            StickyStrategy::Fallback(_) => {
                tracing::debug!(updates = updates.len(), "No repository, dropping sticky updates");
                return;
            }
        };
        let task = self.handle.spawn(async move {
            for (unit, assignments) in group_updates(&updates) {
                if let Err(e) = store.store_assignment(&unit, assignments).await {
                    tracing::warn!(unit = %unit, error = %e, "Failed to persist sticky assignment");
                }
            }
        });
        let mut pending = self.pending_writes.lock();
        pending.retain(|t| !t.is_finished());
        pending.push(task);
    }

    /// Wait for background persistence started so far.
    pub async fn drain_writes(&self) {
        let tasks = std::mem::take(&mut *self.pending_writes.lock());
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Sticky persistence task failed");
            }
        }
    }
}

/// Load every missing pair, one store call per unit, and merge the results
/// into the request.
async fn load_missing(
    store: &dyn MaterializationStore,
    request: &mut ResolveRequest,
    items: &[MissingMaterialization],
) -> Result<(), StoreError> {
    let mut by_unit: BTreeMap<&str, HashMap<String, String>> = BTreeMap::new();
    for item in items {
        by_unit
            .entry(item.unit.as_str())
            .or_default()
            .insert(item.rule.clone(), item.read_materialization.clone());
    }

    let loads = by_unit.iter().map(|(unit, rules)| async move {
        let loaded = store.load_materialized_assignments_for_unit(unit, rules).await?;
        Ok::<_, StoreError>((*unit, rules, loaded))
    });
    let results = try_join_all(loads).await?;

    for (unit, rules, mut loaded) in results {
        for materialization in rules.values() {
            loaded.entry(materialization.clone()).or_insert_with(MaterializationInfo::default);
        }
        request.materializations.extend_unit(unit, loaded);
    }
    tracing::debug!(units = by_unit.len(), pairs = items.len(), "Loaded sticky assignments");
    Ok(())
}

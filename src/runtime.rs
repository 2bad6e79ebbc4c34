//! Evaluation runtimes.
//!
//! An [`EvaluationRuntime`] owns one snapshot and answers resolves against
//! it. The contract is small on purpose so a runtime can live in-process
//! ([`LocalRuntime`]) or behind a sandbox boundary: load a snapshot, resolve,
//! apply, and flush buffered logs.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::ResolverConfig;
use crate::resolver::{
    ApplyRequest, AssignmentEvent, ResolveError, ResolveOutcome, ResolveRequest, ResolveResponse, Resolver,
};
use crate::state::{AccountState, StateError};
use crate::types::{MaterializationUpdate, MissingMaterialization, ResolvedFlag};

/// Errors raised by an evaluation runtime.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuntimeError {
    /// The resolve was rejected.
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    /// The snapshot could not be loaded.
    #[error(transparent)]
    State(#[from] StateError),
    /// The runtime cannot serve requests.
    #[error("Runtime unavailable: {0}")]
    Unavailable(String),
}

/// Answer of a runtime to one resolve call.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeResponse {
    /// Flags were resolved.
    Success {
        /// Response for the caller.
        response: ResolveResponse,
        /// Sticky assignments to persist.
        updates: Vec<MaterializationUpdate>,
    },
    /// Sticky assignments must be supplied before resolving.
    MissingMaterializations(Vec<MissingMaterialization>),
}

/// Log record of one completed resolve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolveLogEntry {
    /// Resolve identifier.
    pub resolve_id: String,
    /// Calling client.
    pub client: String,
    /// Snapshot fingerprint.
    pub state_fingerprint: String,
    /// Per-flag results.
    pub resolved_flags: Vec<ResolvedFlag>,
}

/// Logs buffered by a runtime between flushes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RuntimeLogs {
    /// Completed resolves.
    pub resolves: Vec<ResolveLogEntry>,
    /// Exposure events.
    pub assignments: Vec<AssignmentEvent>,
}

impl RuntimeLogs {
    /// Append `other`.
    pub fn extend(&mut self, other: RuntimeLogs) {
        self.resolves.extend(other.resolves);
        self.assignments.extend(other.assignments);
    }

    /// Whether nothing was logged.
    pub fn is_empty(&self) -> bool {
        self.resolves.is_empty() && self.assignments.is_empty()
    }
}

/// A resolver runtime holding one snapshot.
#[async_trait]
pub trait EvaluationRuntime: Send + Sync {
    /// Load a snapshot from its encoded form.
    async fn set_state(&self, snapshot: &[u8]) -> Result<(), RuntimeError>;

    /// Resolve flags.
    async fn resolve(&self, request: &ResolveRequest) -> Result<RuntimeResponse, RuntimeError>;

    /// Record exposures for a previous resolve.
    async fn apply(&self, request: &ApplyRequest) -> Result<(), RuntimeError>;

    /// Drain buffered logs.
    async fn flush(&self) -> Result<RuntimeLogs, RuntimeError>;
}

/// In-process runtime.
pub struct LocalRuntime {
    config: ResolverConfig,
    state: RwLock<Option<Arc<AccountState>>>,
    logs: Mutex<RuntimeLogs>,
}

impl LocalRuntime {
    /// Runtime without a snapshot. Resolves fail until [`EvaluationRuntime::set_state`] is called.
    pub fn new(config: ResolverConfig) -> Self {
        Self {
            config,
            state: RwLock::new(None),
            logs: Mutex::new(RuntimeLogs::default()),
        }
    }

    /// Runtime over an already built snapshot.
    pub fn with_state(config: ResolverConfig, state: Arc<AccountState>) -> Self {
        let runtime = Self::new(config);
        *runtime.state.write() = Some(state);
        runtime
    }

    /// The current snapshot.
    pub fn state(&self) -> Option<Arc<AccountState>> {
        self.state.read().clone()
    }

    fn require_state(&self) -> Result<Arc<AccountState>, RuntimeError> {
        self.state()
            .ok_or_else(|| RuntimeError::Unavailable("no state loaded".to_string()))
    }
}

#[async_trait]
impl EvaluationRuntime for LocalRuntime {
    async fn set_state(&self, snapshot: &[u8]) -> Result<(), RuntimeError> {
        let state = AccountState::from_json(snapshot)?;
        tracing::info!(
            account = %state.account(),
            fingerprint = %state.fingerprint(),
            "Loaded account state"
        );
        *self.state.write() = Some(Arc::new(state));
        Ok(())
    }

    async fn resolve(&self, request: &ResolveRequest) -> Result<RuntimeResponse, RuntimeError> {
        let state = self.require_state()?;
        match Resolver::new(&state, &self.config).resolve(request)? {
            ResolveOutcome::MissingMaterializations(items) => Ok(RuntimeResponse::MissingMaterializations(items)),
            ResolveOutcome::Resolved(resolution) => {
                let mut logs = self.logs.lock();
                logs.resolves.push(ResolveLogEntry {
                    resolve_id: resolution.response.resolve_id.clone(),
                    client: resolution.client,
                    state_fingerprint: resolution.response.state_fingerprint.clone(),
                    resolved_flags: resolution.response.resolved_flags.clone(),
                });
                logs.assignments.extend(resolution.events);
                Ok(RuntimeResponse::Success {
                    response: resolution.response,
                    updates: resolution.updates,
                })
            }
        }
    }

    async fn apply(&self, request: &ApplyRequest) -> Result<(), RuntimeError> {
        let state = self.require_state()?;
        let events = Resolver::new(&state, &self.config).apply(request)?;
        self.logs.lock().assignments.extend(events);
        Ok(())
    }

    async fn flush(&self) -> Result<RuntimeLogs, RuntimeError> {
        Ok(std::mem::take(&mut *self.logs.lock()))
    }
}

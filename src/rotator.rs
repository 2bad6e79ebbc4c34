//! Hot-swapping of evaluation runtimes.
//!
//! The rotator keeps the active runtime behind an [`ArcSwap`]. Rotation
//! builds a runtime for the new snapshot, swaps it in, and then flushes the
//! retired runtime exactly once.
//!
//! Each runtime slot carries a `consumed` flag behind an async `RwLock`.
//! Resolves hold the read side for their whole call, so many run
//! concurrently. Retiring a slot takes the write side, which waits for every
//! in-flight resolve on that slot to finish, then marks it consumed and
//! flushes. A resolve that loaded the old slot but acquired the read side
//! after it was consumed retries on the current slot.

use arc_swap::ArcSwap;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::resolver::{ApplyRequest, ResolveRequest};
use crate::runtime::{EvaluationRuntime, RuntimeError, RuntimeLogs, RuntimeResponse};

/// Builds an empty runtime that a snapshot is then loaded into.
pub type RuntimeFactory<R> = Box<dyn Fn() -> R + Send + Sync>;

struct RuntimeSlot<R> {
    runtime: R,
    generation: u64,
    consumed: RwLock<bool>,
}

impl<R> RuntimeSlot<R> {
    fn new(runtime: R, generation: u64) -> Self {
        Self {
            runtime,
            generation,
            consumed: RwLock::new(false),
        }
    }
}

/// Owner of the active evaluation runtime.
pub struct StateRotator<R> {
    factory: RuntimeFactory<R>,
    current: ArcSwap<RuntimeSlot<R>>,
    rotation: tokio::sync::Mutex<u64>,
    retired_logs: Mutex<RuntimeLogs>,
}

impl<R: EvaluationRuntime + 'static> StateRotator<R> {
    /// Build the first runtime from `snapshot`.
    pub async fn new(factory: RuntimeFactory<R>, snapshot: &[u8]) -> Result<Self, RuntimeError> {
        let runtime = factory();
        runtime.set_state(snapshot).await?;
        Ok(Self {
            factory,
            current: ArcSwap::from_pointee(RuntimeSlot::new(runtime, 0)),
            rotation: tokio::sync::Mutex::new(0),
            retired_logs: Mutex::new(RuntimeLogs::default()),
        })
    }

    /// Generation of the active runtime; incremented by every rotation.
    pub fn generation(&self) -> u64 {
        self.current.load().generation
    }

    /// Swap in a runtime for `snapshot` and flush the retired one.
    ///
    /// Returns the retired runtime's logs. If the new snapshot cannot be
    /// loaded the active runtime stays in place.
    pub async fn rotate(&self, snapshot: &[u8]) -> Result<RuntimeLogs, RuntimeError> {
        let runtime = (self.factory)();
        runtime.set_state(snapshot).await?;

        let mut generation = self.rotation.lock().await;
        *generation += 1;
        let retired = self
            .current
            .swap(Arc::new(RuntimeSlot::new(runtime, *generation)));

        let mut consumed = retired.consumed.write().await;
        *consumed = true;
        let logs = retired.runtime.flush().await?;
        drop(consumed);

        tracing::info!(
            retired_generation = retired.generation,
            generation = *generation,
            resolves = logs.resolves.len(),
            assignments = logs.assignments.len(),
            "Rotated evaluation state"
        );
        Ok(logs)
    }
}

#[async_trait]
impl<R: EvaluationRuntime + 'static> EvaluationRuntime for StateRotator<R> {
    async fn set_state(&self, snapshot: &[u8]) -> Result<(), RuntimeError> {
        let logs = self.rotate(snapshot).await?;
        self.retired_logs.lock().extend(logs);
        Ok(())
    }

    async fn resolve(&self, request: &ResolveRequest) -> Result<RuntimeResponse, RuntimeError> {
        loop {
            let slot = self.current.load_full();
            let consumed = slot.consumed.read().await;
            if *consumed {
                tracing::warn!(generation = slot.generation, "Resolve lost flush race, retrying");
                continue;
            }
            return slot.runtime.resolve(request).await;
        }
    }

    async fn apply(&self, request: &ApplyRequest) -> Result<(), RuntimeError> {
        loop {
            let slot = self.current.load_full();
            let consumed = slot.consumed.read().await;
            if *consumed {
                continue;
            }
            return slot.runtime.apply(request).await;
        }
    }

    async fn flush(&self) -> Result<RuntimeLogs, RuntimeError> {
        let mut logs = std::mem::take(&mut *self.retired_logs.lock());
        let slot = self.current.load_full();
        logs.extend(slot.runtime.flush().await?);
        Ok(logs)
    }
}

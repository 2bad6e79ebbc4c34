//! Local Resolve Binary
//!
//! Loads an account state snapshot, resolves one request read from stdin,
//! and prints the response as JSON on stdout. Sticky assignments are kept in
//! an in-memory store for the duration of the run.
//!
//! ## Configuration
//!
//! Environment variables:
//! - `RESOLVER_TOKEN_SECRET`: HMAC secret for resolve tokens
//! - `RESOLVER_MAX_FLAGS`, `RESOLVER_MAX_TARGETING_KEY_LEN`,
//!   `RESOLVER_MAX_MATERIALIZATION_ROUNDS`: resolver limits
//! - `RUST_LOG`: Log level filter (default: info)
//! - `LOG_FORMAT`: "json" for structured logs, "pretty" for development (default: json)
//!
//! ## Usage
//!
//! ```bash
//! echo '{"client_secret":"...","evaluation_context":{"targeting_key":"user-1"}}' \
//!     | cargo run --bin resolve_local -- state.json
//! ```

use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::runtime::Handle;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use flag_resolver::{
    EvaluationRuntime, InMemoryMaterializationStore, LocalRuntime, ResolveRequest, ResolverConfig,
    RuntimeFactory, StateRotator, StickyResolutionCoordinator, StickyStrategy,
};

/// Initialize the tracing subscriber with JSON or pretty format.
///
/// Logs go to stderr so stdout carries only the response.
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "resolve_local=info,flag_resolver=info".into());

    if log_format == "pretty" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .flatten_event(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let path = std::env::args()
        .nth(1)
        .ok_or("usage: resolve_local <state.json> < request.json")?;
    let snapshot = tokio::fs::read(&path).await?;

    let config = ResolverConfig::from_env();
    let runtime_config = config.clone();
    let factory: RuntimeFactory<LocalRuntime> = Box::new(move || LocalRuntime::new(runtime_config.clone()));
    let rotator = Arc::new(StateRotator::new(factory, &snapshot).await?);
    info!(path = %path, "Loaded state snapshot");

    let store = Arc::new(InMemoryMaterializationStore::new());
    let coordinator = StickyResolutionCoordinator::new(
        rotator.clone(),
        StickyStrategy::Repository(store.clone()),
        &config,
        Handle::current(),
    );

    let mut input = String::new();
    tokio::io::stdin().read_to_string(&mut input).await?;
    let request: ResolveRequest = serde_json::from_str(&input)?;

    let response = coordinator.resolve(request).await?;
    coordinator.drain_writes().await;
    println!("{}", serde_json::to_string_pretty(&response)?);

    let logs = rotator.flush().await?;
    info!(
        resolve_id = %response.resolve_id,
        resolves = logs.resolves.len(),
        assignments = logs.assignments.len(),
        sticky_records = store.len(),
        "Resolve complete"
    );
    Ok(())
}

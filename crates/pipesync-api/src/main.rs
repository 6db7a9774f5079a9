//! Standalone sync service wired over the in-memory collaborators.
//!
//! Production deployments replace the in-memory stores with the Postgres
//! implementations and the in-memory remote with a real Pipeliner client.

use std::sync::Arc;

use pipesync_api::{sync_routes, AppState};
use pipesync_engine::{
    EngineConfig, InMemoryAggregateEventStore, InMemoryLocalStore, InMemoryRemote,
    InMemorySyncErrorStore, LockManager, Orchestrator, ResolverChain, StrategyRegistry,
    SyncErrorLedger, SyncWorker, TaskQueue,
};
use pipesync_webhooks::{GatewayConfig, InMemoryRegistrationStore, WebhookGateway};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = EngineConfig::default();

    let local = Arc::new(InMemoryLocalStore::new());
    let remote = Arc::new(InMemoryRemote::new());
    let ledger = Arc::new(SyncErrorLedger::new(Arc::new(InMemorySyncErrorStore::new())));
    let locks = Arc::new(LockManager::with_config(config.lock.clone()));
    let registry = Arc::new(StrategyRegistry::standard(
        config.strategies.clone(),
        Arc::new(ResolverChain::standard()),
        local,
        remote,
        ledger.clone(),
    ));

    let (queue, receiver) = TaskQueue::new(config.queue_capacity);
    let worker = Arc::new(SyncWorker::new(
        registry.clone(),
        locks.clone(),
        ledger.clone(),
        queue.clone(),
        receiver,
        config.worker.clone(),
    ));
    let worker_task = {
        let worker = worker.clone();
        tokio::spawn(async move { worker.run().await })
    };

    let registrations = Arc::new(InMemoryRegistrationStore::new());
    let gateway = Arc::new(WebhookGateway::new(
        registrations,
        registry.clone(),
        queue,
        GatewayConfig::default(),
    ));
    let events = Arc::new(InMemoryAggregateEventStore::new());
    let orchestrator = Arc::new(Orchestrator::with_config(
        locks,
        events,
        ledger.clone(),
        config.orchestrator.clone(),
    ));

    let state = AppState::new(gateway, orchestrator, registry, ledger);
    let app = sync_routes(state);

    let addr =
        std::env::var("PIPESYNC_LISTEN").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Pipesync API listening");
    axum::serve(listener, app).await?;

    worker.shutdown();
    let _ = worker_task.await;
    Ok(())
}

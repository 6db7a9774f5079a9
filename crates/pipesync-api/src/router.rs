//! Router configuration.

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

use pipesync_engine::{Orchestrator, StrategyRegistry, SyncErrorLedger};
use pipesync_webhooks::WebhookGateway;

use crate::handlers;

/// Shared state for the API handlers.
#[derive(Clone)]
pub struct AppState {
    /// Webhook ingestion gateway.
    pub gateway: Arc<WebhookGateway>,
    /// Orchestration runner.
    pub orchestrator: Arc<Orchestrator>,
    /// Strategy registry.
    pub registry: Arc<StrategyRegistry>,
    /// Sync error ledger service.
    pub ledger: Arc<SyncErrorLedger>,
    /// Strategy names a queue-sync request may name.
    pub allowed_strategies: Arc<Vec<String>>,
}

impl AppState {
    /// Create state; the allow-list defaults to the registry's configured
    /// default order.
    #[must_use]
    pub fn new(
        gateway: Arc<WebhookGateway>,
        orchestrator: Arc<Orchestrator>,
        registry: Arc<StrategyRegistry>,
        ledger: Arc<SyncErrorLedger>,
    ) -> Self {
        let allowed_strategies = Arc::new(registry.default_order().to_vec());
        Self {
            gateway,
            orchestrator,
            registry,
            ledger,
            allowed_strategies,
        }
    }

    /// Override the queue-sync allow-list.
    #[must_use]
    pub fn with_allowed_strategies(mut self, allowed: Vec<String>) -> Self {
        self.allowed_strategies = Arc::new(allowed);
        self
    }
}

/// Create the sync API router.
pub fn sync_routes(state: AppState) -> Router {
    Router::new()
        // Inbound remote-CRM events
        .route("/webhooks/pipeliner", post(handlers::receive_webhooks))
        // Orchestration
        .route("/sync/queue", post(handlers::queue_sync))
        // Error ledger triage
        .route("/sync/errors", get(handlers::list_sync_errors))
        .route("/sync/errors/archive", post(handlers::archive_sync_errors))
        .route("/sync/errors/restore", post(handlers::restore_sync_errors))
        .route("/sync/errors/:id/archive", post(handlers::archive_sync_error))
        .route("/sync/errors/:id/restore", post(handlers::restore_sync_error))
        .with_state(state)
}

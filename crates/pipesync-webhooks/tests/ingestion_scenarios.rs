//! End-to-end ingestion: gateway → task queue → worker → local effect.

use pipesync_core::EntityKind;
use pipesync_engine::{
    EngineConfig, InMemoryLocalStore, InMemoryRemote, InMemorySyncErrorStore, LocalStore,
    LockManager, ResolverChain, StrategyRegistry, SyncErrorLedger, SyncWorker, TaskQueue,
    WorkerConfig,
};
use pipesync_webhooks::{
    GatewayConfig, InMemoryRegistrationStore, NewWebhookRegistration, RegistrationStore,
    WebhookGateway,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    local: Arc<InMemoryLocalStore>,
    gateway: WebhookGateway,
    worker: Arc<SyncWorker>,
}

async fn harness() -> Harness {
    let local = Arc::new(InMemoryLocalStore::new());
    let remote = Arc::new(InMemoryRemote::new());
    let ledger = Arc::new(SyncErrorLedger::new(Arc::new(InMemorySyncErrorStore::new())));
    let locks = Arc::new(LockManager::new());
    let registry = Arc::new(StrategyRegistry::standard(
        EngineConfig::default().strategies,
        Arc::new(ResolverChain::standard()),
        local.clone(),
        remote,
        ledger.clone(),
    ));

    let registrations = Arc::new(InMemoryRegistrationStore::new());
    registrations
        .create(NewWebhookRegistration {
            pl_reference: "WH-1".to_string(),
            url: "https://sync.example.com/webhooks/pipeliner".to_string(),
            events: vec![
                "company.update".to_string(),
                "company.delete".to_string(),
            ],
            insecure_ssl: false,
            application_id: None,
            client_id: None,
        })
        .await
        .unwrap();

    let (queue, receiver) = TaskQueue::new(64);
    let worker = Arc::new(SyncWorker::new(
        registry.clone(),
        locks,
        ledger,
        queue.clone(),
        receiver,
        WorkerConfig {
            concurrency: 2,
            poll_interval_ms: 20,
            max_retries: 2,
            retry_backoff_ms: 20,
        },
    ));
    let gateway = WebhookGateway::new(registrations, registry, queue, GatewayConfig::default());

    Harness {
        local,
        gateway,
        worker,
    }
}

fn company_update(entity_id: &str, event_time: &str, name: &str) -> Value {
    json!({
        "webhook": {"id": "WH-1", "events": ["company.update"]},
        "event": "company.update",
        "event_time": event_time,
        "team_space_id": "ts-1",
        "entity": {"id": entity_id, "name": name, "sales_unit_name": "EU"}
    })
}

/// Delivering the same envelope twice inside the dedup window yields one
/// applied effect and two gateway outcomes: Accepted, then Ignored.
#[tokio::test]
async fn duplicate_delivery_applies_once() {
    let h = harness().await;
    let worker = h.worker.clone();
    let handle = tokio::spawn(async move { worker.run().await });

    let first = h
        .gateway
        .ingest_value(company_update("PL-9", "t1", "Acme"))
        .await
        .unwrap();
    assert!(first.is_accepted());

    let second = h
        .gateway
        .ingest_value(company_update("PL-9", "t1", "Acme"))
        .await
        .unwrap();
    assert_eq!(second.reason(), Some("duplicate delivery"));

    tokio::time::sleep(Duration::from_millis(200)).await;

    // Exactly one local company was created by the one applied effect.
    let companies = h.local.list(EntityKind::Company).await.unwrap();
    assert_eq!(companies.len(), 1);
    assert_eq!(companies[0].pl_reference(), Some("PL-9"));

    h.worker.shutdown();
    handle.await.unwrap();
}

/// An unknown webhook id is ignored with the documented reason and no
/// strategy is invoked.
#[tokio::test]
async fn unknown_webhook_invokes_no_strategy() {
    let h = harness().await;
    let worker = h.worker.clone();
    let handle = tokio::spawn(async move { worker.run().await });

    let outcome = h
        .gateway
        .ingest_value(json!({
            "webhook": {"id": "WH-404", "events": ["company.update"]},
            "event": "company.update",
            "event_time": "t1",
            "entity": {"id": "PL-9", "name": "Acme", "sales_unit_name": "EU"}
        }))
        .await
        .unwrap();
    assert_eq!(outcome.reason(), Some("webhook not found"));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.local.list(EntityKind::Company).await.unwrap().is_empty());

    h.worker.shutdown();
    handle.await.unwrap();
}

/// A deletion event soft-deletes the local counterpart instead of
/// removing it.
#[tokio::test]
async fn deletion_event_soft_deletes_local() {
    let h = harness().await;
    let worker = h.worker.clone();
    let handle = tokio::spawn(async move { worker.run().await });

    // First an update creates the local counterpart.
    h.gateway
        .ingest_value(company_update("PL-9", "t1", "Acme"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    let deletion = json!({
        "webhook": {"id": "WH-1", "events": ["company.delete"]},
        "event": "company.delete",
        "event_time": "t2",
        "entity": {"id": "PL-9", "name": "Acme", "sales_unit_name": "EU"}
    });
    assert!(h.gateway.ingest_value(deletion).await.unwrap().is_accepted());
    tokio::time::sleep(Duration::from_millis(150)).await;

    let companies = h.local.list(EntityKind::Company).await.unwrap();
    assert_eq!(companies.len(), 1, "soft delete must preserve the record");
    assert!(companies[0].is_deleted());

    h.worker.shutdown();
    handle.await.unwrap();
}

/// Out-of-order stale payloads are safe: last applied wins, nothing
/// crashes, the record converges to the most recently applied state.
#[tokio::test]
async fn stale_payloads_apply_last_wins() {
    let h = harness().await;
    let worker = h.worker.clone();
    let handle = tokio::spawn(async move { worker.run().await });

    h.gateway
        .ingest_value(company_update("PL-9", "t2", "Acme Renamed"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    // A stale earlier event arrives late; it still applies (last-applied
    // wins; the engine does not attempt version-based resolution).
    h.gateway
        .ingest_value(company_update("PL-9", "t1", "Acme"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    let companies = h.local.list(EntityKind::Company).await.unwrap();
    assert_eq!(companies.len(), 1);
    assert_eq!(companies[0].attr_str("name"), Some("Acme"));

    h.worker.shutdown();
    handle.await.unwrap();
}

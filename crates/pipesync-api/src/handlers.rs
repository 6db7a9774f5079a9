//! HTTP handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::Value;
use tracing::{error, info, instrument};
use uuid::Uuid;

use pipesync_core::{AggregateId, SyncErrorId};
use pipesync_engine::{BatchReport, CancelFlag, LedgerFilter, SyncError, SyncStrategy};

use crate::error::ApiError;
use crate::models::{
    QueueSyncRequest, QueueSyncResponse, SyncErrorIdsRequest, WebhookBatchResponse,
};
use crate::router::AppState;

/// `POST /webhooks/pipeliner`: ingest a delivery batch.
///
/// 202 when at least one envelope was accepted; 422 with the first reason
/// when everything was ignored. Per-envelope outcomes ride along either
/// way.
#[instrument(skip(state, envelopes), fields(batch = envelopes.len()))]
pub async fn receive_webhooks(
    State(state): State<AppState>,
    Json(envelopes): Json<Vec<Value>>,
) -> Result<(StatusCode, Json<WebhookBatchResponse>), ApiError> {
    if envelopes.is_empty() {
        return Ok((
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(WebhookBatchResponse {
                result: "ignored".to_string(),
                reason: Some("empty batch".to_string()),
                outcomes: vec![],
            }),
        ));
    }

    let outcomes = state.gateway.ingest_batch(envelopes).await?;
    let accepted = outcomes.iter().any(pipesync_webhooks::IngestOutcome::is_accepted);
    let response = if accepted {
        (
            StatusCode::ACCEPTED,
            Json(WebhookBatchResponse {
                result: "accepted".to_string(),
                reason: None,
                outcomes,
            }),
        )
    } else {
        let reason = outcomes
            .first()
            .and_then(|o| o.reason())
            .unwrap_or("ignored")
            .to_string();
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(WebhookBatchResponse {
                result: "ignored".to_string(),
                reason: Some(reason),
                outcomes,
            }),
        )
    };
    Ok(response)
}

/// `POST /sync/queue`: spawn an orchestration run.
///
/// Strategy names are validated against the configured allow-list before
/// resolution; an absent list runs the full default set. The run executes
/// asynchronously; the response carries the aggregate id correlating its
/// terminal event.
#[instrument(skip(state, request))]
pub async fn queue_sync(
    State(state): State<AppState>,
    Json(request): Json<QueueSyncRequest>,
) -> Result<(StatusCode, Json<QueueSyncResponse>), ApiError> {
    if let Some(names) = &request.strategies {
        if names.is_empty() {
            return Err(ApiError::Validation(
                "strategies must not be an empty list".to_string(),
            ));
        }
        for name in names {
            if !state.allowed_strategies.contains(name) {
                return Err(ApiError::Validation(format!(
                    "strategy '{name}' is not in the configured allow-list"
                )));
            }
        }
    }

    let strategies = state.registry.resolve(request.strategies.as_deref())?;
    let names: Vec<String> = strategies.iter().map(|s| s.name().to_string()).collect();
    let aggregate_id = AggregateId::new();

    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        let cancel = CancelFlag::new();
        match orchestrator.run(aggregate_id, &strategies, &cancel).await {
            Ok(event) => {
                info!(
                    aggregate_id = %aggregate_id,
                    success = event.success,
                    processed = event.processed_total(),
                    skipped = event.skipped_total(),
                    "Queued sync run finished"
                );
            }
            Err(e) => {
                error!(aggregate_id = %aggregate_id, error = %e, "Queued sync run failed");
            }
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(QueueSyncResponse {
            aggregate_id,
            strategies: names,
        }),
    ))
}

/// `GET /sync/errors`: list ledger entries for triage.
pub async fn list_sync_errors(
    State(state): State<AppState>,
    Query(filter): Query<LedgerFilter>,
) -> Result<Json<Vec<SyncError>>, ApiError> {
    Ok(Json(state.ledger.list(&filter).await?))
}

/// `POST /sync/errors/:id/archive`.
pub async fn archive_sync_error(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SyncError>, ApiError> {
    Ok(Json(state.ledger.archive(SyncErrorId::from_uuid(id)).await?))
}

/// `POST /sync/errors/:id/restore`.
pub async fn restore_sync_error(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SyncError>, ApiError> {
    Ok(Json(state.ledger.restore(SyncErrorId::from_uuid(id)).await?))
}

/// `POST /sync/errors/archive`: batch archive with a per-item report.
pub async fn archive_sync_errors(
    State(state): State<AppState>,
    Json(request): Json<SyncErrorIdsRequest>,
) -> Result<Json<BatchReport>, ApiError> {
    Ok(Json(state.ledger.archive_batch(&request.ids).await))
}

/// `POST /sync/errors/restore`: batch restore with a per-item report.
pub async fn restore_sync_errors(
    State(state): State<AppState>,
    Json(request): Json<SyncErrorIdsRequest>,
) -> Result<Json<BatchReport>, ApiError> {
    Ok(Json(state.ledger.restore_batch(&request.ids).await))
}

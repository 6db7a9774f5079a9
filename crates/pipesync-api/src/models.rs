//! Request and response bodies.

use pipesync_core::{AggregateId, SyncErrorId};
use pipesync_webhooks::IngestOutcome;
use serde::{Deserialize, Serialize};

/// Body of `POST /sync/queue`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueSyncRequest {
    /// Ordered strategy names to run; absent means the full default set.
    #[serde(default)]
    pub strategies: Option<Vec<String>>,
}

/// Response of `POST /sync/queue`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSyncResponse {
    /// Correlates the spawned run and its terminal event.
    pub aggregate_id: AggregateId,
    /// Names of the strategies the run will execute, in order.
    pub strategies: Vec<String>,
}

/// Response of the webhook endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookBatchResponse {
    /// `"accepted"` when at least one envelope was routed, else
    /// `"ignored"`.
    pub result: String,
    /// First ignore reason, present only on the ignored path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Per-envelope outcomes in delivery order.
    pub outcomes: Vec<IngestOutcome>,
}

/// Body of the batch archive/restore endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncErrorIdsRequest {
    /// Entry ids to transition, in order.
    pub ids: Vec<SyncErrorId>,
}

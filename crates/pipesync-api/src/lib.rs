//! # Pipesync API
//!
//! HTTP surface over the sync engine:
//!
//! - `POST /webhooks/pipeliner`: inbound event batches from the remote
//!   CRM, answered 202 accepted / 422 ignored
//! - `POST /sync/queue`: spawn an orchestration run over an optional,
//!   allow-listed strategy selection
//! - `GET /sync/errors` plus archive/restore endpoints (single and
//!   batch) for operator triage of the sync error ledger

pub mod error;
pub mod handlers;
pub mod models;
pub mod router;

pub use error::ApiError;
pub use models::{
    QueueSyncRequest, QueueSyncResponse, SyncErrorIdsRequest, WebhookBatchResponse,
};
pub use router::{sync_routes, AppState};

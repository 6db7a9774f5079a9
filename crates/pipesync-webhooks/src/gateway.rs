//! Webhook ingestion gateway.
//!
//! Validates, deduplicates, and routes inbound remote-CRM events. A
//! structurally valid envelope becomes a queued pull unit of work and is
//! Accepted immediately; processing happens asynchronously on the worker
//! pool under the lock manager. Everything else is Ignored with a reason.
//! The gateway never retries ignored events; redelivery is owned by the
//! remote system.

use pipesync_core::{EntityKind, EntityRecord, TaskId};
use pipesync_engine::{StrategyRegistry, SyncStrategy, TaskQueue, UnitOfWork};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::dedup::DedupCache;
use crate::error::{WebhookError, WebhookResult};
use crate::models::InboundEnvelope;
use crate::store::RegistrationStore;
use crate::validation::{event_kind, is_deletion_event, validate_envelope};

/// Gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Dedup window for redelivered events (seconds).
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: u64,
}

fn default_dedup_window_secs() -> u64 {
    120
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            dedup_window_secs: default_dedup_window_secs(),
        }
    }
}

/// Gateway-level outcome for one envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum IngestOutcome {
    /// Routed to a queued unit of work.
    Accepted {
        /// Handle of the queued work.
        task_id: TaskId,
    },
    /// Not routed; the remote system owns any redelivery.
    Ignored {
        /// Why the envelope was ignored.
        reason: String,
    },
}

impl IngestOutcome {
    fn ignored(reason: impl Into<String>) -> Self {
        IngestOutcome::Ignored {
            reason: reason.into(),
        }
    }

    /// Whether the envelope was accepted.
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, IngestOutcome::Accepted { .. })
    }

    /// The ignore reason, when ignored.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        match self {
            IngestOutcome::Accepted { .. } => None,
            IngestOutcome::Ignored { reason } => Some(reason),
        }
    }
}

/// Inbound event gateway.
pub struct WebhookGateway {
    registrations: Arc<dyn RegistrationStore>,
    registry: Arc<StrategyRegistry>,
    queue: TaskQueue,
    dedup: DedupCache,
}

impl WebhookGateway {
    /// Create a gateway.
    #[must_use]
    pub fn new(
        registrations: Arc<dyn RegistrationStore>,
        registry: Arc<StrategyRegistry>,
        queue: TaskQueue,
        config: GatewayConfig,
    ) -> Self {
        Self {
            registrations,
            registry,
            queue,
            dedup: DedupCache::new(Duration::from_secs(config.dedup_window_secs)),
        }
    }

    /// Ingest one delivery batch. Envelopes are independent: one bad
    /// element never affects its siblings.
    pub async fn ingest_batch(&self, envelopes: Vec<Value>) -> WebhookResult<Vec<IngestOutcome>> {
        let mut outcomes = Vec::with_capacity(envelopes.len());
        for envelope in envelopes {
            outcomes.push(self.ingest_value(envelope).await?);
        }
        Ok(outcomes)
    }

    /// Ingest one raw JSON envelope.
    pub async fn ingest_value(&self, value: Value) -> WebhookResult<IngestOutcome> {
        match serde_json::from_value::<InboundEnvelope>(value) {
            Ok(envelope) => self.ingest(&envelope).await,
            Err(e) => {
                warn!(error = %e, "Malformed webhook envelope");
                Ok(IngestOutcome::ignored("malformed envelope"))
            }
        }
    }

    /// Ingest one parsed envelope.
    #[instrument(skip(self, envelope), fields(webhook_id = %envelope.webhook.id))]
    pub async fn ingest(&self, envelope: &InboundEnvelope) -> WebhookResult<IngestOutcome> {
        // The webhook id must resolve to a live registration.
        let registration = self
            .registrations
            .find_by_reference(&envelope.webhook.id)
            .await?;
        let registration = match registration {
            Some(registration) if registration.is_live() => registration,
            _ => {
                warn!("Event references unknown or deleted webhook");
                return Ok(IngestOutcome::ignored("webhook not found"));
            }
        };

        let valid = match validate_envelope(envelope) {
            Ok(valid) => valid,
            Err(reason) => {
                warn!(reason = %reason, "Structurally invalid envelope");
                return Ok(IngestOutcome::ignored(reason));
            }
        };

        if !registration.subscribes_to(&valid.event) {
            warn!(event = %valid.event, "Event type not subscribed");
            return Ok(IngestOutcome::ignored("event not subscribed"));
        }

        if !self.dedup.observe(&valid.entity_id, &valid.event_time) {
            info!(
                event = %valid.event,
                entity_id = %valid.entity_id,
                "Duplicate delivery inside dedup window"
            );
            return Ok(IngestOutcome::ignored("duplicate delivery"));
        }

        let Ok(kind) = event_kind(&valid.event).parse::<EntityKind>() else {
            warn!(event = %valid.event, "Unroutable event type");
            return Ok(IngestOutcome::ignored("unroutable event type"));
        };
        let Some(strategy) = self.registry.for_kind(kind) else {
            warn!(kind = %kind, "No strategy registered for event kind");
            return Ok(IngestOutcome::ignored("no strategy for event type"));
        };

        let mut remote = match valid.entity {
            Value::Object(attributes) => EntityRecord::new(valid.entity_id.clone(), attributes),
            _ => EntityRecord::new(valid.entity_id.clone(), pipesync_core::Attributes::new()),
        };
        if is_deletion_event(&valid.event) {
            remote.mark_deleted();
        }

        let task_id = self
            .queue
            .enqueue(UnitOfWork::Pull {
                strategy: strategy.name().to_string(),
                remote,
            })
            .await
            .map_err(|e| WebhookError::Queue(e.to_string()))?;

        info!(
            event = %valid.event,
            entity_id = %valid.entity_id,
            task_id = %task_id,
            "Envelope accepted"
        );
        Ok(IngestOutcome::Accepted { task_id })
    }
}

//! Webhook registrations and inbound envelopes.

use chrono::{DateTime, Utc};
use pipesync_core::RegistrationId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Local record of a remote webhook subscription.
///
/// Inbound events are only accepted when they reference a known,
/// non-deleted registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookRegistration {
    /// Registration id.
    pub id: RegistrationId,
    /// The remote-assigned webhook id (`webhook.id` on envelopes).
    pub pl_reference: String,
    /// Delivery target URL registered with the remote system.
    pub url: String,
    /// Subscribed event types.
    pub events: Vec<String>,
    /// Whether certificate validation is disabled for delivery.
    pub insecure_ssl: bool,
    /// Remote application id, when provided.
    pub application_id: Option<String>,
    /// Remote client id, when provided.
    pub client_id: Option<String>,
    /// Soft-deletion flag; deleted registrations reject events.
    pub is_deleted: bool,
    /// Record creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl WebhookRegistration {
    /// Whether the registration accepts events.
    #[must_use]
    pub fn is_live(&self) -> bool {
        !self.is_deleted
    }

    /// Whether the registration subscribes to an event type.
    #[must_use]
    pub fn subscribes_to(&self, event: &str) -> bool {
        self.events.iter().any(|e| e == event)
    }
}

/// Input for creating a registration.
#[derive(Debug, Clone, Deserialize)]
pub struct NewWebhookRegistration {
    /// The remote-assigned webhook id.
    pub pl_reference: String,
    /// Delivery target URL.
    pub url: String,
    /// Subscribed event types.
    pub events: Vec<String>,
    /// Whether certificate validation is disabled.
    #[serde(default)]
    pub insecure_ssl: bool,
    /// Remote application id.
    #[serde(default)]
    pub application_id: Option<String>,
    /// Remote client id.
    #[serde(default)]
    pub client_id: Option<String>,
}

/// The `webhook` block of an inbound envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookBlock {
    /// Remote webhook id; must resolve to a live registration.
    pub id: String,
    /// Whether the remote delivers without certificate validation.
    #[serde(default)]
    pub insecure_ssl: Option<bool>,
    /// Remote-side delivery options, passed through opaque.
    #[serde(default)]
    pub options: Option<Value>,
    /// Delivery URL as the remote sees it.
    #[serde(default)]
    pub url: Option<String>,
    /// Whether the remote considers the webhook deleted.
    #[serde(default)]
    pub is_deleted: bool,
    /// Remote creation timestamp, verbatim.
    #[serde(default)]
    pub created: Option<String>,
    /// Remote modification timestamp, verbatim.
    #[serde(default)]
    pub modified: Option<String>,
    /// Remote application id.
    #[serde(default)]
    pub application_id: Option<String>,
    /// Remote client id.
    #[serde(default)]
    pub client_id: Option<String>,
    /// Event types the remote believes are subscribed.
    #[serde(default)]
    pub events: Vec<String>,
}

/// One inbound delivery envelope.
///
/// Ephemeral: constructed per HTTP delivery and never persisted; the
/// persistence of *effects* happens through the pull work it triggers.
/// Fields beyond the webhook block are optional at the type level so one
/// malformed envelope in a batch is ignored without failing its siblings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEnvelope {
    /// The webhook block.
    pub webhook: WebhookBlock,
    /// Event type, e.g. `"company.update"`.
    #[serde(default)]
    pub event: Option<String>,
    /// Remote event timestamp, verbatim; part of the dedup key.
    #[serde(default)]
    pub event_time: Option<String>,
    /// Remote team space the event originates from.
    #[serde(default)]
    pub team_space_id: Option<String>,
    /// Related entity reference, when the event carries one.
    #[serde(default)]
    pub related_entity: Option<String>,
    /// Raw entity payload; must carry an `id`.
    #[serde(default)]
    pub entity: Option<Value>,
}

impl InboundEnvelope {
    /// The entity id inside the payload, if present.
    #[must_use]
    pub fn entity_id(&self) -> Option<&str> {
        self.entity.as_ref()?.get("id")?.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_registration_subscription_check() {
        let reg = WebhookRegistration {
            id: RegistrationId::new(),
            pl_reference: "WH-1".to_string(),
            url: "https://sync.example.com/webhooks/pipeliner".to_string(),
            events: vec!["company.update".to_string(), "company.delete".to_string()],
            insecure_ssl: false,
            application_id: None,
            client_id: None,
            is_deleted: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(reg.is_live());
        assert!(reg.subscribes_to("company.update"));
        assert!(!reg.subscribes_to("opportunity.update"));
    }

    #[test]
    fn test_envelope_deserializes_full_shape() {
        let envelope: InboundEnvelope = serde_json::from_value(json!({
            "webhook": {
                "id": "WH-1",
                "insecure_ssl": false,
                "options": null,
                "url": "https://sync.example.com/webhooks/pipeliner",
                "is_deleted": false,
                "created": "2024-04-01T10:00:00Z",
                "modified": "2024-04-02T10:00:00Z",
                "application_id": "app-1",
                "client_id": "client-1",
                "events": ["company.update"]
            },
            "event": "company.update",
            "event_time": "2024-04-03T12:00:00Z",
            "team_space_id": "ts-1",
            "related_entity": null,
            "entity": {"id": "PL-9", "name": "Acme"}
        }))
        .unwrap();

        assert_eq!(envelope.webhook.id, "WH-1");
        assert_eq!(envelope.event.as_deref(), Some("company.update"));
        assert_eq!(envelope.entity_id(), Some("PL-9"));
    }

    #[test]
    fn test_envelope_tolerates_missing_optionals() {
        let envelope: InboundEnvelope =
            serde_json::from_value(json!({"webhook": {"id": "WH-1"}})).unwrap();
        assert!(envelope.event.is_none());
        assert!(envelope.entity_id().is_none());
    }
}

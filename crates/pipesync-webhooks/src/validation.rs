//! Structural validation of inbound envelopes.
//!
//! Validation failures are ignore reasons, not errors: the gateway
//! translates them into the Ignored response contract and never raises to
//! the remote caller.

use serde_json::Value;

use crate::models::InboundEnvelope;

/// The validated, owned view of one envelope.
#[derive(Debug, Clone)]
pub struct ValidatedEvent {
    /// Event type.
    pub event: String,
    /// Raw event timestamp; part of the dedup key.
    pub event_time: String,
    /// The payload's entity id.
    pub entity_id: String,
    /// The raw entity payload.
    pub entity: Value,
}

/// Check the required fields of an envelope.
///
/// The webhook id itself is resolved separately against the registration
/// store; this covers everything a structurally complete envelope needs.
pub fn validate_envelope(envelope: &InboundEnvelope) -> Result<ValidatedEvent, String> {
    let event = match envelope.event.as_deref() {
        Some(event) if !event.is_empty() => event.to_string(),
        _ => return Err("missing required field: event".to_string()),
    };
    let event_time = match envelope.event_time.as_deref() {
        Some(time) if !time.is_empty() => time.to_string(),
        _ => return Err("missing required field: event_time".to_string()),
    };
    let entity = match &envelope.entity {
        Some(entity) if entity.is_object() => entity.clone(),
        Some(_) => return Err("entity payload is not an object".to_string()),
        None => return Err("missing required field: entity".to_string()),
    };
    let entity_id = match envelope.entity_id() {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => return Err("missing required field: entity.id".to_string()),
    };
    Ok(ValidatedEvent {
        event,
        event_time,
        entity_id,
        entity,
    })
}

/// The routing key of an event type: the segment before the first `.`
/// (`"company.update"` routes by `"company"`).
#[must_use]
pub fn event_kind(event: &str) -> &str {
    event.split('.').next().unwrap_or(event)
}

/// Whether an event type denotes a deletion.
#[must_use]
pub fn is_deletion_event(event: &str) -> bool {
    matches!(event.rsplit('.').next(), Some("delete" | "deleted"))
}

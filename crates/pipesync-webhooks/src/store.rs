//! Registration storage seam.

use async_trait::async_trait;
use chrono::Utc;
use pipesync_core::RegistrationId;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::{WebhookError, WebhookResult};
use crate::models::{NewWebhookRegistration, WebhookRegistration};

/// Storage for webhook registrations.
#[async_trait]
pub trait RegistrationStore: Send + Sync {
    /// Fetch a registration by its remote webhook id, deleted or not.
    async fn find_by_reference(
        &self,
        pl_reference: &str,
    ) -> WebhookResult<Option<WebhookRegistration>>;

    /// Persist a new registration.
    async fn create(&self, input: NewWebhookRegistration) -> WebhookResult<WebhookRegistration>;

    /// Soft-delete a registration; it stops accepting events but stays
    /// on record.
    async fn soft_delete(&self, id: RegistrationId) -> WebhookResult<WebhookRegistration>;

    /// All registrations, including soft-deleted ones.
    async fn list(&self) -> WebhookResult<Vec<WebhookRegistration>>;
}

/// In-memory registration store.
#[derive(Default)]
pub struct InMemoryRegistrationStore {
    registrations: RwLock<HashMap<RegistrationId, WebhookRegistration>>,
}

impl InMemoryRegistrationStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RegistrationStore for InMemoryRegistrationStore {
    async fn find_by_reference(
        &self,
        pl_reference: &str,
    ) -> WebhookResult<Option<WebhookRegistration>> {
        let registrations = self.registrations.read().await;
        Ok(registrations
            .values()
            .find(|r| r.pl_reference == pl_reference)
            .cloned())
    }

    async fn create(&self, input: NewWebhookRegistration) -> WebhookResult<WebhookRegistration> {
        if input.events.is_empty() {
            return Err(WebhookError::Validation(
                "a registration must subscribe to at least one event type".to_string(),
            ));
        }
        let now = Utc::now();
        let registration = WebhookRegistration {
            id: RegistrationId::new(),
            pl_reference: input.pl_reference,
            url: input.url,
            events: input.events,
            insecure_ssl: input.insecure_ssl,
            application_id: input.application_id,
            client_id: input.client_id,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };
        let mut registrations = self.registrations.write().await;
        registrations.insert(registration.id, registration.clone());
        Ok(registration)
    }

    async fn soft_delete(&self, id: RegistrationId) -> WebhookResult<WebhookRegistration> {
        let mut registrations = self.registrations.write().await;
        let registration = registrations
            .get_mut(&id)
            .ok_or_else(|| WebhookError::NotFound(id.to_string()))?;
        registration.is_deleted = true;
        registration.updated_at = Utc::now();
        Ok(registration.clone())
    }

    async fn list(&self) -> WebhookResult<Vec<WebhookRegistration>> {
        let registrations = self.registrations.read().await;
        let mut all: Vec<WebhookRegistration> = registrations.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(all)
    }
}

//! Postgres-backed registration store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pipesync_core::RegistrationId;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{WebhookError, WebhookResult};
use crate::models::{NewWebhookRegistration, WebhookRegistration};
use crate::store::RegistrationStore;

fn store_err(e: sqlx::Error) -> WebhookError {
    WebhookError::Store(e.to_string())
}

#[derive(Debug, sqlx::FromRow)]
struct RegistrationRow {
    id: Uuid,
    pl_reference: String,
    url: String,
    events: Vec<String>,
    insecure_ssl: bool,
    application_id: Option<String>,
    client_id: Option<String>,
    is_deleted: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RegistrationRow {
    fn into_registration(self) -> WebhookRegistration {
        WebhookRegistration {
            id: RegistrationId::from_uuid(self.id),
            pl_reference: self.pl_reference,
            url: self.url,
            events: self.events,
            insecure_ssl: self.insecure_ssl,
            application_id: self.application_id,
            client_id: self.client_id,
            is_deleted: self.is_deleted,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Postgres registration store.
pub struct PgRegistrationStore {
    pool: PgPool,
}

impl PgRegistrationStore {
    /// Create a store over a connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RegistrationStore for PgRegistrationStore {
    async fn find_by_reference(
        &self,
        pl_reference: &str,
    ) -> WebhookResult<Option<WebhookRegistration>> {
        let row: Option<RegistrationRow> = sqlx::query_as(
            r"
            SELECT id, pl_reference, url, events, insecure_ssl,
                   application_id, client_id, is_deleted, created_at, updated_at
            FROM webhook_registrations
            WHERE pl_reference = $1
            ",
        )
        .bind(pl_reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(row.map(RegistrationRow::into_registration))
    }

    async fn create(&self, input: NewWebhookRegistration) -> WebhookResult<WebhookRegistration> {
        if input.events.is_empty() {
            return Err(WebhookError::Validation(
                "a registration must subscribe to at least one event type".to_string(),
            ));
        }
        let row: RegistrationRow = sqlx::query_as(
            r"
            INSERT INTO webhook_registrations
                (id, pl_reference, url, events, insecure_ssl, application_id, client_id,
                 is_deleted, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, FALSE, NOW(), NOW())
            RETURNING id, pl_reference, url, events, insecure_ssl,
                      application_id, client_id, is_deleted, created_at, updated_at
            ",
        )
        .bind(Uuid::new_v4())
        .bind(&input.pl_reference)
        .bind(&input.url)
        .bind(&input.events)
        .bind(input.insecure_ssl)
        .bind(&input.application_id)
        .bind(&input.client_id)
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(row.into_registration())
    }

    async fn soft_delete(&self, id: RegistrationId) -> WebhookResult<WebhookRegistration> {
        let row: Option<RegistrationRow> = sqlx::query_as(
            r"
            UPDATE webhook_registrations
            SET is_deleted = TRUE, updated_at = NOW()
            WHERE id = $1
            RETURNING id, pl_reference, url, events, insecure_ssl,
                      application_id, client_id, is_deleted, created_at, updated_at
            ",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        row.map(RegistrationRow::into_registration)
            .ok_or_else(|| WebhookError::NotFound(id.to_string()))
    }

    async fn list(&self) -> WebhookResult<Vec<WebhookRegistration>> {
        let rows: Vec<RegistrationRow> = sqlx::query_as(
            r"
            SELECT id, pl_reference, url, events, insecure_ssl,
                   application_id, client_id, is_deleted, created_at, updated_at
            FROM webhook_registrations
            ORDER BY created_at ASC
            ",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(rows.into_iter().map(RegistrationRow::into_registration).collect())
    }
}

#[cfg(test)]
mod tests {
    // Behavior tests require a database; conversion logic is covered here
    // and the store contract behaviorally in `store.rs`.

    use super::*;

    #[test]
    fn test_row_conversion() {
        let row = RegistrationRow {
            id: Uuid::new_v4(),
            pl_reference: "WH-1".to_string(),
            url: "https://sync.example.com/webhooks/pipeliner".to_string(),
            events: vec!["company.update".to_string()],
            insecure_ssl: false,
            application_id: None,
            client_id: None,
            is_deleted: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let registration = row.into_registration();
        assert!(registration.is_live());
        assert!(registration.subscribes_to("company.update"));
    }
}

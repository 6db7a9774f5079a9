//! Postgres-backed stores.
//!
//! Durable implementations of the ledger and aggregate event seams. The
//! archive/restore precondition checks run as single conditional UPDATE
//! statements, so read-then-conditionally-write is atomic per id.
//!
//! Schema lives in `migrations/` at the workspace root.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pipesync_core::{AggregateId, SyncErrorId};
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::events::AggregateSyncEvent;
use crate::ledger::{LedgerFilter, NewSyncError, SyncError, SyncErrorStore};
use crate::store::AggregateEventStore;

fn store_err(e: sqlx::Error) -> EngineError {
    EngineError::Store(e.to_string())
}

#[derive(Debug, sqlx::FromRow)]
struct SyncErrorRow {
    id: Uuid,
    entity_kind: String,
    local_id: Option<String>,
    remote_id: Option<String>,
    detail: String,
    created_at: DateTime<Utc>,
    archived_at: Option<DateTime<Utc>>,
}

impl SyncErrorRow {
    fn into_entry(self) -> EngineResult<SyncError> {
        let entity_kind = self
            .entity_kind
            .parse()
            .map_err(|e| EngineError::Store(format!("corrupt sync error row: {e}")))?;
        Ok(SyncError {
            id: SyncErrorId::from_uuid(self.id),
            entity_kind,
            local_id: self.local_id,
            remote_id: self.remote_id,
            detail: self.detail,
            created_at: self.created_at,
            archived_at: self.archived_at,
        })
    }
}

const SYNC_ERROR_COLUMNS: &str =
    "id, entity_kind, local_id, remote_id, detail, created_at, archived_at";

/// Postgres ledger store.
pub struct PgSyncErrorStore {
    pool: PgPool,
}

impl PgSyncErrorStore {
    /// Create a store over a connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SyncErrorStore for PgSyncErrorStore {
    async fn record(&self, entry: NewSyncError) -> EngineResult<SyncError> {
        let row: SyncErrorRow = sqlx::query_as(
            r"
            INSERT INTO sync_errors (id, entity_kind, local_id, remote_id, detail, created_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            RETURNING id, entity_kind, local_id, remote_id, detail, created_at, archived_at
            ",
        )
        .bind(Uuid::new_v4())
        .bind(entry.entity_kind.as_str())
        .bind(&entry.local_id)
        .bind(&entry.remote_id)
        .bind(&entry.detail)
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;

        row.into_entry()
    }

    async fn get(&self, id: SyncErrorId) -> EngineResult<Option<SyncError>> {
        let row: Option<SyncErrorRow> = sqlx::query_as(
            r"
            SELECT id, entity_kind, local_id, remote_id, detail, created_at, archived_at
            FROM sync_errors
            WHERE id = $1
            ",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        row.map(SyncErrorRow::into_entry).transpose()
    }

    async fn list(&self, filter: &LedgerFilter) -> EngineResult<Vec<SyncError>> {
        let query = match filter.archived {
            None => {
                r"
                SELECT id, entity_kind, local_id, remote_id, detail, created_at, archived_at
                FROM sync_errors
                ORDER BY created_at DESC
                LIMIT $1 OFFSET $2
                "
            }
            Some(true) => {
                r"
                SELECT id, entity_kind, local_id, remote_id, detail, created_at, archived_at
                FROM sync_errors
                WHERE archived_at IS NOT NULL
                ORDER BY created_at DESC
                LIMIT $1 OFFSET $2
                "
            }
            Some(false) => {
                r"
                SELECT id, entity_kind, local_id, remote_id, detail, created_at, archived_at
                FROM sync_errors
                WHERE archived_at IS NULL
                ORDER BY created_at DESC
                LIMIT $1 OFFSET $2
                "
            }
        };
        let rows: Vec<SyncErrorRow> = sqlx::query_as(query)
            .bind(filter.effective_limit())
            .bind(filter.effective_offset())
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;

        rows.into_iter().map(SyncErrorRow::into_entry).collect()
    }

    async fn archive(&self, id: SyncErrorId) -> EngineResult<SyncError> {
        // Single conditional statement: the precondition check and the
        // write cannot interleave with a concurrent transition.
        let row: Option<SyncErrorRow> = sqlx::query_as(
            r"
            UPDATE sync_errors
            SET archived_at = NOW()
            WHERE id = $1 AND archived_at IS NULL
            RETURNING id, entity_kind, local_id, remote_id, detail, created_at, archived_at
            ",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        match row {
            Some(row) => row.into_entry(),
            None => match self.get(id).await? {
                Some(_) => Err(EngineError::LedgerAlreadyArchived { id }),
                None => Err(EngineError::LedgerNotFound { id }),
            },
        }
    }

    async fn restore(&self, id: SyncErrorId) -> EngineResult<SyncError> {
        let row: Option<SyncErrorRow> = sqlx::query_as(
            r"
            UPDATE sync_errors
            SET archived_at = NULL
            WHERE id = $1 AND archived_at IS NOT NULL
            RETURNING id, entity_kind, local_id, remote_id, detail, created_at, archived_at
            ",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        match row {
            Some(row) => row.into_entry(),
            None => match self.get(id).await? {
                Some(_) => Err(EngineError::LedgerNotArchived { id }),
                None => Err(EngineError::LedgerNotFound { id }),
            },
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AggregateEventRow {
    id: Uuid,
    occurred_at: DateTime<Utc>,
    aggregate_id: Uuid,
    success: bool,
    processed_counts: serde_json::Value,
    skipped_counts: serde_json::Value,
}

impl AggregateEventRow {
    fn into_event(self) -> AggregateSyncEvent {
        let processed_counts: HashMap<String, u64> =
            serde_json::from_value(self.processed_counts).unwrap_or_default();
        let skipped_counts: HashMap<String, u64> =
            serde_json::from_value(self.skipped_counts).unwrap_or_default();
        AggregateSyncEvent {
            id: self.id,
            occurred_at: self.occurred_at,
            aggregate_id: AggregateId::from_uuid(self.aggregate_id),
            success: self.success,
            processed_counts,
            skipped_counts,
        }
    }
}

/// Postgres aggregate event log.
pub struct PgAggregateEventStore {
    pool: PgPool,
}

impl PgAggregateEventStore {
    /// Create a store over a connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AggregateEventStore for PgAggregateEventStore {
    async fn append(&self, event: &AggregateSyncEvent) -> EngineResult<()> {
        let processed = serde_json::to_value(&event.processed_counts)
            .map_err(|e| EngineError::Serialization(e.to_string()))?;
        let skipped = serde_json::to_value(&event.skipped_counts)
            .map_err(|e| EngineError::Serialization(e.to_string()))?;

        sqlx::query(
            r"
            INSERT INTO aggregate_sync_events
                (id, occurred_at, aggregate_id, success, processed_counts, skipped_counts)
            VALUES ($1, $2, $3, $4, $5, $6)
            ",
        )
        .bind(event.id)
        .bind(event.occurred_at)
        .bind(event.aggregate_id.as_uuid())
        .bind(event.success)
        .bind(&processed)
        .bind(&skipped)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(())
    }

    async fn latest_for(
        &self,
        aggregate_id: AggregateId,
    ) -> EngineResult<Option<AggregateSyncEvent>> {
        let row: Option<AggregateEventRow> = sqlx::query_as(
            r"
            SELECT id, occurred_at, aggregate_id, success, processed_counts, skipped_counts
            FROM aggregate_sync_events
            WHERE aggregate_id = $1
            ORDER BY occurred_at DESC
            LIMIT 1
            ",
        )
        .bind(aggregate_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(row.map(AggregateEventRow::into_event))
    }
}

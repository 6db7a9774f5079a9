//! Local record and aggregate event store seams.
//!
//! Persistence of business records is a collaborator concern; the engine
//! only needs the handful of operations a sync pass performs. The
//! in-memory implementations back tests and embedded deployments; the
//! Postgres implementations live in [`crate::postgres`].

use async_trait::async_trait;
use pipesync_core::{AggregateId, EntityKind, EntityRecord};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::{EngineError, EngineResult};
use crate::events::AggregateSyncEvent;

/// Access to locally persisted business records.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Fetch a record by local id.
    async fn get(&self, kind: EntityKind, id: &str) -> EngineResult<Option<EntityRecord>>;

    /// Fetch the record carrying the given remote reference.
    async fn find_by_reference(
        &self,
        kind: EntityKind,
        reference: &str,
    ) -> EngineResult<Option<EntityRecord>>;

    /// All records of a kind. Used for heuristic pull correlation.
    async fn list(&self, kind: EntityKind) -> EngineResult<Vec<EntityRecord>>;

    /// Records touched since the last successful sync of this kind.
    ///
    /// This is the push entity set; the store owns the definition of
    /// "touched" (watermark, dirty flag, change table).
    async fn changed_since_last_sync(&self, kind: EntityKind) -> EngineResult<Vec<EntityRecord>>;

    /// Write a record as a sync effect (create or update).
    async fn upsert(&self, kind: EntityKind, record: EntityRecord) -> EngineResult<()>;

    /// Persist a newly learned remote reference on a record.
    async fn set_reference(&self, kind: EntityKind, id: &str, reference: &str) -> EngineResult<()>;

    /// Soft-delete a record, preserving it for audit.
    async fn mark_deleted(&self, kind: EntityKind, id: &str) -> EngineResult<()>;

    /// Clear a record's pending-sync state after a successful push.
    ///
    /// Records whose push failed are deliberately left pending so the next
    /// run retries them.
    async fn mark_synced(&self, kind: EntityKind, id: &str) -> EngineResult<()>;
}

/// Append-only log of terminal orchestration events.
#[async_trait]
pub trait AggregateEventStore: Send + Sync {
    /// Persist a terminal event.
    async fn append(&self, event: &AggregateSyncEvent) -> EngineResult<()>;

    /// Most recent event for an aggregate id.
    async fn latest_for(
        &self,
        aggregate_id: AggregateId,
    ) -> EngineResult<Option<AggregateSyncEvent>>;
}

struct StoredRecord {
    record: EntityRecord,
    pending_sync: bool,
}

/// In-memory local store.
#[derive(Default)]
pub struct InMemoryLocalStore {
    records: RwLock<HashMap<(EntityKind, String), StoredRecord>>,
}

impl InMemoryLocalStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record as a user edit would: stored and pending sync.
    pub async fn insert_changed(&self, kind: EntityKind, record: EntityRecord) {
        let mut records = self.records.write().await;
        records.insert(
            (kind, record.id.clone()),
            StoredRecord {
                record,
                pending_sync: true,
            },
        );
    }

    /// Whether a record is still pending sync. Test inspection helper.
    pub async fn is_pending(&self, kind: EntityKind, id: &str) -> bool {
        let records = self.records.read().await;
        records
            .get(&(kind, id.to_string()))
            .is_some_and(|s| s.pending_sync)
    }
}

#[async_trait]
impl LocalStore for InMemoryLocalStore {
    async fn get(&self, kind: EntityKind, id: &str) -> EngineResult<Option<EntityRecord>> {
        let records = self.records.read().await;
        Ok(records.get(&(kind, id.to_string())).map(|s| s.record.clone()))
    }

    async fn find_by_reference(
        &self,
        kind: EntityKind,
        reference: &str,
    ) -> EngineResult<Option<EntityRecord>> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|(_, s)| &s.record)
            .find(|r| r.pl_reference() == Some(reference))
            .cloned())
    }

    async fn list(&self, kind: EntityKind) -> EngineResult<Vec<EntityRecord>> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|(_, s)| s.record.clone())
            .collect())
    }

    async fn changed_since_last_sync(&self, kind: EntityKind) -> EngineResult<Vec<EntityRecord>> {
        let records = self.records.read().await;
        let mut changed: Vec<EntityRecord> = records
            .iter()
            .filter(|((k, _), s)| *k == kind && s.pending_sync)
            .map(|(_, s)| s.record.clone())
            .collect();
        // Deterministic iteration order for orchestration runs.
        changed.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(changed)
    }

    async fn upsert(&self, kind: EntityKind, record: EntityRecord) -> EngineResult<()> {
        let mut records = self.records.write().await;
        let entry = records
            .entry((kind, record.id.clone()))
            .or_insert(StoredRecord {
                record: record.clone(),
                pending_sync: false,
            });
        entry.record = record;
        Ok(())
    }

    async fn set_reference(&self, kind: EntityKind, id: &str, reference: &str) -> EngineResult<()> {
        let mut records = self.records.write().await;
        let entry = records
            .get_mut(&(kind, id.to_string()))
            .ok_or_else(|| EngineError::Store(format!("no local {kind} with id {id}")))?;
        entry.record.set_pl_reference(reference);
        Ok(())
    }

    async fn mark_deleted(&self, kind: EntityKind, id: &str) -> EngineResult<()> {
        let mut records = self.records.write().await;
        let entry = records
            .get_mut(&(kind, id.to_string()))
            .ok_or_else(|| EngineError::Store(format!("no local {kind} with id {id}")))?;
        entry.record.mark_deleted();
        Ok(())
    }

    async fn mark_synced(&self, kind: EntityKind, id: &str) -> EngineResult<()> {
        let mut records = self.records.write().await;
        if let Some(entry) = records.get_mut(&(kind, id.to_string())) {
            entry.pending_sync = false;
        }
        Ok(())
    }
}

/// In-memory aggregate event log.
#[derive(Default)]
pub struct InMemoryAggregateEventStore {
    events: RwLock<Vec<AggregateSyncEvent>>,
}

impl InMemoryAggregateEventStore {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored events. Test inspection helper.
    pub async fn all(&self) -> Vec<AggregateSyncEvent> {
        self.events.read().await.clone()
    }
}

#[async_trait]
impl AggregateEventStore for InMemoryAggregateEventStore {
    async fn append(&self, event: &AggregateSyncEvent) -> EngineResult<()> {
        let mut events = self.events.write().await;
        events.push(event.clone());
        Ok(())
    }

    async fn latest_for(
        &self,
        aggregate_id: AggregateId,
    ) -> EngineResult<Option<AggregateSyncEvent>> {
        let events = self.events.read().await;
        Ok(events
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .max_by_key(|e| e.occurred_at)
            .cloned())
    }
}

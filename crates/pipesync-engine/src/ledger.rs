//! Sync error ledger.
//!
//! Durable record of failed correlation/strategy attempts, kept for
//! operator triage. Entries are advisory: a failed entity stays eligible
//! for correlation retry on the next run. Archive and restore are guarded
//! state transitions, not silent no-ops.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pipesync_core::{EntityKind, SyncErrorId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::instrument;

use crate::error::{EngineError, EngineResult};

/// A persisted sync failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncError {
    /// Entry id.
    pub id: SyncErrorId,
    /// Kind of the entity that failed.
    pub entity_kind: EntityKind,
    /// Local record id, when known.
    pub local_id: Option<String>,
    /// Remote record id, when known.
    pub remote_id: Option<String>,
    /// Error detail.
    pub detail: String,
    /// When the failure was recorded.
    pub created_at: DateTime<Utc>,
    /// Set while the entry is archived.
    pub archived_at: Option<DateTime<Utc>>,
}

impl SyncError {
    /// Whether the entry is currently archived.
    #[must_use]
    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }
}

/// Input for recording a new failure.
#[derive(Debug, Clone)]
pub struct NewSyncError {
    /// Kind of the entity that failed.
    pub entity_kind: EntityKind,
    /// Local record id, when known.
    pub local_id: Option<String>,
    /// Remote record id, when known.
    pub remote_id: Option<String>,
    /// Error detail.
    pub detail: String,
}

impl NewSyncError {
    /// Build a failure record for one entity.
    #[must_use]
    pub fn new(
        entity_kind: EntityKind,
        local_id: Option<String>,
        remote_id: Option<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            entity_kind,
            local_id,
            remote_id,
            detail: detail.into(),
        }
    }
}

/// Listing filter.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LedgerFilter {
    /// When set, only archived (`true`) or only active (`false`) entries.
    pub archived: Option<bool>,
    /// Maximum entries returned (default 50, clamped to 1..=200).
    pub limit: Option<i64>,
    /// Offset for pagination.
    pub offset: Option<i64>,
}

impl LedgerFilter {
    /// Effective limit.
    #[must_use]
    pub fn effective_limit(&self) -> i64 {
        self.limit.unwrap_or(50).clamp(1, 200)
    }

    /// Effective offset.
    #[must_use]
    pub fn effective_offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

/// Storage seam for the ledger.
///
/// `archive`/`restore` must perform the precondition check and the write
/// atomically per id.
#[async_trait]
pub trait SyncErrorStore: Send + Sync {
    /// Persist a new failure.
    async fn record(&self, entry: NewSyncError) -> EngineResult<SyncError>;

    /// Fetch an entry.
    async fn get(&self, id: SyncErrorId) -> EngineResult<Option<SyncError>>;

    /// List entries, newest first.
    async fn list(&self, filter: &LedgerFilter) -> EngineResult<Vec<SyncError>>;

    /// Archive an active entry.
    ///
    /// Fails with `LedgerNotFound` or `LedgerAlreadyArchived` without
    /// mutating state.
    async fn archive(&self, id: SyncErrorId) -> EngineResult<SyncError>;

    /// Restore an archived entry.
    ///
    /// Fails with `LedgerNotFound` or `LedgerNotArchived` without mutating
    /// state.
    async fn restore(&self, id: SyncErrorId) -> EngineResult<SyncError>;
}

/// Per-item outcome of a batch archive/restore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutcome {
    /// The entry id.
    pub id: SyncErrorId,
    /// Whether the transition succeeded.
    pub success: bool,
    /// Error detail when it did not.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Report of a batch archive/restore.
///
/// Batches are not atomic: a failing item does not roll back the
/// successful items before or after it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    /// Items that transitioned.
    pub succeeded: usize,
    /// Items that failed their precondition or did not exist.
    pub failed: usize,
    /// Per-item outcomes, in request order.
    pub items: Vec<BatchOutcome>,
}

/// Operator-facing ledger service wrapping a [`SyncErrorStore`].
pub struct SyncErrorLedger {
    store: Arc<dyn SyncErrorStore>,
}

impl SyncErrorLedger {
    /// Create the service.
    #[must_use]
    pub fn new(store: Arc<dyn SyncErrorStore>) -> Self {
        Self { store }
    }

    /// Record a failure.
    pub async fn record(&self, entry: NewSyncError) -> EngineResult<SyncError> {
        self.store.record(entry).await
    }

    /// Fetch one entry.
    pub async fn get(&self, id: SyncErrorId) -> EngineResult<Option<SyncError>> {
        self.store.get(id).await
    }

    /// List entries.
    pub async fn list(&self, filter: &LedgerFilter) -> EngineResult<Vec<SyncError>> {
        self.store.list(filter).await
    }

    /// Archive one entry.
    #[instrument(skip(self))]
    pub async fn archive(&self, id: SyncErrorId) -> EngineResult<SyncError> {
        self.store.archive(id).await
    }

    /// Restore one entry.
    #[instrument(skip(self))]
    pub async fn restore(&self, id: SyncErrorId) -> EngineResult<SyncError> {
        self.store.restore(id).await
    }

    /// Archive a batch, independently per id.
    pub async fn archive_batch(&self, ids: &[SyncErrorId]) -> BatchReport {
        self.batch(ids, true).await
    }

    /// Restore a batch, independently per id.
    pub async fn restore_batch(&self, ids: &[SyncErrorId]) -> BatchReport {
        self.batch(ids, false).await
    }

    async fn batch(&self, ids: &[SyncErrorId], archive: bool) -> BatchReport {
        let mut items = Vec::with_capacity(ids.len());
        let mut succeeded = 0;
        let mut failed = 0;
        for &id in ids {
            let result = if archive {
                self.store.archive(id).await
            } else {
                self.store.restore(id).await
            };
            match result {
                Ok(_) => {
                    succeeded += 1;
                    items.push(BatchOutcome {
                        id,
                        success: true,
                        error: None,
                    });
                }
                Err(e) => {
                    failed += 1;
                    items.push(BatchOutcome {
                        id,
                        success: false,
                        error: Some(e.to_string()),
                    });
                }
            }
        }
        BatchReport {
            succeeded,
            failed,
            items,
        }
    }
}

/// In-memory ledger store.
#[derive(Default)]
pub struct InMemorySyncErrorStore {
    entries: RwLock<HashMap<SyncErrorId, SyncError>>,
}

impl InMemorySyncErrorStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries. Test inspection helper.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the store is empty. Test inspection helper.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl SyncErrorStore for InMemorySyncErrorStore {
    async fn record(&self, entry: NewSyncError) -> EngineResult<SyncError> {
        let error = SyncError {
            id: SyncErrorId::new(),
            entity_kind: entry.entity_kind,
            local_id: entry.local_id,
            remote_id: entry.remote_id,
            detail: entry.detail,
            created_at: Utc::now(),
            archived_at: None,
        };
        let mut entries = self.entries.write().await;
        entries.insert(error.id, error.clone());
        Ok(error)
    }

    async fn get(&self, id: SyncErrorId) -> EngineResult<Option<SyncError>> {
        let entries = self.entries.read().await;
        Ok(entries.get(&id).cloned())
    }

    async fn list(&self, filter: &LedgerFilter) -> EngineResult<Vec<SyncError>> {
        let entries = self.entries.read().await;
        let mut matching: Vec<SyncError> = entries
            .values()
            .filter(|e| match filter.archived {
                Some(archived) => e.is_archived() == archived,
                None => true,
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching
            .into_iter()
            .skip(filter.effective_offset() as usize)
            .take(filter.effective_limit() as usize)
            .collect())
    }

    async fn archive(&self, id: SyncErrorId) -> EngineResult<SyncError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(&id)
            .ok_or(EngineError::LedgerNotFound { id })?;
        if entry.is_archived() {
            return Err(EngineError::LedgerAlreadyArchived { id });
        }
        entry.archived_at = Some(Utc::now());
        Ok(entry.clone())
    }

    async fn restore(&self, id: SyncErrorId) -> EngineResult<SyncError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(&id)
            .ok_or(EngineError::LedgerNotFound { id })?;
        if !entry.is_archived() {
            return Err(EngineError::LedgerNotArchived { id });
        }
        entry.archived_at = None;
        Ok(entry.clone())
    }
}

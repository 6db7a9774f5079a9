//! Named, parameterized mutual exclusion.
//!
//! Every mutation of a synchronized entity (user-facing CRUD, an
//! orchestrated push, or a webhook-triggered pull) acquires the lock for
//! `(operation, entity_id)` through the same [`LockManager`], so work on
//! the same logical entity is strictly ordered and never interleaved.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use pipesync_core::EntityKind;

/// The finite set of mutations serialized per entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOperation {
    CreateQuote,
    UpdateQuote,
    DeleteQuote,
    CreateContract,
    UpdateContract,
    DeleteContract,
    CreateUser,
    UpdateUser,
    DeleteUser,
    CreateOpportunity,
    UpdateOpportunity,
    DeleteOpportunity,
    CreateCompany,
    UpdateCompany,
    DeleteCompany,
    CreateSalesOrder,
    UpdateSalesOrder,
    DeleteSalesOrder,
    CreateImportableColumn,
    UpdateImportableColumn,
    DeleteImportableColumn,
    CreateSalesUnit,
    UpdateSalesUnit,
    DeleteSalesUnit,
    CreateNote,
    UpdateNote,
    DeleteNote,
    CreateAppointment,
    UpdateAppointment,
    DeleteAppointment,
    CreateTask,
    UpdateTask,
    DeleteTask,
    /// Guard against two concurrent orchestration runs for one aggregate.
    RunAggregateSync,
}

impl SyncOperation {
    /// snake_case name of the operation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOperation::CreateQuote => "create_quote",
            SyncOperation::UpdateQuote => "update_quote",
            SyncOperation::DeleteQuote => "delete_quote",
            SyncOperation::CreateContract => "create_contract",
            SyncOperation::UpdateContract => "update_contract",
            SyncOperation::DeleteContract => "delete_contract",
            SyncOperation::CreateUser => "create_user",
            SyncOperation::UpdateUser => "update_user",
            SyncOperation::DeleteUser => "delete_user",
            SyncOperation::CreateOpportunity => "create_opportunity",
            SyncOperation::UpdateOpportunity => "update_opportunity",
            SyncOperation::DeleteOpportunity => "delete_opportunity",
            SyncOperation::CreateCompany => "create_company",
            SyncOperation::UpdateCompany => "update_company",
            SyncOperation::DeleteCompany => "delete_company",
            SyncOperation::CreateSalesOrder => "create_sales_order",
            SyncOperation::UpdateSalesOrder => "update_sales_order",
            SyncOperation::DeleteSalesOrder => "delete_sales_order",
            SyncOperation::CreateImportableColumn => "create_importable_column",
            SyncOperation::UpdateImportableColumn => "update_importable_column",
            SyncOperation::DeleteImportableColumn => "delete_importable_column",
            SyncOperation::CreateSalesUnit => "create_sales_unit",
            SyncOperation::UpdateSalesUnit => "update_sales_unit",
            SyncOperation::DeleteSalesUnit => "delete_sales_unit",
            SyncOperation::CreateNote => "create_note",
            SyncOperation::UpdateNote => "update_note",
            SyncOperation::DeleteNote => "delete_note",
            SyncOperation::CreateAppointment => "create_appointment",
            SyncOperation::UpdateAppointment => "update_appointment",
            SyncOperation::DeleteAppointment => "delete_appointment",
            SyncOperation::CreateTask => "create_task",
            SyncOperation::UpdateTask => "update_task",
            SyncOperation::DeleteTask => "delete_task",
            SyncOperation::RunAggregateSync => "run_aggregate_sync",
        }
    }

    /// The serialization class a sync pass uses for a given kind.
    ///
    /// A sync pass mutates the same record a user edit does, so it must
    /// contend on the same operation class as ordinary updates.
    #[must_use]
    pub fn update_of(kind: EntityKind) -> SyncOperation {
        match kind {
            EntityKind::Opportunity => SyncOperation::UpdateOpportunity,
            EntityKind::Company => SyncOperation::UpdateCompany,
            EntityKind::SalesUnit => SyncOperation::UpdateSalesUnit,
            EntityKind::Note => SyncOperation::UpdateNote,
            EntityKind::Appointment => SyncOperation::UpdateAppointment,
            EntityKind::Task => SyncOperation::UpdateTask,
            EntityKind::User => SyncOperation::UpdateUser,
        }
    }
}

impl Display for SyncOperation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Key identifying one guarded logical entity.
///
/// Equality of the two fields is the contract; the rendered
/// `"<operation>:<entity_id>"` form is a logging convenience and is never
/// parsed back into a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SyncLockKey {
    /// The serialized operation class.
    pub operation: SyncOperation,
    /// The entity id as addressed by the caller.
    pub entity_id: String,
}

impl SyncLockKey {
    /// Create a lock key.
    #[must_use]
    pub fn new(operation: SyncOperation, entity_id: impl Into<String>) -> Self {
        Self {
            operation,
            entity_id: entity_id.into(),
        }
    }
}

impl Display for SyncLockKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.operation, self.entity_id)
    }
}

/// Lock acquisition errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LockError {
    /// The block timeout elapsed without acquiring the lock.
    #[error("Timed out waiting for lock {key}")]
    Timeout {
        /// The contended key.
        key: SyncLockKey,
    },
}

/// Lock manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Maximum lease duration before a held lock is considered abandoned
    /// and reclaimable (seconds).
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// How long an acquirer blocks waiting for a contended key (seconds).
    #[serde(default = "default_block_secs")]
    pub block_secs: u64,
    /// Poll interval while waiting for a contended key (milliseconds).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_ttl_secs() -> u64 {
    300
}

fn default_block_secs() -> u64 {
    10
}

fn default_poll_interval_ms() -> u64 {
    25
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            block_secs: default_block_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl LockConfig {
    /// Default lease duration.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Default block duration.
    #[must_use]
    pub fn block(&self) -> Duration {
        Duration::from_secs(self.block_secs)
    }

    /// Poll interval.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

struct LockEntry {
    token: u64,
    expires_at: Instant,
}

/// In-process async lock table keyed by [`SyncLockKey`].
///
/// Locks are leases: a holder that never releases (crash, cancelled
/// future) loses the lease after `ttl` and the key becomes reclaimable.
/// Release is generation-checked so a holder whose lease expired cannot
/// release the reclaimer's lease.
///
/// Reentrancy is not supported: re-acquiring a held key from the same
/// task blocks until the block timeout and then fails.
pub struct LockManager {
    config: LockConfig,
    table: Mutex<HashMap<SyncLockKey, LockEntry>>,
    next_token: AtomicU64,
}

impl LockManager {
    /// Create a lock manager with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(LockConfig::default())
    }

    /// Create a lock manager with custom configuration.
    #[must_use]
    pub fn with_config(config: LockConfig) -> Self {
        Self {
            config,
            table: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
        }
    }

    /// Run `f` while holding the lock for `key`, using the configured
    /// lease and block durations.
    pub async fn with_lock<T, F, Fut>(&self, key: SyncLockKey, f: F) -> Result<T, LockError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.with_lock_timeout(key, self.config.ttl(), self.config.block(), f)
            .await
    }

    /// Run `f` while holding the lock for `key` with explicit lease (`ttl`)
    /// and wait (`block`) durations.
    ///
    /// Fails with [`LockError::Timeout`] when `block` elapses without the
    /// key becoming available. A `block` of zero attempts acquisition
    /// exactly once.
    pub async fn with_lock_timeout<T, F, Fut>(
        &self,
        key: SyncLockKey,
        ttl: Duration,
        block: Duration,
        f: F,
    ) -> Result<T, LockError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let token = self.acquire(&key, ttl, block).await?;
        debug!(key = %key, token, "Acquired sync lock");
        let result = f().await;
        self.release(&key, token).await;
        debug!(key = %key, token, "Released sync lock");
        Ok(result)
    }

    async fn acquire(&self, key: &SyncLockKey, ttl: Duration, block: Duration) -> Result<u64, LockError> {
        let deadline = Instant::now() + block;
        loop {
            let now = Instant::now();
            {
                let mut table = self.table.lock().await;
                let held = match table.get(key) {
                    Some(entry) if entry.expires_at > now => true,
                    Some(_) => {
                        warn!(key = %key, "Reclaiming expired sync lock lease");
                        false
                    }
                    None => false,
                };
                if !held {
                    let token = self.next_token.fetch_add(1, Ordering::Relaxed);
                    table.insert(
                        key.clone(),
                        LockEntry {
                            token,
                            expires_at: now + ttl,
                        },
                    );
                    return Ok(token);
                }
            }
            if Instant::now() >= deadline {
                return Err(LockError::Timeout { key: key.clone() });
            }
            let wait = self
                .config
                .poll_interval()
                .min(deadline.saturating_duration_since(Instant::now()));
            tokio::time::sleep(wait).await;
        }
    }

    async fn release(&self, key: &SyncLockKey, token: u64) {
        let mut table = self.table.lock().await;
        if let Some(entry) = table.get(key) {
            if entry.token == token {
                table.remove(key);
            }
        }
    }

    /// Number of currently held (non-expired) leases. Diagnostic only.
    pub async fn held_count(&self) -> usize {
        let now = Instant::now();
        let table = self.table.lock().await;
        table.values().filter(|e| e.expires_at > now).count()
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_equality_is_field_equality() {
        let a = SyncLockKey::new(SyncOperation::UpdateCompany, "42");
        let b = SyncLockKey::new(SyncOperation::UpdateCompany, "42");
        let c = SyncLockKey::new(SyncOperation::DeleteCompany, "42");
        let d = SyncLockKey::new(SyncOperation::UpdateCompany, "43");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn test_key_rendering() {
        let key = SyncLockKey::new(SyncOperation::CreateQuote, "q-7");
        assert_eq!(key.to_string(), "create_quote:q-7");
    }

    #[test]
    fn test_update_of_covers_every_kind() {
        for kind in EntityKind::all() {
            let op = SyncOperation::update_of(kind);
            assert!(op.as_str().starts_with("update_"));
        }
    }

    #[tokio::test]
    async fn test_uncontended_acquire() {
        let locks = LockManager::new();
        let key = SyncLockKey::new(SyncOperation::UpdateCompany, "1");
        let out = locks.with_lock(key, || async { 7 }).await.unwrap();
        assert_eq!(out, 7);
        assert_eq!(locks.held_count().await, 0);
    }

    #[tokio::test]
    async fn test_contended_acquire_times_out() {
        let locks = std::sync::Arc::new(LockManager::new());
        let key = SyncLockKey::new(SyncOperation::UpdateCompany, "1");

        let inner = locks.clone();
        let inner_key = key.clone();
        let holder = tokio::spawn(async move {
            inner
                .with_lock(inner_key, || async {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                })
                .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let result = locks
            .with_lock_timeout(
                key,
                Duration::from_secs(5),
                Duration::from_millis(50),
                || async { 1 },
            )
            .await;
        assert!(matches!(result, Err(LockError::Timeout { .. })));
        holder.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_expired_lease_is_reclaimed() {
        let locks = std::sync::Arc::new(LockManager::new());
        let key = SyncLockKey::new(SyncOperation::UpdateTask, "t-1");

        // Holder whose critical section outlives its own lease.
        let inner = locks.clone();
        let inner_key = key.clone();
        let holder = tokio::spawn(async move {
            inner
                .with_lock_timeout(
                    inner_key,
                    Duration::from_millis(50),
                    Duration::from_millis(10),
                    || async {
                        tokio::time::sleep(Duration::from_millis(400)).await;
                    },
                )
                .await
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        let reclaimed = locks
            .with_lock_timeout(
                key.clone(),
                Duration::from_secs(5),
                Duration::from_millis(500),
                || async { true },
            )
            .await
            .unwrap();
        assert!(reclaimed);

        // The original holder's release must not evict the reclaimer's or
        // any later lease; its generation token no longer matches.
        holder.await.unwrap().unwrap();
        assert_eq!(locks.held_count().await, 0);
    }

    #[tokio::test]
    async fn test_different_keys_do_not_contend() {
        let locks = std::sync::Arc::new(LockManager::new());
        let a = SyncLockKey::new(SyncOperation::UpdateCompany, "1");
        let b = SyncLockKey::new(SyncOperation::UpdateCompany, "2");

        let inner = locks.clone();
        let guard = tokio::spawn(async move {
            inner
                .with_lock(a, || async {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                })
                .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        let started = Instant::now();
        locks.with_lock(b, || async {}).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(150));
        guard.await.unwrap().unwrap();
    }
}

//! Task queue and worker pool.
//!
//! Webhook-triggered pulls (and any other deferred sync work) are
//! enqueued as explicit units of work and consumed by a worker pool.
//! Whatever executes a dequeued unit honors the lock manager contract, so
//! queued work against an entity never overlaps an orchestrated push or a
//! live edit of the same entity.

use pipesync_core::{EntityRecord, TaskId};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tracing::{debug, error, info, instrument, warn};

use crate::error::{EngineError, EngineResult, RemoteError};
use crate::ledger::{NewSyncError, SyncErrorLedger};
use crate::lock::{LockManager, SyncLockKey, SyncOperation};
use crate::strategy::{StrategyRegistry, SyncStrategy};

/// One deferred strategy invocation.
#[derive(Debug, Clone)]
pub enum UnitOfWork {
    /// Apply a remote record locally.
    Pull {
        /// Strategy registry name.
        strategy: String,
        /// The remote record to apply.
        remote: EntityRecord,
    },
    /// Push a local record to the remote system.
    Push {
        /// Strategy registry name.
        strategy: String,
        /// The local record to push.
        local: EntityRecord,
    },
}

impl UnitOfWork {
    /// The strategy this work belongs to.
    #[must_use]
    pub fn strategy_name(&self) -> &str {
        match self {
            UnitOfWork::Pull { strategy, .. } | UnitOfWork::Push { strategy, .. } => strategy,
        }
    }

    /// The entity id the work addresses, as seen by the initiating side.
    #[must_use]
    pub fn entity_id(&self) -> &str {
        match self {
            UnitOfWork::Pull { remote, .. } => &remote.id,
            UnitOfWork::Push { local, .. } => &local.id,
        }
    }
}

/// A queued unit of work with its retry state.
#[derive(Debug, Clone)]
pub struct QueuedTask {
    /// Handle returned to the enqueuer.
    pub id: TaskId,
    /// The work itself.
    pub work: UnitOfWork,
    /// Zero-based attempt counter.
    pub attempt: u32,
}

/// Sending half of the task queue.
#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::Sender<QueuedTask>,
}

/// Receiving half, owned by the worker.
pub struct TaskReceiver {
    rx: Mutex<mpsc::Receiver<QueuedTask>>,
}

impl TaskQueue {
    /// Create a bounded queue, returning the enqueue handle and the
    /// receiver to hand to a worker.
    #[must_use]
    pub fn new(capacity: usize) -> (TaskQueue, TaskReceiver) {
        let (tx, rx) = mpsc::channel(capacity);
        (TaskQueue { tx }, TaskReceiver { rx: Mutex::new(rx) })
    }

    /// Enqueue a unit of work, returning its task handle.
    pub async fn enqueue(&self, work: UnitOfWork) -> EngineResult<TaskId> {
        let id = TaskId::new();
        let task = QueuedTask {
            id,
            work,
            attempt: 0,
        };
        self.tx
            .send(task)
            .await
            .map_err(|_| EngineError::Store("task queue is closed".to_string()))?;
        Ok(id)
    }

    async fn requeue(&self, task: QueuedTask) -> EngineResult<()> {
        self.tx
            .send(task)
            .await
            .map_err(|_| EngineError::Store("task queue is closed".to_string()))
    }
}

/// Worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of units processed concurrently.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Receive poll interval while idle (milliseconds).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Maximum retries for transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base backoff before a retry (milliseconds); doubles per attempt.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_concurrency() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            poll_interval_ms: default_poll_interval_ms(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

/// Worker pool consuming the task queue.
pub struct SyncWorker {
    registry: Arc<StrategyRegistry>,
    locks: Arc<LockManager>,
    ledger: Arc<SyncErrorLedger>,
    queue: TaskQueue,
    receiver: TaskReceiver,
    config: WorkerConfig,
    shutdown: Arc<AtomicBool>,
}

impl SyncWorker {
    /// Create a worker.
    #[must_use]
    pub fn new(
        registry: Arc<StrategyRegistry>,
        locks: Arc<LockManager>,
        ledger: Arc<SyncErrorLedger>,
        queue: TaskQueue,
        receiver: TaskReceiver,
        config: WorkerConfig,
    ) -> Self {
        Self {
            registry,
            locks,
            ledger,
            queue,
            receiver,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request graceful shutdown; in-flight units run to completion.
    pub fn shutdown(&self) {
        info!("Sync worker shutdown requested");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Whether shutdown was requested.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Run the consume loop until shutdown or queue closure.
    #[instrument(skip(self))]
    pub async fn run(&self) {
        info!(
            concurrency = self.config.concurrency,
            "Starting sync worker"
        );
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let poll = Duration::from_millis(self.config.poll_interval_ms);

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                info!("Worker shutdown requested, stopping consume loop");
                break;
            }
            let next = {
                let mut rx = self.receiver.rx.lock().await;
                tokio::time::timeout(poll, rx.recv()).await
            };
            match next {
                Ok(Some(task)) => {
                    let permit = match semaphore.clone().acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => break,
                    };
                    let registry = self.registry.clone();
                    let locks = self.locks.clone();
                    let ledger = self.ledger.clone();
                    let queue = self.queue.clone();
                    let config = self.config.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        process_task(registry, locks, ledger, queue, config, task).await;
                    });
                }
                Ok(None) => {
                    info!("Task queue closed, stopping worker");
                    break;
                }
                Err(_) => {
                    // Poll timeout; loop to re-check shutdown.
                }
            }
        }

        // Wait for in-flight units to complete.
        let _ = semaphore
            .acquire_many(self.config.concurrency as u32)
            .await;
        info!("Sync worker stopped");
    }
}

/// Whether a failed unit should be retried.
fn is_retryable(error: &EngineError) -> bool {
    matches!(
        error,
        EngineError::Remote(RemoteError::Unavailable(_)) | EngineError::Lock(_)
    )
}

/// Process one dequeued unit.
#[instrument(skip(registry, locks, ledger, queue, config, task), fields(task_id = %task.id, attempt = task.attempt))]
async fn process_task(
    registry: Arc<StrategyRegistry>,
    locks: Arc<LockManager>,
    ledger: Arc<SyncErrorLedger>,
    queue: TaskQueue,
    config: WorkerConfig,
    task: QueuedTask,
) {
    let Some(strategy) = registry.get(task.work.strategy_name()) else {
        error!(
            strategy = task.work.strategy_name(),
            "Dequeued work for unknown strategy"
        );
        return;
    };

    let key = SyncLockKey::new(
        SyncOperation::update_of(strategy.kind()),
        task.work.entity_id(),
    );
    let work = task.work.clone();
    let result = locks
        .with_lock(key, || async {
            match &work {
                UnitOfWork::Pull { remote, .. } => strategy.pull(remote).await,
                UnitOfWork::Push { local, .. } => strategy.push(local).await,
            }
        })
        .await;

    let error = match result {
        Ok(Ok(outcome)) => {
            debug!(outcome = ?outcome, "Unit of work completed");
            return;
        }
        Ok(Err(e)) => e,
        Err(lock_err) => EngineError::Lock(lock_err),
    };

    if is_retryable(&error) && task.attempt < config.max_retries {
        let backoff = Duration::from_millis(
            config.retry_backoff_ms << task.attempt.min(8),
        );
        warn!(
            error = %error,
            backoff_ms = backoff.as_millis() as u64,
            "Transient failure; scheduling retry"
        );
        tokio::time::sleep(backoff).await;
        let retry = QueuedTask {
            id: task.id,
            work: task.work,
            attempt: task.attempt + 1,
        };
        if let Err(e) = queue.requeue(retry).await {
            error!(error = %e, "Failed to requeue unit of work");
        }
        return;
    }

    error!(error = %error, "Unit of work failed permanently");
    let (local_id, remote_id) = match &task.work {
        UnitOfWork::Pull { remote, .. } => (None, Some(remote.id.clone())),
        UnitOfWork::Push { local, .. } => (Some(local.id.clone()), None),
    };
    let entry = NewSyncError::new(strategy.kind(), local_id, remote_id, error.to_string());
    if let Err(e) = ledger.record(entry).await {
        error!(error = %e, "Failed to write sync error ledger entry");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::ResolverChain;
    use crate::ledger::InMemorySyncErrorStore;
    use crate::remote::{attributes_of, InMemoryRemote};
    use crate::store::{InMemoryLocalStore, LocalStore};
    use crate::strategy::{EntityStrategy, StrategyDefinition, SyncStrategy};
    use pipesync_core::{EntityKind, EntityRecord};
    use serde_json::json;

    struct Fixture {
        local: Arc<InMemoryLocalStore>,
        remote: Arc<InMemoryRemote>,
        queue: TaskQueue,
        worker: Arc<SyncWorker>,
    }

    fn fixture() -> Fixture {
        let local = Arc::new(InMemoryLocalStore::new());
        let remote = Arc::new(InMemoryRemote::new());
        let ledger = Arc::new(SyncErrorLedger::new(Arc::new(InMemorySyncErrorStore::new())));
        let strategy: Arc<dyn SyncStrategy> = Arc::new(EntityStrategy::new(
            StrategyDefinition::for_kind(
                EntityKind::Company,
                vec!["name".to_string(), "sales_unit_name".to_string()],
                vec!["name".to_string(), "sales_unit_name".to_string()],
            ),
            Arc::new(ResolverChain::standard()),
            local.clone(),
            remote.clone(),
            ledger.clone(),
        ));
        let registry = Arc::new(StrategyRegistry::new(vec![strategy]));
        let (queue, receiver) = TaskQueue::new(64);
        let config = WorkerConfig {
            concurrency: 2,
            poll_interval_ms: 20,
            max_retries: 3,
            retry_backoff_ms: 20,
        };
        let worker = Arc::new(SyncWorker::new(
            registry,
            Arc::new(LockManager::new()),
            ledger,
            queue.clone(),
            receiver,
            config,
        ));
        Fixture {
            local,
            remote,
            queue,
            worker,
        }
    }

    fn remote_company(reference: &str) -> EntityRecord {
        EntityRecord::new(
            reference,
            attributes_of(json!({"name": "Acme", "sales_unit_name": "EU"})),
        )
    }

    #[tokio::test]
    async fn test_worker_applies_enqueued_pull() {
        let fx = fixture();
        let worker = fx.worker.clone();
        let handle = tokio::spawn(async move { worker.run().await });

        fx.queue
            .enqueue(UnitOfWork::Pull {
                strategy: "companies".to_string(),
                remote: remote_company("PL-1"),
            })
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        let created = fx
            .local
            .find_by_reference(EntityKind::Company, "PL-1")
            .await
            .unwrap();
        assert!(created.is_some());

        fx.worker.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_worker_retries_transient_outage() {
        let fx = fixture();
        // InMemoryRemote is only consulted on push; use a push unit so the
        // outage is actually hit.
        let record = EntityRecord::new(
            "c-1",
            attributes_of(json!({"name": "Acme", "sales_unit_name": "EU"})),
        );
        fx.local
            .insert_changed(EntityKind::Company, record.clone())
            .await;
        fx.remote.set_unavailable(true);

        let worker = fx.worker.clone();
        let handle = tokio::spawn(async move { worker.run().await });

        fx.queue
            .enqueue(UnitOfWork::Push {
                strategy: "companies".to_string(),
                local: record,
            })
            .await
            .unwrap();

        // Let the first attempt fail, then recover the remote.
        tokio::time::sleep(Duration::from_millis(50)).await;
        fx.remote.set_unavailable(false);
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(fx.remote.count(EntityKind::Company).await, 1);

        fx.worker.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_stops_consume_loop() {
        let fx = fixture();
        let worker = fx.worker.clone();
        let handle = tokio::spawn(async move { worker.run().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        fx.worker.shutdown();
        // The loop notices shutdown within one poll interval.
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}

//! Aggregate sync orchestration.
//!
//! One run executes a resolved, ordered list of strategies across their
//! entity sets, each entity under the lock manager, and ends in exactly
//! one immutable [`AggregateSyncEvent`]. Per-entity failures are counted
//! and recorded but never stop the run; run-level faults (enumeration
//! failure, unreachable remote, store failure) abort it and force
//! `success = false`.

use pipesync_core::AggregateId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::error::{EngineError, EngineResult};
use crate::events::AggregateSyncEvent;
use crate::ledger::{NewSyncError, SyncErrorLedger};
use crate::lock::{LockError, LockManager, SyncLockKey, SyncOperation};
use crate::store::AggregateEventStore;
use crate::strategy::{SyncOutcome, SyncStrategy};

/// Cooperative cancellation flag, checked between entities.
///
/// An individual strategy invocation, once started under its lock, runs
/// to completion or failure; it is not preempted mid-flight.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Create an unset flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Per-run processed/skipped accumulators.
#[derive(Debug, Default)]
pub struct RunCounters {
    processed: HashMap<String, u64>,
    skipped: HashMap<String, u64>,
}

impl RunCounters {
    /// Create empty counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Account one outcome under a category.
    pub fn record(&mut self, category: &str, outcome: &SyncOutcome) {
        if outcome.is_processed() {
            *self.processed.entry(category.to_string()).or_insert(0) += 1;
        } else {
            *self.skipped.entry(category.to_string()).or_insert(0) += 1;
        }
    }

    /// Account a skip that happened outside the strategy (lock timeout).
    pub fn skip(&mut self, category: &str) {
        *self.skipped.entry(category.to_string()).or_insert(0) += 1;
    }

    /// Processed count for a category.
    #[must_use]
    pub fn processed_for(&self, category: &str) -> u64 {
        self.processed.get(category).copied().unwrap_or(0)
    }

    /// Skipped count for a category.
    #[must_use]
    pub fn skipped_for(&self, category: &str) -> u64 {
        self.skipped.get(category).copied().unwrap_or(0)
    }

    fn into_maps(self) -> (HashMap<String, u64>, HashMap<String, u64>) {
        (self.processed, self.skipped)
    }
}

/// Orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Lease duration of the per-aggregate run guard (seconds). Bounds
    /// how long a crashed run blocks a restart of the same aggregate.
    #[serde(default = "default_run_ttl_secs")]
    pub run_ttl_secs: u64,
}

fn default_run_ttl_secs() -> u64 {
    3600
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            run_ttl_secs: default_run_ttl_secs(),
        }
    }
}

/// Runs configured strategy sequences and emits terminal events.
pub struct Orchestrator {
    locks: Arc<LockManager>,
    events: Arc<dyn AggregateEventStore>,
    ledger: Arc<SyncErrorLedger>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    /// Create an orchestrator.
    #[must_use]
    pub fn new(
        locks: Arc<LockManager>,
        events: Arc<dyn AggregateEventStore>,
        ledger: Arc<SyncErrorLedger>,
    ) -> Self {
        Self::with_config(locks, events, ledger, OrchestratorConfig::default())
    }

    /// Create an orchestrator with custom configuration.
    #[must_use]
    pub fn with_config(
        locks: Arc<LockManager>,
        events: Arc<dyn AggregateEventStore>,
        ledger: Arc<SyncErrorLedger>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            locks,
            events,
            ledger,
            config,
        }
    }

    /// Execute one orchestration run.
    ///
    /// A second run for the same aggregate id while one is in progress
    /// fails with [`EngineError::AlreadyRunning`]; no event is emitted for
    /// the rejected attempt.
    #[instrument(skip(self, strategies, cancel), fields(aggregate_id = %aggregate_id))]
    pub async fn run(
        &self,
        aggregate_id: AggregateId,
        strategies: &[Arc<dyn SyncStrategy>],
        cancel: &CancelFlag,
    ) -> EngineResult<AggregateSyncEvent> {
        let guard = SyncLockKey::new(SyncOperation::RunAggregateSync, aggregate_id.to_string());
        let run_ttl = Duration::from_secs(self.config.run_ttl_secs);
        let result = self
            .locks
            .with_lock_timeout(guard, run_ttl, Duration::ZERO, || {
                self.run_inner(aggregate_id, strategies, cancel)
            })
            .await;
        match result {
            Ok(event) => event,
            Err(LockError::Timeout { .. }) => Err(EngineError::AlreadyRunning { aggregate_id }),
        }
    }

    async fn run_inner(
        &self,
        aggregate_id: AggregateId,
        strategies: &[Arc<dyn SyncStrategy>],
        cancel: &CancelFlag,
    ) -> EngineResult<AggregateSyncEvent> {
        info!(strategies = strategies.len(), "Starting sync run");
        let mut counters = RunCounters::new();
        let mut success = true;

        'run: for strategy in strategies {
            if cancel.is_cancelled() {
                info!(strategy = strategy.name(), "Sync run cancelled");
                break;
            }
            let category = strategy.kind().category();
            let locals = match strategy.changed_locals().await {
                Ok(locals) => locals,
                Err(e) => {
                    error!(strategy = strategy.name(), error = %e, "Failed to enumerate entity set");
                    success = false;
                    break;
                }
            };
            info!(
                strategy = strategy.name(),
                entities = locals.len(),
                "Running push strategy"
            );

            for record in locals {
                if cancel.is_cancelled() {
                    info!(strategy = strategy.name(), "Sync run cancelled");
                    break 'run;
                }
                let key = SyncLockKey::new(
                    SyncOperation::update_of(strategy.kind()),
                    record.id.clone(),
                );
                match self.locks.with_lock(key, || strategy.push(&record)).await {
                    Ok(Ok(outcome)) => counters.record(category, &outcome),
                    Ok(Err(e)) => {
                        error!(
                            strategy = strategy.name(),
                            entity_id = %record.id,
                            error = %e,
                            "Run-level fault during push"
                        );
                        success = false;
                        break 'run;
                    }
                    Err(lock_err) => {
                        warn!(
                            strategy = strategy.name(),
                            entity_id = %record.id,
                            error = %lock_err,
                            "Lock contention; skipping entity this run"
                        );
                        counters.skip(category);
                        let entry = NewSyncError::new(
                            strategy.kind(),
                            Some(record.id.clone()),
                            record.pl_reference().map(ToString::to_string),
                            lock_err.to_string(),
                        );
                        if let Err(le) = self.ledger.record(entry).await {
                            error!(error = %le, "Failed to write sync error ledger entry");
                        }
                    }
                }
            }
        }

        let (processed, skipped) = counters.into_maps();
        let event = AggregateSyncEvent::new(aggregate_id, success, processed, skipped);
        self.events.append(&event).await?;
        if success {
            info!(
                processed = event.processed_total(),
                skipped = event.skipped_total(),
                "Sync run completed"
            );
        } else {
            error!(
                processed = event.processed_total(),
                skipped = event.skipped_total(),
                "Sync run aborted by run-level fault"
            );
        }
        Ok(event)
    }
}

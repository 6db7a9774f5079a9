//! Aggregate sync events.
//!
//! The terminal, immutable record of one orchestration run. Created only
//! by the orchestrator; never mutated after creation.

use chrono::{DateTime, Utc};
use pipesync_core::AggregateId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Outcome event emitted at the end of an orchestration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateSyncEvent {
    /// Event id.
    pub id: Uuid,
    /// When the run finished.
    pub occurred_at: DateTime<Utc>,
    /// Correlates the event to the triggering request.
    pub aggregate_id: AggregateId,
    /// False only for run-level faults; per-entity failures are expected
    /// and live in the count maps.
    pub success: bool,
    /// Entity category to Created/Updated count.
    pub processed_counts: HashMap<String, u64>,
    /// Entity category to Skipped/Failed count.
    pub skipped_counts: HashMap<String, u64>,
}

impl AggregateSyncEvent {
    /// Create a terminal event for a run.
    #[must_use]
    pub fn new(
        aggregate_id: AggregateId,
        success: bool,
        processed_counts: HashMap<String, u64>,
        skipped_counts: HashMap<String, u64>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            aggregate_id,
            success,
            processed_counts,
            skipped_counts,
        }
    }

    /// Total records counted as processed.
    #[must_use]
    pub fn processed_total(&self) -> u64 {
        self.processed_counts.values().sum()
    }

    /// Total records counted as skipped.
    #[must_use]
    pub fn skipped_total(&self) -> u64 {
        self.skipped_counts.values().sum()
    }
}

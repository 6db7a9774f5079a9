//! Engine configuration.
//!
//! Everything the engine parameterizes at startup: the declared strategy
//! definitions (order, business keys, synced fields), lock manager
//! leases, worker pool sizing, and the run guard.

use pipesync_core::EntityKind;
use serde::{Deserialize, Serialize};

use crate::lock::LockConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::queue::WorkerConfig;
use crate::strategy::StrategyDefinition;

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Strategy definitions in default run order.
    #[serde(default = "default_strategy_definitions")]
    pub strategies: Vec<StrategyDefinition>,
    /// Lock manager leases and polling.
    #[serde(default)]
    pub lock: LockConfig,
    /// Worker pool sizing and retry policy.
    #[serde(default)]
    pub worker: WorkerConfig,
    /// Orchestration run guard.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    /// Task queue capacity.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_queue_capacity() -> usize {
    1024
}

fn strings(names: &[&str]) -> Vec<String> {
    names.iter().map(ToString::to_string).collect()
}

/// The standard definitions: units and users first (companies and
/// opportunities reference them), then the dependent kinds.
///
/// Companies and opportunities declare business keys and may match
/// heuristically; the remaining kinds declare reference matching only.
fn default_strategy_definitions() -> Vec<StrategyDefinition> {
    vec![
        StrategyDefinition::for_kind(EntityKind::SalesUnit, vec![], strings(&["name"])),
        StrategyDefinition::for_kind(
            EntityKind::User,
            vec![],
            strings(&["name", "email"]),
        ),
        StrategyDefinition::for_kind(
            EntityKind::Company,
            strings(&["name", "sales_unit_name"]),
            strings(&["name", "sales_unit_name", "phone", "email", "address"]),
        ),
        StrategyDefinition::for_kind(
            EntityKind::Opportunity,
            strings(&["name", "sales_unit_name"]),
            strings(&["name", "sales_unit_name", "value", "status", "close_date"]),
        ),
        StrategyDefinition::for_kind(
            EntityKind::Note,
            vec![],
            strings(&["subject", "body"]),
        ),
        StrategyDefinition::for_kind(
            EntityKind::Appointment,
            vec![],
            strings(&["subject", "start_at", "end_at"]),
        ),
        StrategyDefinition::for_kind(
            EntityKind::Task,
            vec![],
            strings(&["subject", "due_date", "status"]),
        ),
    ]
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strategies: default_strategy_definitions(),
            lock: LockConfig::default(),
            worker: WorkerConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

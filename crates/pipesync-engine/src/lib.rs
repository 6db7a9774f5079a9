//! # Pipesync Engine
//!
//! Bidirectional synchronization between local domain records and the
//! Pipeliner CRM.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌──────────────────┐     ┌────────────────┐
//! │  Scheduler / │────►│   Orchestrator   │────►│   Strategies   │
//! │   Operator   │     │ (counts, event)  │     │  (push/pull)   │
//! └──────────────┘     └────────┬─────────┘     └───────┬────────┘
//!                               │                       │
//! ┌──────────────┐     ┌────────▼─────────┐     ┌───────▼────────┐
//! │   Webhook    │────►│   Task Queue +   │────►│  Lock Manager  │
//! │   Gateway    │     │   Worker Pool    │     │ (op, entity_id)│
//! └──────────────┘     └──────────────────┘     └───────┬────────┘
//!                                                       │
//!                      ┌──────────────────┐     ┌───────▼────────┐
//!                      │ Sync Error Ledger│◄────│   Resolvers +  │
//!                      │  (triage, audit) │     │  Remote Client │
//!                      └──────────────────┘     └────────────────┘
//! ```
//!
//! Every mutation of a synchronized entity (orchestrated push,
//! webhook-triggered pull, or ordinary CRUD) runs under the same
//! [`LockManager`], which is the single hard ordering guarantee of the
//! system: no two operations holding the same lock key ever execute
//! concurrently.

pub mod config;
pub mod correlation;
pub mod error;
pub mod events;
pub mod ledger;
pub mod lock;
pub mod orchestrator;
pub mod postgres;
pub mod queue;
pub mod remote;
pub mod store;
pub mod strategy;

pub use config::EngineConfig;
pub use correlation::{
    CompanyResolver, CorrelationResolver, OpportunityResolver, ReferenceResolver, ResolverChain,
};
pub use error::{CorrelationError, EngineError, EngineResult, RemoteError};
pub use events::AggregateSyncEvent;
pub use ledger::{
    BatchOutcome, BatchReport, InMemorySyncErrorStore, LedgerFilter, NewSyncError, SyncError,
    SyncErrorLedger, SyncErrorStore,
};
pub use lock::{LockConfig, LockError, LockManager, SyncLockKey, SyncOperation};
pub use orchestrator::{CancelFlag, Orchestrator, OrchestratorConfig, RunCounters};
pub use postgres::{PgAggregateEventStore, PgSyncErrorStore};
pub use queue::{QueuedTask, SyncWorker, TaskQueue, TaskReceiver, UnitOfWork, WorkerConfig};
pub use remote::{InMemoryRemote, RemoteClient, RemoteResult};
pub use store::{
    AggregateEventStore, InMemoryAggregateEventStore, InMemoryLocalStore, LocalStore,
};
pub use strategy::{
    EntityStrategy, StrategyDefinition, StrategyRegistry, SyncOutcome, SyncStrategy,
};

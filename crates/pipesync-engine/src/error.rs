//! Error taxonomy for the sync engine.
//!
//! Per-entity failures (`Correlation`, `Remote::Rejected`) are caught at the
//! strategy boundary, written to the sync error ledger, and surfaced as a
//! `Failed` outcome. Transient errors (`Lock`, `Remote::Unavailable`)
//! propagate so the caller can retry or abort the run.

use pipesync_core::{AggregateId, EntityKind, SyncErrorId};
use thiserror::Error;

use crate::lock::LockError;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised while correlating a local and a remote record.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CorrelationError {
    /// A declared business-key attribute is absent from one side.
    ///
    /// This indicates a mapping bug upstream, not a legitimate "no match",
    /// and is fatal for the entity.
    #[error("Required correlation attribute '{attribute}' missing for {kind}")]
    AttributeMissing {
        /// The entity kind being correlated.
        kind: EntityKind,
        /// The missing attribute name.
        attribute: String,
    },

    /// More than one candidate resolved as the same logical entity.
    #[error("Correlation ambiguous for {kind}: {candidates} candidates matched")]
    Ambiguous {
        /// The entity kind being correlated.
        kind: EntityKind,
        /// Number of candidates that matched.
        candidates: usize,
    },
}

/// Errors surfaced by the remote CRM collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// The remote service could not be reached. Transient; the enqueuing
    /// layer retries with backoff.
    #[error("Remote CRM unavailable: {0}")]
    Unavailable(String),

    /// The remote service rejected the request. Permanent for this payload.
    #[error("Remote CRM rejected the request: {0}")]
    Rejected(String),
}

impl RemoteError {
    /// Whether the error is worth retrying.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Unavailable(_))
    }
}

/// Top-level engine error.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Lock acquisition failure.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// Correlation failure.
    #[error(transparent)]
    Correlation(#[from] CorrelationError),

    /// Remote CRM failure.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// An orchestration run for this aggregate id is already in progress.
    #[error("Sync run already in progress for aggregate {aggregate_id}")]
    AlreadyRunning {
        /// The contended aggregate id.
        aggregate_id: AggregateId,
    },

    /// A fault that aborts the whole orchestration run.
    #[error("Sync run fault: {0}")]
    RunFault(String),

    /// Unknown strategy name in a run request.
    #[error("Unknown sync strategy: {name}")]
    UnknownStrategy {
        /// The rejected name.
        name: String,
    },

    /// Sync error ledger entry not found.
    #[error("Sync error not found: {id}")]
    LedgerNotFound {
        /// The missing entry id.
        id: SyncErrorId,
    },

    /// Archive precondition violated.
    #[error("Sync error already archived: {id}")]
    LedgerAlreadyArchived {
        /// The entry id.
        id: SyncErrorId,
    },

    /// Restore precondition violated.
    #[error("Sync error is not archived: {id}")]
    LedgerNotArchived {
        /// The entry id.
        id: SyncErrorId,
    },

    /// Storage layer failure.
    #[error("Store error: {0}")]
    Store(String),

    /// Serialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl EngineError {
    /// True when the error aborts the whole run rather than one entity.
    ///
    /// Run-level faults are distinct from per-entity failures: individual
    /// entity failures are counted and recorded, while these abort the run
    /// and force `AggregateSyncEvent.success = false`.
    #[must_use]
    pub fn is_run_fault(&self) -> bool {
        matches!(
            self,
            EngineError::RunFault(_)
                | EngineError::AlreadyRunning { .. }
                | EngineError::UnknownStrategy { .. }
                | EngineError::Remote(RemoteError::Unavailable(_))
                | EngineError::Store(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_transience() {
        assert!(RemoteError::Unavailable("timeout".into()).is_transient());
        assert!(!RemoteError::Rejected("bad payload".into()).is_transient());
    }

    #[test]
    fn test_run_fault_classification() {
        assert!(EngineError::RunFault("misconfigured".into()).is_run_fault());
        assert!(EngineError::Remote(RemoteError::Unavailable("down".into())).is_run_fault());
        assert!(!EngineError::Remote(RemoteError::Rejected("nope".into())).is_run_fault());
        assert!(!EngineError::Correlation(CorrelationError::Ambiguous {
            kind: EntityKind::Company,
            candidates: 2,
        })
        .is_run_fault());
    }

    #[test]
    fn test_display_messages() {
        let err = CorrelationError::AttributeMissing {
            kind: EntityKind::Company,
            attribute: "name".into(),
        };
        assert!(err.to_string().contains("'name'"));
        assert!(err.to_string().contains("company"));
    }
}

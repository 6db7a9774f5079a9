//! Sync strategies.
//!
//! A strategy is the entity-kind-scoped push/pull unit. All kinds share
//! one implementation, [`EntityStrategy`], parameterized by declared
//! business keys and synced fields; the kind-specific knowledge lives in
//! configuration, not in per-kind code.
//!
//! Strategies are stateless per invocation: all state lives in the records
//! they touch. Correlation failures and permanent remote rejections are
//! caught at the strategy boundary, written to the ledger, and surfaced as
//! a `Failed` outcome; transient errors propagate for the caller to retry.

use async_trait::async_trait;
use pipesync_core::{CorrelationKey, EntityKind, EntityRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, instrument};
use uuid::Uuid;

use crate::correlation::ResolverChain;
use crate::error::{CorrelationError, EngineError, EngineResult, RemoteError};
use crate::ledger::{NewSyncError, SyncErrorLedger};
use crate::remote::RemoteClient;
use crate::store::LocalStore;

/// Outcome of one strategy invocation for one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// A new counterpart was created.
    Created,
    /// The counterpart was updated (including soft-delete marking).
    Updated,
    /// Nothing to do; the reason says why.
    Skipped {
        /// Why the entity was skipped.
        reason: String,
    },
    /// The entity failed; a ledger entry was written.
    Failed {
        /// Error detail.
        error: String,
    },
}

impl SyncOutcome {
    /// Skip with a reason.
    #[must_use]
    pub fn skipped(reason: impl Into<String>) -> Self {
        SyncOutcome::Skipped {
            reason: reason.into(),
        }
    }

    /// Whether the outcome counts toward `processed_counts`.
    #[must_use]
    pub fn is_processed(&self) -> bool {
        matches!(self, SyncOutcome::Created | SyncOutcome::Updated)
    }
}

/// Declarative description of one kind's strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyDefinition {
    /// Registry name; by convention the kind's plural category.
    pub name: String,
    /// The entity kind.
    pub kind: EntityKind,
    /// Business-key attributes for heuristic matching. Empty means the
    /// kind declares reference matching only and never falls back to
    /// heuristics.
    #[serde(default)]
    pub business_keys: Vec<String>,
    /// Attributes diffed and written on either side.
    pub synced_fields: Vec<String>,
}

impl StrategyDefinition {
    /// Definition with the conventional name for a kind.
    #[must_use]
    pub fn for_kind(kind: EntityKind, business_keys: Vec<String>, synced_fields: Vec<String>) -> Self {
        Self {
            name: kind.category().to_string(),
            kind,
            business_keys,
            synced_fields,
        }
    }
}

/// Entity-kind-scoped push/pull synchronization unit.
#[async_trait]
pub trait SyncStrategy: Send + Sync + std::fmt::Debug {
    /// Registry name.
    fn name(&self) -> &str;

    /// The kind this strategy synchronizes.
    fn kind(&self) -> EntityKind;

    /// The push entity set: local records touched since the last
    /// successful run. The strategy owns this definition.
    async fn changed_locals(&self) -> EngineResult<Vec<EntityRecord>>;

    /// Push one local record to the remote system.
    async fn push(&self, local: &EntityRecord) -> EngineResult<SyncOutcome>;

    /// Apply one remote record locally.
    async fn pull(&self, remote: &EntityRecord) -> EngineResult<SyncOutcome>;
}

/// The configured strategy implementation shared by all kinds.
pub struct EntityStrategy {
    def: StrategyDefinition,
    resolvers: Arc<ResolverChain>,
    local: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteClient>,
    ledger: Arc<SyncErrorLedger>,
}

impl std::fmt::Debug for EntityStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityStrategy")
            .field("def", &self.def)
            .finish_non_exhaustive()
    }
}

impl EntityStrategy {
    /// Create a strategy from its definition and collaborators.
    #[must_use]
    pub fn new(
        def: StrategyDefinition,
        resolvers: Arc<ResolverChain>,
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteClient>,
        ledger: Arc<SyncErrorLedger>,
    ) -> Self {
        Self {
            def,
            resolvers,
            local,
            remote,
            ledger,
        }
    }

    /// Whether the error is a per-entity failure to absorb at the
    /// boundary, as opposed to a transient/run-level error to propagate.
    fn is_entity_failure(error: &EngineError) -> bool {
        matches!(
            error,
            EngineError::Correlation(_) | EngineError::Remote(RemoteError::Rejected(_))
        )
    }

    async fn record_failure(
        &self,
        local_id: Option<String>,
        remote_id: Option<String>,
        detail: &str,
    ) {
        let entry = NewSyncError::new(self.def.kind, local_id, remote_id, detail);
        if let Err(e) = self.ledger.record(entry).await {
            error!(kind = %self.def.kind, error = %e, "Failed to write sync error ledger entry");
        }
    }

    /// Find the remote counterpart of a local record.
    ///
    /// Reference lookup first; heuristic search only for kinds that
    /// declare business keys. More than one heuristic match is ambiguous
    /// and fatal for the entity.
    async fn find_remote_counterpart(
        &self,
        local: &EntityRecord,
    ) -> EngineResult<Option<EntityRecord>> {
        if let Some(reference) = local.pl_reference() {
            // A dangling reference (counterpart hard-deleted remotely)
            // falls through to creation.
            return Ok(self.remote.find_by_reference(self.def.kind, reference).await?);
        }
        if self.def.business_keys.is_empty() {
            return Ok(None);
        }
        let Some(key) = CorrelationKey::for_record(local, &self.def.business_keys) else {
            return Ok(None);
        };
        let candidates = self.remote.search(self.def.kind, &key).await?;
        let mut matched = Vec::new();
        for candidate in candidates {
            if self
                .resolvers
                .correlate(self.def.kind, &local.attributes, &candidate.attributes)?
            {
                matched.push(candidate);
            }
        }
        match matched.len() {
            0 => Ok(None),
            1 => Ok(matched.pop()),
            n => Err(CorrelationError::Ambiguous {
                kind: self.def.kind,
                candidates: n,
            }
            .into()),
        }
    }

    async fn push_inner(&self, local: &EntityRecord) -> EngineResult<SyncOutcome> {
        let kind = self.def.kind;
        match self.find_remote_counterpart(local).await? {
            Some(counterpart) => {
                let reference = counterpart.id.clone();
                if local.pl_reference() != Some(reference.as_str()) {
                    self.local.set_reference(kind, &local.id, &reference).await?;
                }
                if !local.differs_in(&counterpart, &self.def.synced_fields) {
                    return Ok(SyncOutcome::skipped("no changes"));
                }
                self.remote
                    .update(kind, &reference, &local.project(&self.def.synced_fields))
                    .await?;
                Ok(SyncOutcome::Updated)
            }
            None => {
                if local.is_deleted() {
                    return Ok(SyncOutcome::skipped("deleted record was never synced"));
                }
                let reference = self
                    .remote
                    .create(kind, &local.project(&self.def.synced_fields))
                    .await?;
                self.local.set_reference(kind, &local.id, &reference).await?;
                Ok(SyncOutcome::Created)
            }
        }
    }

    /// Find the local counterpart of a remote record.
    async fn find_local_counterpart(
        &self,
        remote: &EntityRecord,
    ) -> EngineResult<Option<EntityRecord>> {
        if let Some(found) = self.local.find_by_reference(self.def.kind, &remote.id).await? {
            return Ok(Some(found));
        }
        if self.def.business_keys.is_empty() {
            return Ok(None);
        }
        let candidates = self.local.list(self.def.kind).await?;
        let mut matched = Vec::new();
        for candidate in candidates {
            // Heuristic matching is only for records that never synced;
            // a local already holding a different reference is linked to
            // some other remote record.
            if candidate.pl_reference().is_some() {
                continue;
            }
            if self
                .resolvers
                .correlate(self.def.kind, &remote.attributes, &candidate.attributes)?
            {
                matched.push(candidate);
            }
        }
        match matched.len() {
            0 => Ok(None),
            1 => Ok(matched.pop()),
            n => Err(CorrelationError::Ambiguous {
                kind: self.def.kind,
                candidates: n,
            }
            .into()),
        }
    }

    async fn pull_inner(&self, remote: &EntityRecord) -> EngineResult<SyncOutcome> {
        let kind = self.def.kind;
        match self.find_local_counterpart(remote).await? {
            Some(local_rec) => {
                if local_rec.pl_reference().is_none() {
                    self.local
                        .set_reference(kind, &local_rec.id, &remote.id)
                        .await?;
                }
                if remote.is_deleted() {
                    // Soft-delete only; the local record stays for audit.
                    self.local.mark_deleted(kind, &local_rec.id).await?;
                    return Ok(SyncOutcome::Updated);
                }
                if !remote.differs_in(&local_rec, &self.def.synced_fields) {
                    return Ok(SyncOutcome::skipped("no changes"));
                }
                let mut merged = local_rec.clone();
                for (name, value) in remote.project(&self.def.synced_fields).attributes {
                    merged.attributes.insert(name, value);
                }
                self.local.upsert(kind, merged).await?;
                Ok(SyncOutcome::Updated)
            }
            None => {
                if remote.is_deleted() {
                    return Ok(SyncOutcome::skipped(
                        "deleted remote record has no local counterpart",
                    ));
                }
                let mut created = remote.project(&self.def.synced_fields);
                created.id = Uuid::new_v4().to_string();
                created.set_pl_reference(&remote.id);
                self.local.upsert(kind, created).await?;
                Ok(SyncOutcome::Created)
            }
        }
    }
}

#[async_trait]
impl SyncStrategy for EntityStrategy {
    fn name(&self) -> &str {
        &self.def.name
    }

    fn kind(&self) -> EntityKind {
        self.def.kind
    }

    async fn changed_locals(&self) -> EngineResult<Vec<EntityRecord>> {
        self.local.changed_since_last_sync(self.def.kind).await
    }

    #[instrument(skip(self, local), fields(kind = %self.def.kind, entity_id = %local.id))]
    async fn push(&self, local: &EntityRecord) -> EngineResult<SyncOutcome> {
        match self.push_inner(local).await {
            Ok(outcome) => {
                if !matches!(outcome, SyncOutcome::Failed { .. }) {
                    self.local.mark_synced(self.def.kind, &local.id).await?;
                }
                Ok(outcome)
            }
            Err(e) if Self::is_entity_failure(&e) => {
                let detail = e.to_string();
                self.record_failure(
                    Some(local.id.clone()),
                    local.pl_reference().map(ToString::to_string),
                    &detail,
                )
                .await;
                Ok(SyncOutcome::Failed { error: detail })
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self, remote), fields(kind = %self.def.kind, entity_id = %remote.id))]
    async fn pull(&self, remote: &EntityRecord) -> EngineResult<SyncOutcome> {
        match self.pull_inner(remote).await {
            Ok(outcome) => Ok(outcome),
            Err(e) if Self::is_entity_failure(&e) => {
                let detail = e.to_string();
                self.record_failure(None, Some(remote.id.clone()), &detail)
                    .await;
                Ok(SyncOutcome::Failed { error: detail })
            }
            Err(e) => Err(e),
        }
    }
}

/// Registry of strategies by name, with the configured default run order.
pub struct StrategyRegistry {
    by_name: HashMap<String, Arc<dyn SyncStrategy>>,
    default_order: Vec<String>,
}

impl StrategyRegistry {
    /// Build a registry from strategies; the default order is the
    /// registration order.
    #[must_use]
    pub fn new(strategies: Vec<Arc<dyn SyncStrategy>>) -> Self {
        let default_order = strategies.iter().map(|s| s.name().to_string()).collect();
        let by_name = strategies
            .into_iter()
            .map(|s| (s.name().to_string(), s))
            .collect();
        Self {
            by_name,
            default_order,
        }
    }

    /// Build the full standard registry from definitions and shared
    /// collaborators.
    #[must_use]
    pub fn standard(
        definitions: Vec<StrategyDefinition>,
        resolvers: Arc<ResolverChain>,
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteClient>,
        ledger: Arc<SyncErrorLedger>,
    ) -> Self {
        let strategies = definitions
            .into_iter()
            .map(|def| {
                Arc::new(EntityStrategy::new(
                    def,
                    resolvers.clone(),
                    local.clone(),
                    remote.clone(),
                    ledger.clone(),
                )) as Arc<dyn SyncStrategy>
            })
            .collect();
        Self::new(strategies)
    }

    /// Look up one strategy.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn SyncStrategy>> {
        self.by_name.get(name).cloned()
    }

    /// The strategy for a kind, by its conventional name.
    #[must_use]
    pub fn for_kind(&self, kind: EntityKind) -> Option<Arc<dyn SyncStrategy>> {
        self.get(kind.category())
    }

    /// The configured default run order.
    #[must_use]
    pub fn default_order(&self) -> &[String] {
        &self.default_order
    }

    /// Resolve an ordered name list to strategies; `None` means the full
    /// default set. Unknown names are rejected.
    pub fn resolve(&self, names: Option<&[String]>) -> EngineResult<Vec<Arc<dyn SyncStrategy>>> {
        let order: Vec<String> = match names {
            Some(names) => names.to_vec(),
            None => self.default_order.clone(),
        };
        order
            .iter()
            .map(|name| {
                self.get(name).ok_or_else(|| EngineError::UnknownStrategy {
                    name: name.clone(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemorySyncErrorStore;
    use crate::remote::{attributes_of, InMemoryRemote};
    use crate::store::InMemoryLocalStore;
    use serde_json::json;

    struct Fixture {
        local: Arc<InMemoryLocalStore>,
        remote: Arc<InMemoryRemote>,
        errors: Arc<InMemorySyncErrorStore>,
        strategy: EntityStrategy,
    }

    fn company_fixture() -> Fixture {
        let local = Arc::new(InMemoryLocalStore::new());
        let remote = Arc::new(InMemoryRemote::new());
        let errors = Arc::new(InMemorySyncErrorStore::new());
        let ledger = Arc::new(SyncErrorLedger::new(errors.clone()));
        let def = StrategyDefinition::for_kind(
            EntityKind::Company,
            vec!["name".to_string(), "sales_unit_name".to_string()],
            vec![
                "name".to_string(),
                "sales_unit_name".to_string(),
                "phone".to_string(),
            ],
        );
        let strategy = EntityStrategy::new(
            def,
            Arc::new(ResolverChain::standard()),
            local.clone(),
            remote.clone(),
            ledger,
        );
        Fixture {
            local,
            remote,
            errors,
            strategy,
        }
    }

    fn company(id: &str, attrs: serde_json::Value) -> EntityRecord {
        EntityRecord::new(id, attributes_of(attrs))
    }

    #[tokio::test]
    async fn test_push_creates_when_no_counterpart() {
        let fx = company_fixture();
        let rec = company("c-1", json!({"name": "Acme Ltd", "sales_unit_name": "EU"}));
        fx.local.insert_changed(EntityKind::Company, rec.clone()).await;

        let outcome = fx.strategy.push(&rec).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Created);
        assert_eq!(fx.remote.count(EntityKind::Company).await, 1);

        // The new reference was persisted locally and the record is no
        // longer pending.
        let stored = fx.local.get(EntityKind::Company, "c-1").await.unwrap().unwrap();
        assert!(stored.pl_reference().is_some());
        assert!(!fx.local.is_pending(EntityKind::Company, "c-1").await);
    }

    #[tokio::test]
    async fn test_push_heuristic_match_updates_and_links() {
        let fx = company_fixture();
        fx.remote
            .seed(
                EntityKind::Company,
                "PL-77",
                company("", json!({"name": "ACME LTD", "sales_unit_name": "EU", "phone": "1"})),
            )
            .await;

        let rec = company(
            "c-1",
            json!({"name": "Acme Ltd", "sales_unit_name": "EU", "phone": "2"}),
        );
        fx.local.insert_changed(EntityKind::Company, rec.clone()).await;

        let outcome = fx.strategy.push(&rec).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Updated);
        assert_eq!(fx.remote.count(EntityKind::Company).await, 1);

        let stored = fx.local.get(EntityKind::Company, "c-1").await.unwrap().unwrap();
        assert_eq!(stored.pl_reference(), Some("PL-77"));

        let remote = fx.remote.stored(EntityKind::Company, "PL-77").await.unwrap();
        assert_eq!(remote.attr_str("phone"), Some("2"));
    }

    #[tokio::test]
    async fn test_push_skips_identical_counterpart() {
        let fx = company_fixture();
        fx.remote
            .seed(
                EntityKind::Company,
                "PL-5",
                company("", json!({"name": "Acme", "sales_unit_name": "EU", "phone": "1"})),
            )
            .await;
        let mut rec = company(
            "c-1",
            json!({"name": "Acme", "sales_unit_name": "EU", "phone": "1"}),
        );
        rec.set_pl_reference("PL-5");
        fx.local.insert_changed(EntityKind::Company, rec.clone()).await;

        let outcome = fx.strategy.push(&rec).await.unwrap();
        assert_eq!(outcome, SyncOutcome::skipped("no changes"));
    }

    #[tokio::test]
    async fn test_push_missing_business_key_fails_entity_and_writes_ledger() {
        let fx = company_fixture();
        fx.remote
            .seed(
                EntityKind::Company,
                "PL-1",
                company("", json!({"name": "Acme", "sales_unit_name": "EU"})),
            )
            .await;
        // Local record missing sales_unit_name: a mapping bug, fatal for
        // the entity.
        let rec = company("c-1", json!({"name": "Acme"}));
        fx.local.insert_changed(EntityKind::Company, rec.clone()).await;

        let outcome = fx.strategy.push(&rec).await.unwrap();
        assert!(matches!(outcome, SyncOutcome::Failed { .. }));
        assert_eq!(fx.errors.len().await, 1);
        // Failed pushes stay pending for the next run.
        assert!(fx.local.is_pending(EntityKind::Company, "c-1").await);
    }

    #[tokio::test]
    async fn test_push_remote_outage_propagates() {
        let fx = company_fixture();
        let rec = company("c-1", json!({"name": "Acme", "sales_unit_name": "EU"}));
        fx.local.insert_changed(EntityKind::Company, rec.clone()).await;
        fx.remote.set_unavailable(true);

        let err = fx.strategy.push(&rec).await.unwrap_err();
        assert!(err.is_run_fault());
        assert!(fx.errors.is_empty().await);
    }

    #[tokio::test]
    async fn test_pull_updates_referenced_local() {
        let fx = company_fixture();
        let mut rec = company(
            "c-1",
            json!({"name": "Acme", "sales_unit_name": "EU", "phone": "1"}),
        );
        rec.set_pl_reference("PL-9");
        fx.local.upsert(EntityKind::Company, rec).await.unwrap();

        let remote = company(
            "PL-9",
            json!({"name": "Acme", "sales_unit_name": "EU", "phone": "42"}),
        );
        let outcome = fx.strategy.pull(&remote).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Updated);

        let stored = fx.local.get(EntityKind::Company, "c-1").await.unwrap().unwrap();
        assert_eq!(stored.attr_str("phone"), Some("42"));
    }

    #[tokio::test]
    async fn test_pull_soft_deletes_local_counterpart() {
        let fx = company_fixture();
        let mut rec = company("c-1", json!({"name": "Acme", "sales_unit_name": "EU"}));
        rec.set_pl_reference("PL-9");
        fx.local.upsert(EntityKind::Company, rec).await.unwrap();

        let mut remote = company("PL-9", json!({"name": "Acme", "sales_unit_name": "EU"}));
        remote.mark_deleted();

        let outcome = fx.strategy.pull(&remote).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Updated);

        // Soft-deleted, not removed.
        let stored = fx.local.get(EntityKind::Company, "c-1").await.unwrap().unwrap();
        assert!(stored.is_deleted());
    }

    #[tokio::test]
    async fn test_pull_creates_local_for_unknown_remote() {
        let fx = company_fixture();
        let remote = company(
            "PL-3",
            json!({"name": "New Co", "sales_unit_name": "US", "phone": "5"}),
        );
        let outcome = fx.strategy.pull(&remote).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Created);

        let created = fx
            .local
            .find_by_reference(EntityKind::Company, "PL-3")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(created.attr_str("name"), Some("New Co"));
    }

    #[tokio::test]
    async fn test_pull_is_idempotent_for_same_payload() {
        let fx = company_fixture();
        let remote = company(
            "PL-3",
            json!({"name": "New Co", "sales_unit_name": "US"}),
        );
        assert_eq!(fx.strategy.pull(&remote).await.unwrap(), SyncOutcome::Created);
        // Re-applying the same payload finds the counterpart and changes
        // nothing.
        assert_eq!(
            fx.strategy.pull(&remote).await.unwrap(),
            SyncOutcome::skipped("no changes")
        );
        assert_eq!(fx.local.list(EntityKind::Company).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_registry_resolves_and_rejects() {
        let fx = company_fixture();
        let registry = StrategyRegistry::new(vec![Arc::new(fx.strategy)]);
        assert!(registry.get("companies").is_some());
        assert!(registry.for_kind(EntityKind::Company).is_some());

        let resolved = registry.resolve(None).unwrap();
        assert_eq!(resolved.len(), 1);

        let err = registry
            .resolve(Some(&["invoices".to_string()]))
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownStrategy { .. }));
    }
}

//! Remote CRM collaborator.
//!
//! The engine depends on the remote system through a small capability
//! trait: find a record by reference, search candidates by correlation
//! key, create, update. Wire format and transport policy belong to the
//! implementation, not to the engine.

use async_trait::async_trait;
use pipesync_core::{CorrelationKey, EntityKind, EntityRecord};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;

use crate::error::RemoteError;

/// Result type for remote calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Outbound interface to the remote CRM.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Fetch a record by its remote reference.
    async fn find_by_reference(
        &self,
        kind: EntityKind,
        reference: &str,
    ) -> RemoteResult<Option<EntityRecord>>;

    /// Fetch counterpart candidates for a correlation key.
    ///
    /// Implementations may over-approximate; the resolver chain makes the
    /// final match decision.
    async fn search(&self, kind: EntityKind, key: &CorrelationKey) -> RemoteResult<Vec<EntityRecord>>;

    /// Create a record, returning its new remote reference.
    async fn create(&self, kind: EntityKind, record: &EntityRecord) -> RemoteResult<String>;

    /// Update the record behind a reference with the given attributes.
    async fn update(
        &self,
        kind: EntityKind,
        reference: &str,
        record: &EntityRecord,
    ) -> RemoteResult<()>;
}

/// In-memory remote CRM used by tests and local development.
///
/// Records are keyed by reference; the record id of anything it returns
/// is the reference itself, matching the real collaborator's shape.
#[derive(Default)]
pub struct InMemoryRemote {
    records: RwLock<HashMap<(EntityKind, String), EntityRecord>>,
    next_reference: AtomicU64,
    unavailable: AtomicBool,
}

impl InMemoryRemote {
    /// Create an empty remote.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every call fails with `RemoteError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Seed a record under an explicit reference.
    pub async fn seed(&self, kind: EntityKind, reference: &str, mut record: EntityRecord) {
        record.id = reference.to_string();
        record.set_pl_reference(reference);
        let mut records = self.records.write().await;
        records.insert((kind, reference.to_string()), record);
    }

    /// Snapshot a stored record. Test inspection helper.
    pub async fn stored(&self, kind: EntityKind, reference: &str) -> Option<EntityRecord> {
        let records = self.records.read().await;
        records.get(&(kind, reference.to_string())).cloned()
    }

    /// Number of stored records of a kind. Test inspection helper.
    pub async fn count(&self, kind: EntityKind) -> usize {
        let records = self.records.read().await;
        records.keys().filter(|(k, _)| *k == kind).count()
    }

    fn check_available(&self) -> RemoteResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable(
                "simulated outage".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteClient for InMemoryRemote {
    async fn find_by_reference(
        &self,
        kind: EntityKind,
        reference: &str,
    ) -> RemoteResult<Option<EntityRecord>> {
        self.check_available()?;
        let records = self.records.read().await;
        Ok(records.get(&(kind, reference.to_string())).cloned())
    }

    async fn search(&self, kind: EntityKind, key: &CorrelationKey) -> RemoteResult<Vec<EntityRecord>> {
        self.check_available()?;
        let records = self.records.read().await;
        let matches = match key {
            CorrelationKey::Reference { reference } => records
                .get(&(kind, reference.clone()))
                .cloned()
                .into_iter()
                .collect(),
            CorrelationKey::Heuristic { attributes } => records
                .iter()
                .filter(|((k, _), _)| *k == kind)
                .filter(|(_, record)| {
                    attributes.iter().all(|(name, value)| {
                        record
                            .attr_str(name)
                            .is_some_and(|v| v.eq_ignore_ascii_case(value))
                    })
                })
                .map(|(_, record)| record.clone())
                .collect(),
        };
        Ok(matches)
    }

    async fn create(&self, kind: EntityKind, record: &EntityRecord) -> RemoteResult<String> {
        self.check_available()?;
        let reference = format!("PL-{}", self.next_reference.fetch_add(1, Ordering::SeqCst) + 1);
        let mut stored = record.clone();
        stored.id = reference.clone();
        stored.set_pl_reference(&reference);
        let mut records = self.records.write().await;
        records.insert((kind, reference.clone()), stored);
        Ok(reference)
    }

    async fn update(
        &self,
        kind: EntityKind,
        reference: &str,
        record: &EntityRecord,
    ) -> RemoteResult<()> {
        self.check_available()?;
        let mut records = self.records.write().await;
        let stored = records
            .get_mut(&(kind, reference.to_string()))
            .ok_or_else(|| {
                RemoteError::Rejected(format!("no {kind} with reference {reference}"))
            })?;
        for (name, value) in &record.attributes {
            stored.attributes.insert(name.clone(), value.clone());
        }
        Ok(())
    }
}

/// Convenience for building attribute maps in tests and seeds.
#[must_use]
pub fn attributes_of(value: Value) -> pipesync_core::Attributes {
    match value {
        Value::Object(map) => map,
        _ => pipesync_core::Attributes::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_create_assigns_reference() {
        let remote = InMemoryRemote::new();
        let record = EntityRecord::new("local-1", attributes_of(json!({"name": "Acme"})));
        let reference = remote.create(EntityKind::Company, &record).await.unwrap();
        assert!(reference.starts_with("PL-"));

        let stored = remote.stored(EntityKind::Company, &reference).await.unwrap();
        assert_eq!(stored.pl_reference(), Some(reference.as_str()));
        assert_eq!(stored.attr_str("name"), Some("Acme"));
    }

    #[tokio::test]
    async fn test_update_unknown_reference_is_rejected() {
        let remote = InMemoryRemote::new();
        let record = EntityRecord::new("x", attributes_of(json!({})));
        let err = remote
            .update(EntityKind::Company, "PL-404", &record)
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_heuristic_search_is_case_insensitive() {
        let remote = InMemoryRemote::new();
        remote
            .seed(
                EntityKind::Company,
                "PL-1",
                EntityRecord::new(
                    "",
                    attributes_of(json!({"name": "Acme Ltd", "sales_unit_name": "EU"})),
                ),
            )
            .await;

        let key = CorrelationKey::Heuristic {
            attributes: [("name".to_string(), "ACME LTD".to_string())]
                .into_iter()
                .collect(),
        };
        let found = remote.search(EntityKind::Company, &key).await.unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn test_outage_simulation() {
        let remote = InMemoryRemote::new();
        remote.set_unavailable(true);
        let err = remote
            .find_by_reference(EntityKind::Task, "PL-1")
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}

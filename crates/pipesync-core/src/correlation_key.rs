//! Correlation keys.
//!
//! A correlation key is the typed query the engine hands to a store or the
//! remote client when looking for the counterpart of a record. It has two
//! disjoint forms: the remote-assigned reference (present once a record has
//! synced at least once) and a heuristic tuple of business attributes used
//! only for first-time matching.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::entity::EntityRecord;

/// Typed identifier used to match a local and a remote record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "form", rename_all = "snake_case")]
pub enum CorrelationKey {
    /// Opaque remote-assigned identifier already stored on the record.
    Reference {
        /// The `pl_reference` value.
        reference: String,
    },
    /// Normalized business attributes, declared per entity kind.
    ///
    /// Ordered map so the key has a canonical shape regardless of how the
    /// attributes were collected.
    Heuristic {
        /// Attribute name to raw (un-normalized) value.
        attributes: BTreeMap<String, String>,
    },
}

impl CorrelationKey {
    /// Build a reference key.
    #[must_use]
    pub fn reference(reference: impl Into<String>) -> Self {
        CorrelationKey::Reference {
            reference: reference.into(),
        }
    }

    /// Build the key for a record: its reference if present, otherwise a
    /// heuristic key over the declared business attributes.
    ///
    /// Returns `None` when the record has no reference and no business
    /// attributes are declared; such a record cannot be correlated and
    /// must be treated as having no counterpart.
    #[must_use]
    pub fn for_record(record: &EntityRecord, business_keys: &[String]) -> Option<Self> {
        if let Some(reference) = record.pl_reference() {
            return Some(CorrelationKey::reference(reference));
        }
        if business_keys.is_empty() {
            return None;
        }
        let attributes: BTreeMap<String, String> = business_keys
            .iter()
            .filter_map(|k| record.attr_str(k).map(|v| (k.clone(), v.to_string())))
            .collect();
        Some(CorrelationKey::Heuristic { attributes })
    }

    /// Whether this is the reference form.
    #[must_use]
    pub fn is_reference(&self) -> bool {
        matches!(self, CorrelationKey::Reference { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(attrs: serde_json::Value) -> EntityRecord {
        let serde_json::Value::Object(map) = attrs else {
            panic!("attrs must be an object")
        };
        EntityRecord::new("local-1", map)
    }

    #[test]
    fn test_reference_wins_over_heuristic() {
        let rec = record(json!({"pl_reference": "PL-1", "name": "Acme"}));
        let key = CorrelationKey::for_record(&rec, &["name".to_string()]).unwrap();
        assert_eq!(key, CorrelationKey::reference("PL-1"));
    }

    #[test]
    fn test_heuristic_collects_declared_attributes() {
        let rec = record(json!({"name": "Acme", "sales_unit_name": "EU", "phone": "1"}));
        let keys = vec!["name".to_string(), "sales_unit_name".to_string()];
        let key = CorrelationKey::for_record(&rec, &keys).unwrap();
        match key {
            CorrelationKey::Heuristic { attributes } => {
                assert_eq!(attributes.len(), 2);
                assert_eq!(attributes.get("name").map(String::as_str), Some("Acme"));
                assert!(!attributes.contains_key("phone"));
            }
            CorrelationKey::Reference { .. } => panic!("expected heuristic key"),
        }
    }

    #[test]
    fn test_no_reference_and_no_business_keys_yields_none() {
        let rec = record(json!({"name": "Acme"}));
        assert!(CorrelationKey::for_record(&rec, &[]).is_none());
    }
}

//! Entity kinds and attribute records.
//!
//! The engine is deliberately schema-free: a record is its identifier plus
//! a JSON attribute map, the same shape on the local and the remote side.
//! Kind-specific knowledge (business keys, synced fields) lives in strategy
//! configuration, not in concrete per-entity structs.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Attribute name carrying the remote-assigned reference key.
pub const PL_REFERENCE: &str = "pl_reference";

/// Attribute name carrying the remote soft-deletion marker.
pub const IS_DELETED: &str = "is_deleted";

/// JSON attribute map shared by local and remote records.
pub type Attributes = serde_json::Map<String, Value>;

/// The closed set of entity categories the engine synchronizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Opportunity,
    Company,
    SalesUnit,
    Note,
    Appointment,
    Task,
    User,
}

impl EntityKind {
    /// All kinds, in the default orchestration order.
    #[must_use]
    pub fn all() -> [EntityKind; 7] {
        [
            EntityKind::SalesUnit,
            EntityKind::User,
            EntityKind::Company,
            EntityKind::Opportunity,
            EntityKind::Note,
            EntityKind::Appointment,
            EntityKind::Task,
        ]
    }

    /// Singular, snake_case name. Also the routing key of inbound webhook
    /// event types (`"company.update"` routes by `"company"`).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Opportunity => "opportunity",
            EntityKind::Company => "company",
            EntityKind::SalesUnit => "sales_unit",
            EntityKind::Note => "note",
            EntityKind::Appointment => "appointment",
            EntityKind::Task => "task",
            EntityKind::User => "user",
        }
    }

    /// Plural category name used as the key in processed/skipped count maps
    /// and as the registry name of the kind's strategy.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            EntityKind::Opportunity => "opportunities",
            EntityKind::Company => "companies",
            EntityKind::SalesUnit => "sales_units",
            EntityKind::Note => "notes",
            EntityKind::Appointment => "appointments",
            EntityKind::Task => "tasks",
            EntityKind::User => "users",
        }
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when parsing an unknown entity kind name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEntityKindError {
    /// The rejected input.
    pub input: String,
}

impl Display for ParseEntityKindError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Unknown entity kind: {}", self.input)
    }
}

impl std::error::Error for ParseEntityKindError {}

impl FromStr for EntityKind {
    type Err = ParseEntityKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "opportunity" => Ok(EntityKind::Opportunity),
            "company" => Ok(EntityKind::Company),
            "sales_unit" => Ok(EntityKind::SalesUnit),
            "note" => Ok(EntityKind::Note),
            "appointment" => Ok(EntityKind::Appointment),
            "task" => Ok(EntityKind::Task),
            "user" => Ok(EntityKind::User),
            other => Err(ParseEntityKindError {
                input: other.to_string(),
            }),
        }
    }
}

/// One record on either side of a synchronization exchange.
///
/// For local records `id` is the local primary key; for records fetched
/// from the remote CRM `id` is the remote reference itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Record identifier in the system the record came from.
    pub id: String,
    /// Attribute map, including `pl_reference` / `is_deleted` markers.
    pub attributes: Attributes,
}

impl EntityRecord {
    /// Create a record from an id and attribute map.
    #[must_use]
    pub fn new(id: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            id: id.into(),
            attributes,
        }
    }

    /// Get an attribute value.
    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Get an attribute as a string slice, if present and a string.
    #[must_use]
    pub fn attr_str(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(Value::as_str)
    }

    /// Set an attribute value.
    pub fn set_attr(&mut self, name: impl Into<String>, value: Value) {
        self.attributes.insert(name.into(), value);
    }

    /// The remote reference key, if the record has been synced before.
    ///
    /// An empty string counts as absent.
    #[must_use]
    pub fn pl_reference(&self) -> Option<&str> {
        self.attr_str(PL_REFERENCE).filter(|s| !s.is_empty())
    }

    /// Store the remote reference key on the record.
    pub fn set_pl_reference(&mut self, reference: impl Into<String>) {
        self.attributes
            .insert(PL_REFERENCE.to_string(), Value::String(reference.into()));
    }

    /// Whether the record carries the soft-deletion marker.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.attr(IS_DELETED).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Mark the record as soft-deleted.
    pub fn mark_deleted(&mut self) {
        self.attributes
            .insert(IS_DELETED.to_string(), Value::Bool(true));
    }

    /// True if any of the given fields differs between the two records.
    ///
    /// A field absent on one side and present on the other counts as a
    /// difference.
    #[must_use]
    pub fn differs_in(&self, other: &EntityRecord, fields: &[String]) -> bool {
        fields.iter().any(|f| self.attr(f) != other.attr(f))
    }

    /// A copy of the record restricted to the given fields.
    #[must_use]
    pub fn project(&self, fields: &[String]) -> EntityRecord {
        let attributes = fields
            .iter()
            .filter_map(|f| self.attr(f).map(|v| (f.clone(), v.clone())))
            .collect();
        EntityRecord {
            id: self.id.clone(),
            attributes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str, attrs: Value) -> EntityRecord {
        let Value::Object(map) = attrs else {
            panic!("attrs must be an object")
        };
        EntityRecord::new(id, map)
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in EntityKind::all() {
            let parsed: EntityKind = kind.as_str().parse().unwrap();
            assert_eq!(kind, parsed);
        }
    }

    #[test]
    fn test_kind_parse_rejects_unknown() {
        let err = "invoice".parse::<EntityKind>().unwrap_err();
        assert!(err.to_string().contains("invoice"));
    }

    #[test]
    fn test_category_names_are_plural() {
        assert_eq!(EntityKind::Company.category(), "companies");
        assert_eq!(EntityKind::Opportunity.category(), "opportunities");
        assert_eq!(EntityKind::SalesUnit.category(), "sales_units");
    }

    #[test]
    fn test_pl_reference_empty_is_absent() {
        let rec = record("1", json!({"pl_reference": ""}));
        assert!(rec.pl_reference().is_none());

        let rec = record("1", json!({"pl_reference": "PL-9"}));
        assert_eq!(rec.pl_reference(), Some("PL-9"));
    }

    #[test]
    fn test_set_pl_reference() {
        let mut rec = record("1", json!({}));
        assert!(rec.pl_reference().is_none());
        rec.set_pl_reference("PL-42");
        assert_eq!(rec.pl_reference(), Some("PL-42"));
    }

    #[test]
    fn test_is_deleted_defaults_false() {
        let rec = record("1", json!({"name": "Acme"}));
        assert!(!rec.is_deleted());

        let mut rec = rec;
        rec.mark_deleted();
        assert!(rec.is_deleted());
    }

    #[test]
    fn test_differs_in_detects_missing_field() {
        let a = record("1", json!({"name": "Acme", "phone": "1"}));
        let b = record("2", json!({"name": "Acme"}));
        let fields = vec!["name".to_string(), "phone".to_string()];
        assert!(a.differs_in(&b, &fields));
        assert!(!a.differs_in(&b, &["name".to_string()]));
    }

    #[test]
    fn test_project_keeps_only_named_fields() {
        let rec = record("1", json!({"name": "Acme", "phone": "1", "city": "Oslo"}));
        let projected = rec.project(&["name".to_string(), "city".to_string()]);
        assert_eq!(projected.attributes.len(), 2);
        assert_eq!(projected.attr_str("name"), Some("Acme"));
        assert!(projected.attr("phone").is_none());
    }
}

//! Correlation resolvers.
//!
//! A resolver decides whether a local item and a remote item denote the
//! same logical entity. Resolvers are pure over the two attribute maps;
//! selection is a chain-of-responsibility scan in a fixed, configured
//! order with the reference resolver registered last as the universal
//! fallback. Exactly one resolver is consulted per correlation attempt.

use pipesync_core::entity::{Attributes, PL_REFERENCE};
use pipesync_core::EntityKind;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::error::CorrelationError;

/// Result type for a single resolution attempt.
pub type ResolveResult = Result<bool, CorrelationError>;

/// Decides whether two attribute maps denote the same logical entity.
pub trait CorrelationResolver: Send + Sync {
    /// Short name for logging.
    fn name(&self) -> &'static str;

    /// Whether this resolver applies to the given strategy kind.
    fn can_resolve_for(&self, kind: EntityKind) -> bool;

    /// Whether `a` and `b` are the same logical entity.
    ///
    /// Implementations must be symmetric and deterministic. A declared
    /// business-key attribute missing from either side is a hard
    /// [`CorrelationError::AttributeMissing`], never a silent `false`.
    fn resolve(&self, kind: EntityKind, a: &Attributes, b: &Attributes) -> ResolveResult;
}

fn str_attr<'a>(attrs: &'a Attributes, name: &str) -> Option<&'a str> {
    attrs.get(name).and_then(Value::as_str)
}

/// Matches purely on reference-key equality.
///
/// Applicable to every kind; registered last so entity-specific resolvers
/// take precedence.
#[derive(Debug, Default)]
pub struct ReferenceResolver;

impl CorrelationResolver for ReferenceResolver {
    fn name(&self) -> &'static str {
        "reference"
    }

    fn can_resolve_for(&self, _kind: EntityKind) -> bool {
        true
    }

    fn resolve(&self, _kind: EntityKind, a: &Attributes, b: &Attributes) -> ResolveResult {
        let left = str_attr(a, PL_REFERENCE).filter(|s| !s.is_empty());
        let right = str_attr(b, PL_REFERENCE).filter(|s| !s.is_empty());
        Ok(matches!((left, right), (Some(l), Some(r)) if l == r))
    }
}

/// Business-key resolver shared by the kinds that declare heuristic
/// matching: case-insensitive on the name attribute, case-sensitive on the
/// sales-unit name, both conditions required.
fn resolve_by_name_and_unit(
    kind: EntityKind,
    a: &Attributes,
    b: &Attributes,
) -> ResolveResult {
    let require = |attrs: &Attributes, attribute: &str| -> Result<String, CorrelationError> {
        str_attr(attrs, attribute)
            .map(ToString::to_string)
            .ok_or_else(|| CorrelationError::AttributeMissing {
                kind,
                attribute: attribute.to_string(),
            })
    };

    let name_a = require(a, "name")?;
    let name_b = require(b, "name")?;
    let unit_a = require(a, "sales_unit_name")?;
    let unit_b = require(b, "sales_unit_name")?;

    Ok(name_a.eq_ignore_ascii_case(&name_b) && unit_a == unit_b)
}

/// Heuristic resolver for companies.
#[derive(Debug, Default)]
pub struct CompanyResolver;

impl CorrelationResolver for CompanyResolver {
    fn name(&self) -> &'static str {
        "company"
    }

    fn can_resolve_for(&self, kind: EntityKind) -> bool {
        kind == EntityKind::Company
    }

    fn resolve(&self, kind: EntityKind, a: &Attributes, b: &Attributes) -> ResolveResult {
        resolve_by_name_and_unit(kind, a, b)
    }
}

/// Heuristic resolver for opportunities.
#[derive(Debug, Default)]
pub struct OpportunityResolver;

impl CorrelationResolver for OpportunityResolver {
    fn name(&self) -> &'static str {
        "opportunity"
    }

    fn can_resolve_for(&self, kind: EntityKind) -> bool {
        kind == EntityKind::Opportunity
    }

    fn resolve(&self, kind: EntityKind, a: &Attributes, b: &Attributes) -> ResolveResult {
        resolve_by_name_and_unit(kind, a, b)
    }
}

/// Ordered resolver chain.
///
/// The first resolver whose `can_resolve_for` accepts the kind is invoked;
/// the rest are ignored. When no resolver applies the attempt fails closed
/// (no match), forcing creation of a new counterpart.
pub struct ResolverChain {
    resolvers: Vec<Arc<dyn CorrelationResolver>>,
}

impl ResolverChain {
    /// Build a chain from an explicit ordered list.
    #[must_use]
    pub fn new(resolvers: Vec<Arc<dyn CorrelationResolver>>) -> Self {
        Self { resolvers }
    }

    /// The standard chain: entity-specific resolvers first, the generic
    /// reference resolver last.
    #[must_use]
    pub fn standard() -> Self {
        Self::new(vec![
            Arc::new(CompanyResolver),
            Arc::new(OpportunityResolver),
            Arc::new(ReferenceResolver),
        ])
    }

    /// Resolve one pair using the first applicable resolver.
    pub fn correlate(&self, kind: EntityKind, a: &Attributes, b: &Attributes) -> ResolveResult {
        match self.resolvers.iter().find(|r| r.can_resolve_for(kind)) {
            Some(resolver) => {
                let matched = resolver.resolve(kind, a, b)?;
                debug!(
                    resolver = resolver.name(),
                    kind = %kind,
                    matched,
                    "Correlation attempt"
                );
                Ok(matched)
            }
            None => {
                debug!(kind = %kind, "No applicable resolver; failing closed");
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(value: serde_json::Value) -> Attributes {
        let Value::Object(map) = value else {
            panic!("attrs must be an object")
        };
        map
    }

    #[test]
    fn test_reference_resolver_matches_equal_references() {
        let r = ReferenceResolver;
        let a = attrs(json!({"pl_reference": "PL-1"}));
        let b = attrs(json!({"pl_reference": "PL-1"}));
        assert!(r.resolve(EntityKind::Note, &a, &b).unwrap());
    }

    #[test]
    fn test_reference_resolver_requires_both_sides() {
        let r = ReferenceResolver;
        let a = attrs(json!({"pl_reference": "PL-1"}));
        let b = attrs(json!({}));
        assert!(!r.resolve(EntityKind::Note, &a, &b).unwrap());

        let empty = attrs(json!({"pl_reference": ""}));
        assert!(!r.resolve(EntityKind::Note, &a, &empty).unwrap());
    }

    #[test]
    fn test_company_resolver_case_rules() {
        let r = CompanyResolver;
        let a = attrs(json!({"name": "Acme Ltd", "sales_unit_name": "EU"}));
        let b = attrs(json!({"name": "ACME LTD", "sales_unit_name": "EU"}));
        assert!(r.resolve(EntityKind::Company, &a, &b).unwrap());

        // Unit name comparison is case-sensitive.
        let c = attrs(json!({"name": "Acme Ltd", "sales_unit_name": "eu"}));
        assert!(!r.resolve(EntityKind::Company, &a, &c).unwrap());
    }

    #[test]
    fn test_company_resolver_missing_attribute_is_fatal() {
        let r = CompanyResolver;
        let a = attrs(json!({"name": "Acme Ltd", "sales_unit_name": "EU"}));
        let b = attrs(json!({"name": "Acme Ltd"}));
        let err = r.resolve(EntityKind::Company, &a, &b).unwrap_err();
        assert_eq!(
            err,
            CorrelationError::AttributeMissing {
                kind: EntityKind::Company,
                attribute: "sales_unit_name".to_string(),
            }
        );
    }

    #[test]
    fn test_resolution_is_symmetric_and_deterministic() {
        let chain = ResolverChain::standard();
        let a = attrs(json!({"name": "Acme Ltd", "sales_unit_name": "EU"}));
        let b = attrs(json!({"name": "acme ltd", "sales_unit_name": "EU"}));

        let ab = chain.correlate(EntityKind::Company, &a, &b).unwrap();
        let ba = chain.correlate(EntityKind::Company, &b, &a).unwrap();
        assert_eq!(ab, ba);

        // Same pair twice yields the same result.
        assert_eq!(ab, chain.correlate(EntityKind::Company, &a, &b).unwrap());
    }

    #[test]
    fn test_chain_selects_specific_resolver_before_generic() {
        let chain = ResolverChain::standard();
        // Companies with matching references but differing business keys:
        // the company resolver is selected, not the reference fallback,
        // and only its verdict counts.
        let a = attrs(json!({"pl_reference": "PL-1", "name": "Acme", "sales_unit_name": "EU"}));
        let b = attrs(json!({"pl_reference": "PL-1", "name": "Other", "sales_unit_name": "EU"}));
        assert!(!chain.correlate(EntityKind::Company, &a, &b).unwrap());
    }

    #[test]
    fn test_chain_generic_fallback_for_reference_only_kinds() {
        let chain = ResolverChain::standard();
        let a = attrs(json!({"pl_reference": "PL-7"}));
        let b = attrs(json!({"pl_reference": "PL-7"}));
        assert!(chain.correlate(EntityKind::Task, &a, &b).unwrap());
    }

    #[test]
    fn test_empty_chain_fails_closed() {
        let chain = ResolverChain::new(vec![]);
        let a = attrs(json!({"pl_reference": "PL-7"}));
        let b = attrs(json!({"pl_reference": "PL-7"}));
        assert!(!chain.correlate(EntityKind::Task, &a, &b).unwrap());
    }
}

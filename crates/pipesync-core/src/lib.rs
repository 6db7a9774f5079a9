//! # Pipesync Core
//!
//! Shared building blocks for the Pipeliner synchronization engine:
//!
//! - Strongly typed identifiers ([`AggregateId`], [`SyncErrorId`], ...)
//! - [`EntityKind`] and the attribute-map [`EntityRecord`] that both sides
//!   of a synchronization exchange
//! - [`CorrelationKey`], the typed query used to look up a counterpart
//!   record in the other system

pub mod correlation_key;
pub mod entity;
pub mod ids;

pub use correlation_key::CorrelationKey;
pub use entity::{Attributes, EntityKind, EntityRecord, ParseEntityKindError};
pub use ids::{AggregateId, ParseIdError, RegistrationId, SyncErrorId, TaskId};

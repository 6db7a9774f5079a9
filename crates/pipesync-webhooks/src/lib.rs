//! # Pipesync Webhooks
//!
//! Inbound webhook handling for the Pipeliner sync engine:
//!
//! - [`WebhookRegistration`] records of remote subscriptions; events are
//!   only accepted against a live registration
//! - Structural [`validation`] of delivery envelopes
//! - A sliding-window [`dedup::DedupCache`] absorbing at-least-once
//!   redelivery
//! - The [`WebhookGateway`], which routes valid envelopes onto the
//!   engine's task queue as pull work and answers Accepted/Ignored

pub mod dedup;
pub mod error;
pub mod gateway;
pub mod models;
pub mod postgres;
pub mod store;
pub mod validation;

pub use dedup::DedupCache;
pub use error::{WebhookError, WebhookResult};
pub use gateway::{GatewayConfig, IngestOutcome, WebhookGateway};
pub use models::{InboundEnvelope, NewWebhookRegistration, WebhookBlock, WebhookRegistration};
pub use postgres::PgRegistrationStore;
pub use store::{InMemoryRegistrationStore, RegistrationStore};

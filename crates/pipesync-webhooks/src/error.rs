//! Webhook subsystem errors.
//!
//! Validation problems are not errors: they become `Ignored` outcomes and
//! never propagate to the remote caller. These variants cover the
//! infrastructure failures underneath the gateway.

use thiserror::Error;

/// Result type for webhook operations.
pub type WebhookResult<T> = Result<T, WebhookError>;

/// Infrastructure errors in the webhook subsystem.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Registration storage failure.
    #[error("Store error: {0}")]
    Store(String),

    /// A registration addressed by id does not exist.
    #[error("Webhook registration not found: {0}")]
    NotFound(String),

    /// Invalid registration input.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The task queue rejected a unit of work.
    #[error("Task queue error: {0}")]
    Queue(String),
}

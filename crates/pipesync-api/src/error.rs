//! API error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use pipesync_engine::EngineError;
use pipesync_webhooks::WebhookError;

/// Errors surfaced by the HTTP layer.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Engine failure.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Webhook subsystem failure.
    #[error(transparent)]
    Webhook(#[from] WebhookError),

    /// Request validation failure.
    #[error("Validation error: {0}")]
    Validation(String),
}

impl ApiError {
    /// HTTP status for the error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Engine(e) => match e {
                EngineError::UnknownStrategy { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                EngineError::LedgerNotFound { .. } => StatusCode::NOT_FOUND,
                EngineError::LedgerAlreadyArchived { .. }
                | EngineError::LedgerNotArchived { .. }
                | EngineError::AlreadyRunning { .. } => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Webhook(e) => match e {
                WebhookError::NotFound(_) => StatusCode::NOT_FOUND,
                WebhookError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({"error": self.to_string()}));
        (status, body).into_response()
    }
}

//! HTTP endpoint handlers.
//!
//! The status callback handler runs behind the signature gate in
//! production. It always answers `200` once the request is well formed,
//! so the provider does not retry on our own failures.

use std::sync::Arc;

use axum::{
    extract::{Form, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::broker::BrokerFactory;
use crate::callback::CallbackService;
use crate::Config;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub factory: BrokerFactory,
    pub callbacks: CallbackService,
}

impl AppState {
    pub fn new(config: Config, factory: BrokerFactory, callbacks: CallbackService) -> Self {
        Self {
            config: Arc::new(config),
            factory,
            callbacks,
        }
    }
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

/// Health check endpoint; healthy while at least one broker is reachable.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    match state.factory.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok".to_string(),
            }),
        ),
        Err(e) => {
            error!(error = %e, "health_check_failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unavailable".to_string(),
                }),
            )
        }
    }
}

// =============================================================================
// Twilio Status Callback
// =============================================================================

/// Query parameters set on the callback URL when the message was sent.
///
/// `attempts` is the send count the sender recorded for the notification;
/// without it a failed delivery is final.
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    #[serde(default)]
    pub notification_id: String,
    #[serde(default)]
    pub attempts: Option<u32>,
}

/// Twilio status callback form.
///
/// Twilio sends many more fields; only these are read.
#[derive(Debug, Deserialize)]
pub struct StatusCallbackForm {
    #[serde(default, rename = "MessageSid")]
    pub message_sid: String,
    #[serde(default, rename = "MessageStatus")]
    pub message_status: String,
}

/// Twilio delivery-status callback endpoint.
pub async fn status_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
    Form(form): Form<StatusCallbackForm>,
) -> StatusCode {
    if form.message_sid.is_empty() || form.message_status.is_empty() {
        info!(
            sid = %form.message_sid,
            status = %form.message_status,
            "twilio_callback_missing_field"
        );
        return StatusCode::BAD_REQUEST;
    }

    let processed = tokio::time::timeout(
        state.config.context_timeout,
        state.callbacks.process_callback(
            &query.notification_id,
            &form.message_sid,
            &form.message_status,
            query.attempts,
        ),
    )
    .await;

    match processed {
        Ok(Ok(_)) => {
            info!(
                sid = %form.message_sid,
                status = %form.message_status,
                "twilio_callback_processed"
            );
        }
        Ok(Err(e)) => {
            error!(
                sid = %form.message_sid,
                status = %form.message_status,
                error = %e,
                "twilio_callback_failed"
            );
        }
        Err(_) => {
            warn!(
                sid = %form.message_sid,
                timeout_ms = state.config.context_timeout.as_millis() as u64,
                "twilio_callback_timed_out"
            );
        }
    }

    StatusCode::OK
}

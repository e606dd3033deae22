//! Web server module for provider callbacks.
//!
//! This module provides:
//! - The signature gate authenticating Twilio callbacks
//! - The status callback and health endpoints
//! - [`router`], which assembles them
//!
//! ```text
//! Twilio → WebhookAuthGate → status_callback → CallbackService → Kafka
//! ```

pub mod form;
pub mod gate;
pub mod handlers;
pub mod signature;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub use gate::{require_valid_signature, GateRejection, WebhookAuthGate};
pub use handlers::{health, status_callback, AppState, HealthResponse, StatusCallbackForm};
pub use signature::{RequestValidator, TwilioRequestValidator, SIGNATURE_HEADER};

/// Path Twilio posts delivery-status callbacks to.
pub const STATUS_CALLBACK_PATH: &str = "/twilio/status-callback";

/// Build the application router.
///
/// When `gate` is set, the callback route only runs for requests that pass
/// signature verification. The health route is never gated.
pub fn router(state: AppState, gate: Option<WebhookAuthGate>) -> Router {
    let mut callbacks = Router::new().route(STATUS_CALLBACK_PATH, post(status_callback));

    if let Some(gate) = gate {
        callbacks = callbacks.route_layer(middleware::from_fn_with_state(
            gate,
            require_valid_signature,
        ));
    }

    Router::new()
        .route("/health", get(health))
        .merge(callbacks)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

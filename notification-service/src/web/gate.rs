//! Signature gate for inbound provider callbacks.
//!
//! The gate rebuilds the URL and parameters the provider signed, checks the
//! signature header, and only then lets the request through:
//! - unparsable body or query → `400`, the validator is never consulted
//! - signature mismatch (including a missing header) → `403`
//! - otherwise the request reaches the next handler with its body intact

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{header::CONTENT_TYPE, request::Parts, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use super::form::{self, FormError, FormParams};
use super::signature::{RequestValidator, SIGNATURE_HEADER};

/// Largest body the gate will buffer.
pub const MAX_FORM_BODY_BYTES: usize = 10 << 20;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Why the gate refused a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateRejection {
    /// Body, query or content type could not be parsed.
    BadRequest,
    /// The signature did not match.
    Forbidden,
}

impl From<FormError> for GateRejection {
    fn from(_: FormError) -> Self {
        GateRejection::BadRequest
    }
}

impl IntoResponse for GateRejection {
    fn into_response(self) -> Response {
        match self {
            GateRejection::BadRequest => StatusCode::BAD_REQUEST.into_response(),
            GateRejection::Forbidden => StatusCode::FORBIDDEN.into_response(),
        }
    }
}

/// Authenticates provider callbacks against a fixed external base URL.
///
/// The base URL comes from configuration, never from the request's own
/// `Host` header.
#[derive(Clone)]
pub struct WebhookAuthGate {
    base_url: Arc<str>,
    validator: Arc<dyn RequestValidator>,
}

impl WebhookAuthGate {
    pub fn new(base_url: impl Into<String>, validator: Arc<dyn RequestValidator>) -> Self {
        Self {
            base_url: Arc::from(base_url.into()),
            validator,
        }
    }

    /// URL the provider signed for a request to `path`.
    pub fn canonical_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Decide whether a request with these parts and body may pass.
    pub fn authorize(&self, parts: &Parts, body: &[u8]) -> Result<(), GateRejection> {
        let url = self.canonical_url(parts.uri.path());

        if let Some(query) = parts.uri.query() {
            form::parse(query.as_bytes()).map_err(|e| {
                warn!(error = %e, "webhook_query_malformed");
                GateRejection::BadRequest
            })?;
        }

        let params = if has_form_body(&parts.headers)? {
            let pairs = form::parse(body).map_err(|e| {
                warn!(error = %e, body_length = body.len(), "webhook_body_malformed");
                GateRejection::BadRequest
            })?;
            form::first_values(pairs)
        } else {
            FormParams::new()
        };

        let signature = parts
            .headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        if !self.validator.validate(&url, &params, signature) {
            warn!(
                url = %url,
                has_signature = !signature.is_empty(),
                "webhook_signature_invalid"
            );
            return Err(GateRejection::Forbidden);
        }

        debug!(url = %url, param_count = params.len(), "webhook_signature_valid");
        Ok(())
    }
}

/// Whether the body should be decoded as form data.
///
/// Absent or non-form content types carry no parameters. A header that is
/// present but not a media type is malformed.
fn has_form_body(headers: &HeaderMap) -> Result<bool, GateRejection> {
    let Some(value) = headers.get(CONTENT_TYPE) else {
        return Ok(false);
    };

    let value = value.to_str().map_err(|_| GateRejection::BadRequest)?;
    let essence = value.split(';').next().unwrap_or("").trim();

    if essence.is_empty() {
        return Ok(false);
    }

    match essence.split_once('/') {
        Some((kind, subtype)) if !kind.is_empty() && !subtype.is_empty() => {
            Ok(essence.eq_ignore_ascii_case(FORM_CONTENT_TYPE))
        }
        _ => {
            warn!(content_type = %value, "webhook_content_type_malformed");
            Err(GateRejection::BadRequest)
        }
    }
}

/// Axum middleware running [`WebhookAuthGate`] in front of a route.
pub async fn require_valid_signature(
    State(gate): State<WebhookAuthGate>,
    request: Request,
    next: Next,
) -> Response {
    let (parts, body) = request.into_parts();

    let bytes = match to_bytes(body, MAX_FORM_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "webhook_body_unreadable");
            return GateRejection::BadRequest.into_response();
        }
    };

    if let Err(rejection) = gate.authorize(&parts, &bytes) {
        return rejection.into_response();
    }

    next.run(Request::from_parts(parts, Body::from(bytes))).await
}

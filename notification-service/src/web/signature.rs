//! Twilio webhook signature verification.
//!
//! Twilio signs each callback with HMAC-SHA1 over the full callback URL
//! followed by every POST parameter, sorted by name, with key and value
//! concatenated. The base64 digest is sent in `X-Twilio-Signature`.
//! Reference: https://www.twilio.com/docs/usage/webhooks/webhooks-security

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use subtle::ConstantTimeEq;
use tracing::warn;

use super::form::FormParams;

type HmacSha1 = Hmac<Sha1>;

/// Header carrying the provider's signature.
pub const SIGNATURE_HEADER: &str = "X-Twilio-Signature";

/// Decides whether a signature matches a canonical request.
///
/// `params` iterates in ascending key order, which is the order the
/// provider signs in. Keys and values are the decoded bytes, not
/// necessarily UTF-8.
pub trait RequestValidator: Send + Sync {
    fn validate(&self, url: &str, params: &FormParams, signature: &str) -> bool;
}

/// HMAC-SHA1 validator keyed by the account auth token.
#[derive(Clone)]
pub struct TwilioRequestValidator {
    auth_token: String,
}

impl fmt::Debug for TwilioRequestValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwilioRequestValidator")
            .field("auth_token", &"<redacted>")
            .finish()
    }
}

impl TwilioRequestValidator {
    pub fn new(auth_token: impl Into<String>) -> Self {
        Self {
            auth_token: auth_token.into(),
        }
    }

    /// Compute the base64 signature the provider would send for this request.
    pub fn signature(
        &self,
        url: &str,
        params: &FormParams,
    ) -> Result<String, InvalidLength> {
        let mut mac = HmacSha1::new_from_slice(self.auth_token.as_bytes())?;
        mac.update(&canonical_input(url, params));
        Ok(STANDARD.encode(mac.finalize().into_bytes()))
    }
}

impl RequestValidator for TwilioRequestValidator {
    fn validate(&self, url: &str, params: &FormParams, signature: &str) -> bool {
        let expected = match self.signature(url, params) {
            Ok(s) => s,
            Err(_) => {
                warn!("webhook_signature_invalid_key");
                return false;
            }
        };

        // Constant-time comparison to prevent timing attacks
        let valid: bool = expected.as_bytes().ct_eq(signature.as_bytes()).into();

        if !valid {
            warn!(
                url = %url,
                param_count = params.len(),
                has_signature = !signature.is_empty(),
                actual_length = signature.len(),
                "webhook_signature_mismatch"
            );
        }

        valid
    }
}

/// URL followed by each key and value, in key order, with no separators.
pub fn canonical_input(url: &str, params: &FormParams) -> Vec<u8> {
    let capacity = url.len() + params.iter().map(|(k, v)| k.len() + v.len()).sum::<usize>();
    let mut out = Vec::with_capacity(capacity);
    out.extend_from_slice(url.as_bytes());
    for (key, value) in params {
        out.extend_from_slice(key);
        out.extend_from_slice(value);
    }
    out
}

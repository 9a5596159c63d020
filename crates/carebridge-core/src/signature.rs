//! # Signature Verification Module
//!
//! Per-provider authenticity checks for inbound webhook bodies.
//!
//! Three verifier families share one contract: a failed verification must
//! cause the caller to reject the request before any idempotency or queueing
//! work happens, and verification is never retried within the same request.
//!
//! | Verifier | Scheme | Missing secret |
//! |----------|--------|----------------|
//! | [`InstagramSignatureVerifier`] | HMAC-SHA256, `sha256=<hex>` header | hard error (fail loudly) |
//! | [`RazorpaySignatureVerifier`] | HMAC-SHA256, plain hex header | fails closed (`false`) |
//! | [`PaypalSignatureVerifier`] | provider-side verify endpoint | fails closed (`false`) |
//!
//! Signature header values and raw bodies are never logged, at any level.

use crate::CorrelationId;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tracing::{error, instrument, warn};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the Meta-platform signature.
pub const INSTAGRAM_SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Header carrying the Razorpay signature.
pub const RAZORPAY_SIGNATURE_HEADER: &str = "x-razorpay-signature";

/// Sentinel the PayPal verify endpoint returns for an authentic delivery.
const PAYPAL_VERIFICATION_SUCCESS: &str = "SUCCESS";

/// Bounded timeout for remote verification calls; the webhook path must
/// answer well inside the provider's delivery timeout.
const REMOTE_VERIFY_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Error Types
// ============================================================================

/// Errors from signature verification.
///
/// Note that an *invalid* signature is not an error: verifiers return
/// `Ok(false)` for that. Errors are reserved for operational
/// misconfiguration that must never be confused with a request-level reject.
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    /// The shared secret for a provider was absent from configuration.
    ///
    /// A verifier that silently accepted or rejected in this state would be
    /// an authentication bypass (or a silent outage), so the chat-provider
    /// path surfaces it as a distinct internal error.
    #[error("Webhook secret not configured for provider '{provider}'")]
    SecretNotConfigured { provider: &'static str },
}

// ============================================================================
// Shared helpers
// ============================================================================

/// Compute the HMAC-SHA256 of `body` keyed by `secret`, hex-encoded.
fn hmac_sha256_hex(secret: &str, body: &[u8]) -> String {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time byte comparison; execution time does not depend on where the
/// inputs first differ.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

// ============================================================================
// InstagramSignatureVerifier
// ============================================================================

/// Verifier for the Meta-platform chat provider.
///
/// The signature arrives as `sha256=<hex>` in the `X-Hub-Signature-256`
/// header and covers the raw, unparsed request bytes.
#[derive(Clone)]
pub struct InstagramSignatureVerifier {
    app_secret: Option<String>,
}

impl std::fmt::Debug for InstagramSignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstagramSignatureVerifier")
            .field("app_secret", &self.app_secret.as_ref().map(|_| "<REDACTED>"))
            .finish()
    }
}

impl InstagramSignatureVerifier {
    /// Construct with the configured app secret, if any.
    pub fn new(app_secret: Option<String>) -> Self {
        if app_secret.is_none() {
            warn!(
                "Instagram app secret is not configured; every delivery on the \
                 chat route will fail with a configuration error"
            );
        }
        Self { app_secret }
    }

    /// Verify a delivery.
    ///
    /// Returns `Ok(false)` for a missing header, a header without the
    /// `sha256=` scheme, or a digest mismatch.
    ///
    /// # Errors
    ///
    /// Returns [`SignatureError::SecretNotConfigured`] when no app secret was
    /// configured. This is a deployment error, not a request error, and must
    /// fail loudly rather than silently accept or reject.
    #[instrument(skip(self, signature_header, body), fields(correlation_id = %correlation_id))]
    pub fn verify(
        &self,
        signature_header: Option<&str>,
        body: &[u8],
        correlation_id: &CorrelationId,
    ) -> Result<bool, SignatureError> {
        let secret = self
            .app_secret
            .as_deref()
            .ok_or(SignatureError::SecretNotConfigured {
                provider: "instagram",
            })?;

        let Some(header) = signature_header else {
            warn!("Missing signature header on chat-provider delivery");
            return Ok(false);
        };

        let Some(received_hex) = header.strip_prefix("sha256=") else {
            warn!("Signature header does not carry the sha256 scheme");
            return Ok(false);
        };

        let expected_hex = hmac_sha256_hex(secret, body);
        Ok(constant_time_eq(
            expected_hex.as_bytes(),
            received_hex.as_bytes(),
        ))
    }
}

// ============================================================================
// RazorpaySignatureVerifier
// ============================================================================

/// Verifier for the HMAC-based payment provider.
///
/// Same HMAC-SHA256-over-raw-body pattern as the chat provider but without
/// a scheme prefix. A missing secret fails closed instead of raising: this
/// path runs per-request inside payment webhook handling and must not crash
/// request handling.
#[derive(Clone)]
pub struct RazorpaySignatureVerifier {
    webhook_secret: Option<String>,
}

impl std::fmt::Debug for RazorpaySignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RazorpaySignatureVerifier")
            .field(
                "webhook_secret",
                &self.webhook_secret.as_ref().map(|_| "<REDACTED>"),
            )
            .finish()
    }
}

impl RazorpaySignatureVerifier {
    /// Construct with the configured webhook secret, if any.
    pub fn new(webhook_secret: Option<String>) -> Self {
        Self { webhook_secret }
    }

    /// Verify a delivery; fails closed on any missing input.
    #[instrument(skip(self, signature_header, body), fields(correlation_id = %correlation_id))]
    pub fn verify(
        &self,
        signature_header: Option<&str>,
        body: &[u8],
        correlation_id: &CorrelationId,
    ) -> bool {
        let Some(secret) = self.webhook_secret.as_deref() else {
            error!("Razorpay webhook secret not configured; rejecting delivery");
            return false;
        };

        let Some(received_hex) = signature_header else {
            warn!("Missing signature header on Razorpay delivery");
            return false;
        };

        let expected_hex = hmac_sha256_hex(secret, body);
        constant_time_eq(expected_hex.as_bytes(), received_hex.as_bytes())
    }
}

// ============================================================================
// PaypalSignatureVerifier
// ============================================================================

/// The five webhook-specific transmission headers PayPal sends with every
/// delivery. All five must be present for verification to proceed.
#[derive(Debug, Clone)]
pub struct PaypalTransmissionHeaders {
    pub auth_algo: String,
    pub cert_url: String,
    pub transmission_id: String,
    pub transmission_sig: String,
    pub transmission_time: String,
}

impl PaypalTransmissionHeaders {
    /// Extract from a lower-cased header map; `None` when any header is
    /// absent.
    pub fn from_headers(headers: &HashMap<String, String>) -> Option<Self> {
        Some(Self {
            auth_algo: headers.get("paypal-auth-algo")?.clone(),
            cert_url: headers.get("paypal-cert-url")?.clone(),
            transmission_id: headers.get("paypal-transmission-id")?.clone(),
            transmission_sig: headers.get("paypal-transmission-sig")?.clone(),
            transmission_time: headers.get("paypal-transmission-time")?.clone(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct OauthTokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct VerifySignatureResponse {
    verification_status: String,
}

/// Verifier for the remote-verification payment provider.
///
/// PayPal does not support local HMAC verification; the transmission headers,
/// a server-obtained OAuth bearer token, the configured webhook id, and the
/// delivered event are POSTed to the provider's own verify endpoint, and only
/// its `SUCCESS` sentinel is accepted.
///
/// Every failure mode (missing header, missing webhook id, OAuth failure,
/// network error, timeout, non-success response) fails closed. No header
/// values or body content are logged on failure.
#[derive(Clone)]
pub struct PaypalSignatureVerifier {
    client: reqwest::Client,
    client_id: String,
    client_secret: String,
    webhook_id: Option<String>,
    base_url: String,
}

impl std::fmt::Debug for PaypalSignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaypalSignatureVerifier")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<REDACTED>")
            .field("webhook_id", &self.webhook_id)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl PaypalSignatureVerifier {
    /// Construct a verifier against the given API base URL.
    ///
    /// The base URL is injectable so tests can point at a local mock server;
    /// production configuration uses the live or sandbox PayPal host.
    pub fn new(
        client_id: String,
        client_secret: String,
        webhook_id: Option<String>,
        base_url: String,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REMOTE_VERIFY_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            client,
            client_id,
            client_secret,
            webhook_id,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Obtain an OAuth bearer token via the client-credentials grant.
    async fn fetch_access_token(&self) -> Option<String> {
        let response = self
            .client
            .post(format!("{}/v1/oauth2/token", self.base_url))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .ok()?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "PayPal OAuth token request failed");
            return None;
        }

        let token: OauthTokenResponse = response.json().await.ok()?;
        Some(token.access_token)
    }

    /// Verify a delivery against the provider's verify-signature endpoint.
    ///
    /// `event` is the parsed delivery payload, passed through verbatim as the
    /// `webhook_event` field of the verification request.
    #[instrument(skip(self, headers, event), fields(correlation_id = %correlation_id))]
    pub async fn verify(
        &self,
        headers: &HashMap<String, String>,
        event: &serde_json::Value,
        correlation_id: &CorrelationId,
    ) -> bool {
        let Some(webhook_id) = self.webhook_id.as_deref() else {
            error!("PayPal webhook id not configured; rejecting delivery");
            return false;
        };

        let Some(transmission) = PaypalTransmissionHeaders::from_headers(headers) else {
            warn!("Missing PayPal transmission headers; rejecting delivery");
            return false;
        };

        let Some(token) = self.fetch_access_token().await else {
            warn!("Could not obtain PayPal access token; rejecting delivery");
            return false;
        };

        let request_body = serde_json::json!({
            "auth_algo": transmission.auth_algo,
            "cert_url": transmission.cert_url,
            "transmission_id": transmission.transmission_id,
            "transmission_sig": transmission.transmission_sig,
            "transmission_time": transmission.transmission_time,
            "webhook_id": webhook_id,
            "webhook_event": event,
        });

        let response = match self
            .client
            .post(format!(
                "{}/v1/notifications/verify-webhook-signature",
                self.base_url
            ))
            .bearer_auth(token)
            .json(&request_body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(_) => {
                warn!("PayPal verify-signature call failed; rejecting delivery");
                return false;
            }
        };

        if !response.status().is_success() {
            warn!(status = %response.status(), "PayPal verify-signature returned non-success");
            return false;
        }

        match response.json::<VerifySignatureResponse>().await {
            Ok(body) => body.verification_status == PAYPAL_VERIFICATION_SUCCESS,
            Err(_) => {
                warn!("PayPal verify-signature response could not be parsed; rejecting delivery");
                false
            }
        }
    }
}

#[cfg(test)]
#[path = "signature_tests.rs"]
mod tests;

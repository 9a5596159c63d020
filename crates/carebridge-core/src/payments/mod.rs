//! # Payment Webhook Adapters
//!
//! A uniform contract every payment provider implementation satisfies, so
//! the entrypoint and the idempotency/queue machinery stay provider-agnostic
//! and downstream business logic can treat all providers identically.

use crate::signature::SignatureError;
use crate::{CorrelationId, Provider};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

mod paypal;
mod razorpay;

pub use paypal::PaypalAdapter;
pub use razorpay::RazorpayAdapter;

// ============================================================================
// Normalized Types
// ============================================================================

/// Canonical status carried by a normalized success fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Funds captured; the payment succeeded.
    Captured,
}

/// Normalized "payment succeeded" fact extracted from a provider payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSuccess {
    /// Gateway-side order identifier.
    pub gateway_order_id: String,
    /// Gateway-side payment identifier, when the provider exposes one.
    pub gateway_payment_id: Option<String>,
    /// Amount in minor units (paise, cents).
    pub amount_minor: i64,
    /// ISO currency code as delivered by the gateway.
    pub currency: String,
    pub status: PaymentStatus,
}

// ============================================================================
// Adapter Trait
// ============================================================================

/// Uniform webhook contract for one payment provider.
#[async_trait]
pub trait PaymentWebhookAdapter: Send + Sync {
    /// The provider this adapter serves.
    fn provider(&self) -> Provider;

    /// Verify the delivery's authenticity. Delegates to the provider's
    /// signature verifier; `Ok(false)` means reject with an authentication
    /// failure, `Err` means the verifier itself is misconfigured.
    async fn verify_webhook(
        &self,
        headers: &HashMap<String, String>,
        raw_body: &[u8],
        correlation_id: &CorrelationId,
    ) -> Result<bool, SignatureError>;

    /// Derive a stable event identity for idempotency.
    ///
    /// Prefers a provider-supplied event-id header, then a payment/order/link
    /// entity id from the payload, then a content hash, always namespaced
    /// with the provider name so ids from different providers can never
    /// collide even when their internal schemes coincide.
    fn extract_event_id(&self, payload: &Value, headers: &HashMap<String, String>) -> String;

    /// Extract the normalized success fact, or `None` for event types that
    /// are not a "payment succeeded" signal. Callers treat `None` as
    /// "acknowledge but do not act".
    fn parse_success_payload(&self, payload: &Value) -> Option<PaymentSuccess>;
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;

//! Razorpay webhook adapter.
//!
//! Verification is local HMAC over the raw body. Event identity prefers the
//! provider's `x-razorpay-event-id` header; payloads carry entities under
//! `payload.payment.entity` / `payload.order.entity` /
//! `payload.payment_link.entity`, with amounts already in minor units.

use crate::event_id::EventIdentifier;
use crate::payments::{PaymentStatus, PaymentSuccess, PaymentWebhookAdapter};
use crate::signature::{RazorpaySignatureVerifier, SignatureError, RAZORPAY_SIGNATURE_HEADER};
use crate::{CorrelationId, Provider};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Header carrying Razorpay's own delivery identifier.
pub const RAZORPAY_EVENT_ID_HEADER: &str = "x-razorpay-event-id";

/// Event types that signal a successful payment.
const SUCCESS_EVENTS: [&str; 2] = ["payment.captured", "payment_link.paid"];

/// Adapter for the HMAC-verified payment provider.
#[derive(Debug, Clone)]
pub struct RazorpayAdapter {
    verifier: RazorpaySignatureVerifier,
}

impl RazorpayAdapter {
    pub fn new(verifier: RazorpaySignatureVerifier) -> Self {
        Self { verifier }
    }

    /// First entity id found under the known payload containers, in a fixed
    /// priority order.
    fn entity_id(payload: &Value) -> Option<&str> {
        ["payment", "order", "payment_link"].into_iter().find_map(|container| {
            payload
                .get("payload")?
                .get(container)?
                .get("entity")?
                .get("id")?
                .as_str()
        })
    }
}

#[async_trait]
impl PaymentWebhookAdapter for RazorpayAdapter {
    fn provider(&self) -> Provider {
        Provider::Razorpay
    }

    async fn verify_webhook(
        &self,
        headers: &HashMap<String, String>,
        raw_body: &[u8],
        correlation_id: &CorrelationId,
    ) -> Result<bool, SignatureError> {
        let signature = headers.get(RAZORPAY_SIGNATURE_HEADER).map(String::as_str);
        Ok(self.verifier.verify(signature, raw_body, correlation_id))
    }

    fn extract_event_id(&self, payload: &Value, headers: &HashMap<String, String>) -> String {
        if let Some(event_id) = headers.get(RAZORPAY_EVENT_ID_HEADER) {
            if !event_id.is_empty() {
                return format!("razorpay:{}", event_id);
            }
        }

        if let Some(entity_id) = Self::entity_id(payload) {
            return format!("razorpay:{}", entity_id);
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        format!("razorpay:{}", EventIdentifier::fallback_hash(payload, now))
    }

    fn parse_success_payload(&self, payload: &Value) -> Option<PaymentSuccess> {
        let event = payload.get("event")?.as_str()?;
        if !SUCCESS_EVENTS.contains(&event) {
            return None;
        }

        if event == "payment.captured" {
            let entity = payload.get("payload")?.get("payment")?.get("entity")?;
            let payment_id = entity.get("id")?.as_str()?.to_string();
            // Captured payments usually reference an order; fall back to the
            // payment id itself for orderless flows.
            let order_id = entity
                .get("order_id")
                .and_then(Value::as_str)
                .unwrap_or(&payment_id)
                .to_string();

            return Some(PaymentSuccess {
                gateway_order_id: order_id,
                gateway_payment_id: Some(payment_id),
                amount_minor: entity.get("amount")?.as_i64()?,
                currency: entity.get("currency")?.as_str()?.to_string(),
                status: PaymentStatus::Captured,
            });
        }

        // payment_link.paid
        let link = payload.get("payload")?.get("payment_link")?.get("entity")?;
        let payment_id = payload
            .get("payload")
            .and_then(|p| p.get("payment"))
            .and_then(|p| p.get("entity"))
            .and_then(|e| e.get("id"))
            .and_then(Value::as_str)
            .map(String::from);

        Some(PaymentSuccess {
            gateway_order_id: link.get("id")?.as_str()?.to_string(),
            gateway_payment_id: payment_id,
            amount_minor: link.get("amount_paid").or_else(|| link.get("amount"))?.as_i64()?,
            currency: link.get("currency")?.as_str()?.to_string(),
            status: PaymentStatus::Captured,
        })
    }
}

#[cfg(test)]
#[path = "razorpay_tests.rs"]
mod tests;

//! PayPal webhook adapter.
//!
//! Verification is remote (the provider's verify-signature endpoint). Event
//! identity prefers the delivery's own `id`; amounts arrive as decimal
//! strings (`"10.00"`) and are converted to minor units.

use crate::event_id::EventIdentifier;
use crate::payments::{PaymentStatus, PaymentSuccess, PaymentWebhookAdapter};
use crate::signature::{PaypalSignatureVerifier, SignatureError};
use crate::{CorrelationId, Provider};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Event types that signal a successful payment.
const CAPTURE_COMPLETED: &str = "PAYMENT.CAPTURE.COMPLETED";
const ORDER_COMPLETED: &str = "CHECKOUT.ORDER.COMPLETED";

/// Adapter for the remote-verification payment provider.
#[derive(Debug, Clone)]
pub struct PaypalAdapter {
    verifier: PaypalSignatureVerifier,
}

impl PaypalAdapter {
    pub fn new(verifier: PaypalSignatureVerifier) -> Self {
        Self { verifier }
    }
}

/// Convert a decimal money string (`"10.00"`, `"7.5"`, `"12"`) to minor
/// units. Returns `None` for malformed input or more than two fraction
/// digits.
fn decimal_to_minor_units(value: &str) -> Option<i64> {
    let (units, fraction) = match value.split_once('.') {
        Some((units, fraction)) => (units, fraction),
        None => (value, ""),
    };

    if fraction.len() > 2 || !fraction.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let units: i64 = units.parse().ok()?;
    if units < 0 {
        return None;
    }

    let cents: i64 = if fraction.is_empty() {
        0
    } else {
        // Right-pad to two digits: "5" means 50 minor units.
        format!("{:0<2}", fraction).parse().ok()?
    };

    units.checked_mul(100)?.checked_add(cents)
}

#[async_trait]
impl PaymentWebhookAdapter for PaypalAdapter {
    fn provider(&self) -> Provider {
        Provider::Paypal
    }

    async fn verify_webhook(
        &self,
        headers: &HashMap<String, String>,
        raw_body: &[u8],
        correlation_id: &CorrelationId,
    ) -> Result<bool, SignatureError> {
        // The verify endpoint takes the delivered event as JSON; a body that
        // does not parse can never verify.
        let event: Value = match serde_json::from_slice(raw_body) {
            Ok(event) => event,
            Err(_) => {
                warn!("PayPal delivery body is not valid JSON; rejecting");
                return Ok(false);
            }
        };

        Ok(self.verifier.verify(headers, &event, correlation_id).await)
    }

    fn extract_event_id(&self, payload: &Value, _headers: &HashMap<String, String>) -> String {
        // The webhook event's own id is the natural identity.
        if let Some(id) = payload.get("id").and_then(Value::as_str) {
            if !id.is_empty() {
                return format!("paypal:{}", id);
            }
        }

        if let Some(resource_id) = payload
            .get("resource")
            .and_then(|r| r.get("id"))
            .and_then(Value::as_str)
        {
            if !resource_id.is_empty() {
                return format!("paypal:{}", resource_id);
            }
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        format!("paypal:{}", EventIdentifier::fallback_hash(payload, now))
    }

    fn parse_success_payload(&self, payload: &Value) -> Option<PaymentSuccess> {
        let event_type = payload.get("event_type")?.as_str()?;
        let resource = payload.get("resource")?;

        match event_type {
            CAPTURE_COMPLETED => {
                let capture_id = resource.get("id")?.as_str()?.to_string();
                let order_id = resource
                    .get("supplementary_data")
                    .and_then(|s| s.get("related_ids"))
                    .and_then(|r| r.get("order_id"))
                    .and_then(Value::as_str)
                    .unwrap_or(&capture_id)
                    .to_string();
                let amount = resource.get("amount")?;

                Some(PaymentSuccess {
                    gateway_order_id: order_id,
                    gateway_payment_id: Some(capture_id),
                    amount_minor: decimal_to_minor_units(amount.get("value")?.as_str()?)?,
                    currency: amount.get("currency_code")?.as_str()?.to_string(),
                    status: PaymentStatus::Captured,
                })
            }
            ORDER_COMPLETED => {
                let order_id = resource.get("id")?.as_str()?.to_string();
                let amount = resource
                    .get("purchase_units")?
                    .get(0)?
                    .get("amount")?;

                Some(PaymentSuccess {
                    gateway_order_id: order_id,
                    gateway_payment_id: None,
                    amount_minor: decimal_to_minor_units(amount.get("value")?.as_str()?)?,
                    currency: amount.get("currency_code")?.as_str()?.to_string(),
                    status: PaymentStatus::Captured,
                })
            }
            _ => None,
        }
    }
}

#[cfg(test)]
#[path = "paypal_tests.rs"]
mod tests;

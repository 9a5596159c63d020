//! # Carebridge Core
//!
//! Core pipeline for the Carebridge webhook intake service.
//!
//! This crate turns inbound webhook deliveries from external platforms (a
//! chat/messaging provider and two payment providers) into durably-claimed,
//! exactly-once processing jobs:
//!
//! - signature verification per provider ([`signature`])
//! - stable event-identity derivation ([`event_id`])
//! - idempotency bookkeeping ([`idempotency`])
//! - queued hand-off with bounded retry ([`queue`])
//! - encrypted dead-letter persistence ([`crypto`], [`dead_letter`])
//! - normalized payment webhook contracts ([`payments`])
//!
//! ## Architecture
//!
//! Business logic depends only on trait abstractions; infrastructure
//! implementations live in [`adapters`] and are injected at runtime.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

pub mod adapters;
pub mod crypto;
pub mod dead_letter;
pub mod event_id;
pub mod idempotency;
pub mod payments;
pub mod queue;
pub mod signature;

// Re-export commonly used types
pub use uuid::Uuid;

// ============================================================================
// Domain Identifier Types
// ============================================================================

/// External platform that delivers webhooks to the pipeline.
///
/// The provider is always known from the inbound route, never guessed from
/// payload shape. Each variant has exactly one signing scheme and one
/// event-identity scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// Meta-platform chat provider (HMAC-SHA256, `sha256=<hex>` header).
    Instagram,
    /// HMAC-verified payment provider.
    Razorpay,
    /// Remote-verification payment provider.
    Paypal,
}

impl Provider {
    /// Stable string form, used as route segment, idempotency-key component,
    /// and job name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Instagram => "instagram",
            Self::Razorpay => "razorpay",
            Self::Paypal => "paypal",
        }
    }

    /// Whether this provider is a payment gateway.
    pub fn is_payment(&self) -> bool {
        matches!(self, Self::Razorpay | Self::Paypal)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Provider {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "instagram" => Ok(Self::Instagram),
            "razorpay" => Ok(Self::Razorpay),
            "paypal" => Ok(Self::Paypal),
            other => Err(ParseError::UnknownProvider {
                value: other.to_string(),
            }),
        }
    }
}

/// Correlation identifier threaded through every log line for one delivery.
///
/// Generated at the HTTP boundary (or taken from an `x-correlation-id`
/// header when the upstream supplies one) and carried into the queue job so
/// the asynchronous worker logs can be joined with the ingress logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generate a new random correlation ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get string representation.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CorrelationId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = Uuid::parse_str(s).map_err(|_| ParseError::InvalidFormat {
            expected: "UUID format".to_string(),
            actual: s.to_string(),
        })?;
        Ok(Self(uuid))
    }
}

/// UTC timestamp wrapper used across records and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Current wall-clock time.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Wrap an existing datetime.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Underlying datetime.
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Seconds since the Unix epoch (clamped to zero for pre-epoch times).
    pub fn unix_seconds(&self) -> u64 {
        self.0.timestamp().max(0) as u64
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

// ============================================================================
// Inbound Event
// ============================================================================

/// One inbound webhook delivery, exactly as received.
///
/// `raw_body` holds the unmodified request bytes; signature verification is
/// byte-exact and must never run against re-serialized JSON. The struct is
/// transient: it lives for the duration of the entrypoint path and is
/// discarded after hand-off to the queue.
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub provider: Provider,
    pub raw_body: Bytes,
    /// Lower-cased header subset needed for verification.
    pub headers: HashMap<String, String>,
    pub correlation_id: CorrelationId,
}

impl WebhookEvent {
    /// Create a new event for a delivery on the given provider route.
    pub fn new(
        provider: Provider,
        raw_body: Bytes,
        headers: HashMap<String, String>,
        correlation_id: CorrelationId,
    ) -> Self {
        Self {
            provider,
            raw_body,
            headers,
            correlation_id,
        }
    }

    /// Look up a header by its lower-cased name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors parsing identifier strings.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid format: expected {expected}, got '{actual}'")]
    InvalidFormat { expected: String, actual: String },

    #[error("Unknown provider: '{value}'")]
    UnknownProvider { value: String },
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

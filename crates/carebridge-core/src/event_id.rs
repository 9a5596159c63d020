//! # Event Identity Module
//!
//! Derives a single stable string that identifies "this specific event" for
//! idempotency purposes, given an arbitrary provider-shaped payload.
//!
//! Priority order:
//!
//! 1. A provider-native identifier, extracted through typed payload structs
//!    with exhaustive matching (no runtime property probing).
//! 2. A deterministic fallback hash of the normalized payload content plus a
//!    5-minute time bucket.
//!
//! The fallback normalization strips timestamp-like keys before hashing so
//! that two deliveries of the same logical event with jittered embedded
//! timestamps still collapse to one identity, while the time bucket bounds
//! how long a byte-identical provider retry maps to the same id.

use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

/// Keys stripped from payloads before fallback hashing. Fixed denylist;
/// matching is exact and applies at every nesting depth.
const TIMESTAMP_KEY_DENYLIST: [&str; 5] = [
    "time",
    "timestamp",
    "created_at",
    "updated_at",
    "received_at",
];

/// Width of the fallback-hash time bucket, in seconds.
const FALLBACK_BUCKET_SECONDS: u64 = 300;

// ============================================================================
// Chat-provider payload shapes
// ============================================================================

/// Top-level envelope of a Meta-platform chat delivery.
///
/// Deserialized leniently: absent or mistyped fields become `None`/empty so
/// a malformed payload degrades to the fallback hash instead of erroring.
#[derive(Debug, Deserialize)]
pub struct ChatEnvelope {
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default)]
    pub entry: Vec<ChatEntry>,
}

/// One batched entry inside a chat delivery.
#[derive(Debug, Deserialize)]
pub struct ChatEntry {
    /// Container identifier shared by the whole batch; coarser than a
    /// message id but still provider-native.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub messaging: Vec<ChatMessagingItem>,
    #[serde(default)]
    pub standby: Vec<ChatMessagingItem>,
}

/// One message-like item inside an entry.
///
/// Each variant field carries the provider's native message identifier when
/// present. Kept as named optional fields rather than an enum because a
/// single item can legally carry several of these sub-objects.
#[derive(Debug, Deserialize)]
pub struct ChatMessagingItem {
    #[serde(default)]
    pub message: Option<MessageRef>,
    #[serde(default)]
    pub reaction: Option<MessageRef>,
    #[serde(default)]
    pub postback: Option<MessageRef>,
    #[serde(default)]
    pub read: Option<MessageRef>,
    #[serde(default)]
    pub message_edit: Option<MessageRef>,
}

/// A sub-object bearing a native message identifier.
#[derive(Debug, Deserialize)]
pub struct MessageRef {
    #[serde(default)]
    pub mid: Option<String>,
}

impl ChatMessagingItem {
    /// First non-empty native identifier carried by this item, checked in a
    /// fixed order: message, reaction, postback, read receipt, edit.
    pub fn native_id(&self) -> Option<&str> {
        [
            &self.message,
            &self.reaction,
            &self.postback,
            &self.read,
            &self.message_edit,
        ]
        .into_iter()
        .flatten()
        .filter_map(|m| m.mid.as_deref())
        .find(|mid| !mid.is_empty())
    }
}

// ============================================================================
// EventIdentifier
// ============================================================================

/// Stateless derivation of event identities.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventIdentifier;

impl EventIdentifier {
    /// Derive the identity of a chat-provider delivery.
    ///
    /// Uses the native message id when one exists anywhere in the batch,
    /// then the first entry's container id, then the fallback hash.
    pub fn chat_event_id(payload: &Value) -> String {
        Self::chat_native_id(payload)
            .unwrap_or_else(|| Self::fallback_hash(payload, unix_now_seconds()))
    }

    /// Extract the provider-native identifier from a chat payload, if any.
    ///
    /// Scans every entry and every message-like item in payload order and
    /// returns the first non-empty message id; when no item carries one,
    /// falls back to the first entry's container id. The caller passes the
    /// already-known provider; this function only validates that the
    /// `object` discriminator matches and never guesses the provider from
    /// payload shape.
    pub fn chat_native_id(payload: &Value) -> Option<String> {
        let envelope: ChatEnvelope = serde_json::from_value(payload.clone()).ok()?;

        if envelope.object.as_deref() != Some("instagram") {
            return None;
        }

        for entry in &envelope.entry {
            for item in entry.messaging.iter().chain(entry.standby.iter()) {
                if let Some(mid) = item.native_id() {
                    return Some(mid.to_string());
                }
            }
        }

        envelope
            .entry
            .first()
            .and_then(|entry| entry.id.clone())
            .filter(|id| !id.is_empty())
    }

    /// Deterministic content hash of a payload, bucketed to 5-minute windows.
    ///
    /// The payload is normalized (timestamp keys stripped at every depth,
    /// object keys sorted alphabetically, arrays mapped element-wise),
    /// serialized, concatenated with `unix_seconds / 300`, and SHA-256
    /// hashed. Identical logical payloads delivered within one bucket hash
    /// identically even when embedded timestamp fields differ; payloads that
    /// differ in any non-timestamp field hash differently regardless of
    /// bucket.
    pub fn fallback_hash(payload: &Value, unix_seconds: u64) -> String {
        let normalized = normalize(payload);
        // Compact serialization of a sorted-key tree is deterministic.
        let serialized = normalized.to_string();
        let bucket = unix_seconds / FALLBACK_BUCKET_SECONDS;

        let mut hasher = Sha256::new();
        hasher.update(serialized.as_bytes());
        hasher.update(b":");
        hasher.update(bucket.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Recursively strip denylisted timestamp keys and sort object keys.
///
/// Arrays are mapped element-wise, never sorted; element order is content.
/// Scalars and `null` pass through unchanged, so null/non-object payloads
/// normalize safely.
fn normalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map
                .keys()
                .filter(|k| !TIMESTAMP_KEY_DENYLIST.contains(&k.as_str()))
                .collect();
            keys.sort();

            let mut out = serde_json::Map::with_capacity(keys.len());
            for key in keys {
                if let Some(v) = map.get(key) {
                    out.insert(key.clone(), normalize(v));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        other => other.clone(),
    }
}

fn unix_now_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
#[path = "event_id_tests.rs"]
mod tests;

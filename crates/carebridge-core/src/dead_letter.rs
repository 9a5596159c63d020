//! # Dead Letter Module
//!
//! Terminal sink for events whose processing attempts are exhausted.
//!
//! Dead-lettered payloads are the compliance-grade audit trail for failures
//! that cannot simply be dropped. The original payload is encrypted before
//! persistence (it contains PHI/PII) and only decrypted on an explicit
//! inspection request; listing never materializes plaintext. Records are
//! created once and never mutated.

use crate::crypto::{CryptoError, Encryptor};
use crate::{CorrelationId, Provider, Timestamp, Uuid};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument};

// ============================================================================
// Record Types
// ============================================================================

/// One dead-lettered event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    /// Generated record id, the point-lookup key.
    pub id: Uuid,
    pub event_id: String,
    pub provider: Provider,
    /// Opaque ciphertext blob: `base64(iv ‖ tag ‖ ciphertext)`.
    pub encrypted_payload: String,
    pub error_message: String,
    /// Retry count at the time of dead-lettering.
    pub retry_count: u32,
    pub failed_at: Timestamp,
}

/// Filters for listing dead-letter records.
#[derive(Debug, Clone)]
pub struct DeadLetterFilters {
    pub provider: Option<Provider>,
    pub limit: Option<usize>,
}

impl Default for DeadLetterFilters {
    fn default() -> Self {
        Self {
            provider: None,
            limit: Some(100),
        }
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors from dead-letter operations.
#[derive(Debug, thiserror::Error)]
pub enum DeadLetterError {
    #[error("Dead-letter storage operation failed: {message}")]
    Storage { message: String },

    #[error("Dead-letter record not found: {id}")]
    NotFound { id: Uuid },

    #[error("Dead-letter payload serialization failed: {message}")]
    Serialization { message: String },

    /// Reported generically; never reveals why the cryptographic operation
    /// failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

// ============================================================================
// Storage Trait
// ============================================================================

/// Persistence backend for dead-letter records. Implementations store the
/// record as given; encryption happens above this seam, in the service.
#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    /// Persist a record. Records are immutable; `put` is insert-only.
    async fn put(&self, record: &DeadLetterRecord) -> Result<(), DeadLetterError>;

    /// Point lookup by record id.
    async fn get(&self, id: Uuid) -> Result<Option<DeadLetterRecord>, DeadLetterError>;

    /// List records, newest first, applying the filters.
    async fn list(
        &self,
        filters: &DeadLetterFilters,
    ) -> Result<Vec<DeadLetterRecord>, DeadLetterError>;
}

// ============================================================================
// DeadLetterService
// ============================================================================

/// Encrypt-then-persist facade over a [`DeadLetterStore`].
///
/// The worker calls [`store`](Self::store) when a job's attempts are
/// exhausted; operators use [`get_decrypted`](Self::get_decrypted) and
/// [`list`](Self::list) for later inspection or replay.
#[derive(Clone)]
pub struct DeadLetterService {
    store: Arc<dyn DeadLetterStore>,
    encryptor: Arc<Encryptor>,
}

impl std::fmt::Debug for DeadLetterService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadLetterService")
            .field("store", &"<DeadLetterStore>")
            .finish()
    }
}

impl DeadLetterService {
    pub fn new(store: Arc<dyn DeadLetterStore>, encryptor: Arc<Encryptor>) -> Self {
        Self { store, encryptor }
    }

    /// Encrypt `payload` and persist a new record.
    ///
    /// Logs metadata only, never the payload.
    #[instrument(skip(self, payload, error_message), fields(correlation_id = %correlation_id))]
    pub async fn store(
        &self,
        event_id: &str,
        provider: Provider,
        payload: &Value,
        error_message: &str,
        retry_count: u32,
        correlation_id: &CorrelationId,
    ) -> Result<DeadLetterRecord, DeadLetterError> {
        let plaintext =
            serde_json::to_vec(payload).map_err(|e| DeadLetterError::Serialization {
                message: e.to_string(),
            })?;

        let encrypted_payload = self.encryptor.encrypt(&plaintext)?;

        let record = DeadLetterRecord {
            id: Uuid::new_v4(),
            event_id: event_id.to_string(),
            provider,
            encrypted_payload,
            error_message: error_message.to_string(),
            retry_count,
            failed_at: Timestamp::now(),
        };

        self.store.put(&record).await?;

        info!(
            dead_letter_id = %record.id,
            event_id = %record.event_id,
            provider = %record.provider,
            retry_count = record.retry_count,
            "Event dead-lettered after exhausting retries"
        );

        Ok(record)
    }

    /// Retrieve one record and decrypt its payload for inspection.
    pub async fn get_decrypted(
        &self,
        id: Uuid,
    ) -> Result<Option<(DeadLetterRecord, Value)>, DeadLetterError> {
        let Some(record) = self.store.get(id).await? else {
            return Ok(None);
        };

        let plaintext = self.encryptor.decrypt(&record.encrypted_payload)?;
        let payload: Value =
            serde_json::from_slice(&plaintext).map_err(|e| DeadLetterError::Serialization {
                message: e.to_string(),
            })?;

        Ok(Some((record, payload)))
    }

    /// List records without touching plaintext.
    #[instrument(skip(self, filters), fields(correlation_id = %correlation_id))]
    pub async fn list(
        &self,
        correlation_id: &CorrelationId,
        filters: &DeadLetterFilters,
    ) -> Result<Vec<DeadLetterRecord>, DeadLetterError> {
        self.store.list(filters).await
    }
}

#[cfg(test)]
#[path = "dead_letter_tests.rs"]
mod tests;

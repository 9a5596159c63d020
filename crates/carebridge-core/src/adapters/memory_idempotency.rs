//! In-memory [`IdempotencyTracker`] for testing and development.
//!
//! All operations run under a single async mutex, which makes the claim
//! upsert trivially atomic: concurrent claims for one key serialize on the
//! lock and exactly one observes the absent → pending insert.

use crate::idempotency::{
    apply_failure, apply_reclaim, apply_success, ClaimOutcome, IdempotencyError,
    IdempotencyRecord, IdempotencyTracker,
};
use crate::{CorrelationId, Provider};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

type Key = (String, Provider);

/// Mutex-map tracker. State is lost on restart; use the filesystem adapter
/// when durability matters.
#[derive(Debug, Default)]
pub struct InMemoryIdempotencyTracker {
    records: Mutex<HashMap<Key, IdempotencyRecord>>,
}

impl InMemoryIdempotencyTracker {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyTracker for InMemoryIdempotencyTracker {
    #[instrument(skip(self), fields(correlation_id = %correlation_id))]
    async fn claim(
        &self,
        event_id: &str,
        provider: Provider,
        correlation_id: &CorrelationId,
    ) -> Result<ClaimOutcome, IdempotencyError> {
        let mut records = self.records.lock().await;
        let key = (event_id.to_string(), provider);

        match records.get_mut(&key) {
            None => {
                let record = IdempotencyRecord::new_pending(event_id, provider);
                records.insert(key, record.clone());
                debug!(event_id, provider = %provider, "Claimed new event");
                Ok(ClaimOutcome::NewlyClaimed(record))
            }
            Some(record) => {
                let redriven = apply_reclaim(record);
                let record = record.clone();
                if redriven {
                    debug!(event_id, provider = %provider, "Re-drove failed event");
                    Ok(ClaimOutcome::NewlyClaimed(record))
                } else {
                    Ok(ClaimOutcome::AlreadyExists(record))
                }
            }
        }
    }

    async fn mark_processed(
        &self,
        event_id: &str,
        provider: Provider,
    ) -> Result<IdempotencyRecord, IdempotencyError> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(&(event_id.to_string(), provider))
            .ok_or_else(|| IdempotencyError::NotFound {
                event_id: event_id.to_string(),
                provider,
            })?;

        apply_success(record);
        Ok(record.clone())
    }

    async fn mark_failed(
        &self,
        event_id: &str,
        provider: Provider,
        error_message: &str,
    ) -> Result<IdempotencyRecord, IdempotencyError> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(&(event_id.to_string(), provider))
            .ok_or_else(|| IdempotencyError::NotFound {
                event_id: event_id.to_string(),
                provider,
            })?;

        apply_failure(record, error_message);
        Ok(record.clone())
    }

    async fn find(
        &self,
        event_id: &str,
        provider: Provider,
    ) -> Result<Option<IdempotencyRecord>, IdempotencyError> {
        let records = self.records.lock().await;
        Ok(records.get(&(event_id.to_string(), provider)).cloned())
    }
}

#[cfg(test)]
#[path = "memory_idempotency_tests.rs"]
mod tests;

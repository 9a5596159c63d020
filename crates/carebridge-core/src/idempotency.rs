//! # Idempotency Tracking Module
//!
//! Small state machine, backed by durable storage, recording whether a given
//! `(event_id, provider)` pair is new, in progress, done, or failed.
//!
//! The pair is the idempotency key: the entrypoint consults it before
//! queueing so duplicate deliveries are acknowledged without a second job,
//! and the worker records outcomes through it. Claiming must be a single
//! atomic upsert against the backing store: under concurrent duplicate
//! deliveries exactly one caller observes "newly claimed".

use crate::{CorrelationId, Provider, Timestamp};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Upper bound on `retry_count` growth. Failures past this point still
/// update status and error message, but the counter no longer grows, so a
/// repeatedly re-driven dead-lettered event cannot overflow the record.
pub const RETRY_COUNT_CAP: u32 = 100;

// ============================================================================
// Record Types
// ============================================================================

/// Processing status of one `(event_id, provider)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyStatus {
    /// Claimed for processing; a job is (or is about to be) in flight.
    Pending,
    /// Processing completed successfully.
    Processed,
    /// The most recent processing attempt failed.
    Failed,
}

impl fmt::Display for IdempotencyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processed => "processed",
            Self::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Durable record for one idempotency key.
///
/// Owned exclusively by the [`IdempotencyTracker`]; the entrypoint reads it
/// for duplicate detection and the worker records outcomes through the
/// tracker's transition operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub event_id: String,
    pub provider: Provider,
    pub status: IdempotencyStatus,
    /// Number of recorded failures; incremented only by `mark_failed`.
    pub retry_count: u32,
    pub error_message: Option<String>,
    pub processed_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl IdempotencyRecord {
    /// Fresh pending record for a first sighting.
    pub fn new_pending(event_id: &str, provider: Provider) -> Self {
        let now = Timestamp::now();
        Self {
            event_id: event_id.to_string(),
            provider,
            status: IdempotencyStatus::Pending,
            retry_count: 0,
            error_message: None,
            processed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_processed(&self) -> bool {
        self.status == IdempotencyStatus::Processed
    }
}

/// Result of a claim attempt.
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    /// This caller owns the first (or re-driven) claim; enqueue a job.
    NewlyClaimed(IdempotencyRecord),
    /// Another delivery already holds or completed this key; do not enqueue.
    AlreadyExists(IdempotencyRecord),
}

impl ClaimOutcome {
    pub fn is_new(&self) -> bool {
        matches!(self, Self::NewlyClaimed(_))
    }

    pub fn record(&self) -> &IdempotencyRecord {
        match self {
            Self::NewlyClaimed(record) | Self::AlreadyExists(record) => record,
        }
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors from idempotency storage operations.
#[derive(Debug, thiserror::Error)]
pub enum IdempotencyError {
    /// Backing store unreachable or failing; the entrypoint fails the
    /// request on this so the provider retries later.
    #[error("Idempotency storage operation failed: {message}")]
    Storage { message: String },

    #[error("No idempotency record for event '{event_id}' from provider '{provider}'")]
    NotFound { event_id: String, provider: Provider },
}

// ============================================================================
// Tracker Trait
// ============================================================================

/// State machine per `(event_id, provider)`:
///
/// - absent → pending via [`claim`](Self::claim) (atomic upsert; re-claiming
///   a pending row refreshes its marker, re-claiming a failed row re-drives
///   it back to pending)
/// - pending → processed via [`mark_processed`](Self::mark_processed)
///   (idempotent)
/// - pending|failed → failed via [`mark_failed`](Self::mark_failed) (the
///   only place `retry_count` changes)
#[async_trait]
pub trait IdempotencyTracker: Send + Sync {
    /// Claim an event for processing.
    ///
    /// Insert-if-absent as a single atomic operation. Concurrent claims for
    /// the same key resolve so that exactly one caller gets
    /// [`ClaimOutcome::NewlyClaimed`]; the rest get
    /// [`ClaimOutcome::AlreadyExists`]. A pre-existing `failed` record is
    /// transitioned back to `pending` and reported as newly claimed; that
    /// is the external re-drive path.
    async fn claim(
        &self,
        event_id: &str,
        provider: Provider,
        correlation_id: &CorrelationId,
    ) -> Result<ClaimOutcome, IdempotencyError>;

    /// Record successful processing. Safe to call twice.
    async fn mark_processed(
        &self,
        event_id: &str,
        provider: Provider,
    ) -> Result<IdempotencyRecord, IdempotencyError>;

    /// Record a failed processing attempt, storing the error message and
    /// incrementing the retry count (capped at [`RETRY_COUNT_CAP`]).
    async fn mark_failed(
        &self,
        event_id: &str,
        provider: Provider,
        error_message: &str,
    ) -> Result<IdempotencyRecord, IdempotencyError>;

    /// Duplicate-detection read used by the entrypoint before deciding
    /// whether to enqueue at all. `Ok(None)` when the key has never been
    /// seen.
    async fn find(
        &self,
        event_id: &str,
        provider: Provider,
    ) -> Result<Option<IdempotencyRecord>, IdempotencyError>;
}

/// Apply the claim transition to an existing record, in place.
///
/// Shared by the storage adapters so memory and filesystem claims follow the
/// same state machine. Returns `true` when the caller should treat the claim
/// as newly owned (the failed → pending re-drive).
pub(crate) fn apply_reclaim(record: &mut IdempotencyRecord) -> bool {
    record.updated_at = Timestamp::now();
    match record.status {
        IdempotencyStatus::Pending | IdempotencyStatus::Processed => false,
        IdempotencyStatus::Failed => {
            record.status = IdempotencyStatus::Pending;
            true
        }
    }
}

/// Apply the failure transition to a record, in place.
pub(crate) fn apply_failure(record: &mut IdempotencyRecord, error_message: &str) {
    record.status = IdempotencyStatus::Failed;
    record.error_message = Some(error_message.to_string());
    if record.retry_count < RETRY_COUNT_CAP {
        record.retry_count += 1;
    }
    record.updated_at = Timestamp::now();
}

/// Apply the success transition to a record, in place. Idempotent.
pub(crate) fn apply_success(record: &mut IdempotencyRecord) {
    if record.status != IdempotencyStatus::Processed {
        record.status = IdempotencyStatus::Processed;
        record.processed_at = Some(Timestamp::now());
    }
    record.updated_at = Timestamp::now();
}

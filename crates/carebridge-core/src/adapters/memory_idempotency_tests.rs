//! Tests for the in-memory idempotency tracker.

use super::*;
use crate::idempotency::IdempotencyStatus;
use std::sync::Arc;

fn correlation_id() -> CorrelationId {
    CorrelationId::new()
}

#[tokio::test]
async fn test_first_claim_is_new() {
    let tracker = InMemoryIdempotencyTracker::new();
    let outcome = tracker
        .claim("evt-1", Provider::Instagram, &correlation_id())
        .await
        .unwrap();

    assert!(outcome.is_new());
    assert_eq!(outcome.record().status, IdempotencyStatus::Pending);
    assert_eq!(outcome.record().retry_count, 0);
}

#[tokio::test]
async fn test_second_claim_reports_duplicate() {
    let tracker = InMemoryIdempotencyTracker::new();
    let cid = correlation_id();
    tracker.claim("evt-1", Provider::Instagram, &cid).await.unwrap();

    let outcome = tracker.claim("evt-1", Provider::Instagram, &cid).await.unwrap();
    assert!(!outcome.is_new());
    assert_eq!(outcome.record().status, IdempotencyStatus::Pending);
}

/// The key is the pair: the same event id under a different provider is a
/// distinct event.
#[tokio::test]
async fn test_same_event_id_different_provider_is_distinct() {
    let tracker = InMemoryIdempotencyTracker::new();
    let cid = correlation_id();
    let first = tracker.claim("evt-1", Provider::Razorpay, &cid).await.unwrap();
    let second = tracker.claim("evt-1", Provider::Paypal, &cid).await.unwrap();

    assert!(first.is_new());
    assert!(second.is_new());
}

#[tokio::test]
async fn test_claim_after_processed_reports_duplicate() {
    let tracker = InMemoryIdempotencyTracker::new();
    let cid = correlation_id();
    tracker.claim("evt-1", Provider::Instagram, &cid).await.unwrap();
    tracker
        .mark_processed("evt-1", Provider::Instagram)
        .await
        .unwrap();

    let outcome = tracker.claim("evt-1", Provider::Instagram, &cid).await.unwrap();
    assert!(!outcome.is_new());
    assert!(outcome.record().is_processed());
}

/// A failed record is re-driven: the claim flips it back to pending and the
/// caller owns it again.
#[tokio::test]
async fn test_claim_after_failure_redrives() {
    let tracker = InMemoryIdempotencyTracker::new();
    let cid = correlation_id();
    tracker.claim("evt-1", Provider::Instagram, &cid).await.unwrap();
    tracker
        .mark_failed("evt-1", Provider::Instagram, "handler error")
        .await
        .unwrap();

    let outcome = tracker.claim("evt-1", Provider::Instagram, &cid).await.unwrap();
    assert!(outcome.is_new());
    assert_eq!(outcome.record().status, IdempotencyStatus::Pending);
    // The failure history survives the re-drive.
    assert_eq!(outcome.record().retry_count, 1);
}

#[tokio::test]
async fn test_mark_failed_increments_retry_count_and_stores_error() {
    let tracker = InMemoryIdempotencyTracker::new();
    let cid = correlation_id();
    tracker.claim("evt-1", Provider::Razorpay, &cid).await.unwrap();

    let first = tracker
        .mark_failed("evt-1", Provider::Razorpay, "timeout")
        .await
        .unwrap();
    let second = tracker
        .mark_failed("evt-1", Provider::Razorpay, "connection refused")
        .await
        .unwrap();

    assert_eq!(first.retry_count, 1);
    assert_eq!(second.retry_count, 2);
    assert_eq!(second.status, IdempotencyStatus::Failed);
    assert_eq!(second.error_message.as_deref(), Some("connection refused"));
}

#[tokio::test]
async fn test_mark_processed_is_idempotent() {
    let tracker = InMemoryIdempotencyTracker::new();
    let cid = correlation_id();
    tracker.claim("evt-1", Provider::Instagram, &cid).await.unwrap();

    let first = tracker
        .mark_processed("evt-1", Provider::Instagram)
        .await
        .unwrap();
    let second = tracker
        .mark_processed("evt-1", Provider::Instagram)
        .await
        .unwrap();

    assert!(second.is_processed());
    // The original completion time is not overwritten.
    assert_eq!(first.processed_at, second.processed_at);
}

#[tokio::test]
async fn test_transitions_on_unknown_key_are_not_found() {
    let tracker = InMemoryIdempotencyTracker::new();

    let processed = tracker.mark_processed("ghost", Provider::Instagram).await;
    assert!(matches!(processed, Err(IdempotencyError::NotFound { .. })));

    let failed = tracker.mark_failed("ghost", Provider::Instagram, "err").await;
    assert!(matches!(failed, Err(IdempotencyError::NotFound { .. })));
}

#[tokio::test]
async fn test_find_returns_none_for_unseen_key() {
    let tracker = InMemoryIdempotencyTracker::new();
    let found = tracker.find("never-seen", Provider::Paypal).await.unwrap();
    assert!(found.is_none());
}

/// Concurrent duplicate deliveries: exactly one task may win the claim.
#[tokio::test]
async fn test_concurrent_claims_yield_exactly_one_winner() {
    let tracker = Arc::new(InMemoryIdempotencyTracker::new());

    let mut handles = Vec::new();
    for _ in 0..16 {
        let tracker = Arc::clone(&tracker);
        handles.push(tokio::spawn(async move {
            let cid = CorrelationId::new();
            tracker
                .claim("contested", Provider::Instagram, &cid)
                .await
                .unwrap()
                .is_new()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

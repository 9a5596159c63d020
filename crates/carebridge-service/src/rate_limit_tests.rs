//! Tests for the fixed-window rate limiter.

use super::*;

#[test]
fn test_allows_up_to_budget() {
    let limiter = FixedWindowLimiter::new(true, 3, Duration::from_secs(60));
    assert!(limiter.try_acquire("/webhooks/instagram"));
    assert!(limiter.try_acquire("/webhooks/instagram"));
    assert!(limiter.try_acquire("/webhooks/instagram"));
    assert!(!limiter.try_acquire("/webhooks/instagram"));
}

/// Routes are limited independently; exhausting one provider never affects
/// another.
#[test]
fn test_keys_are_independent() {
    let limiter = FixedWindowLimiter::new(true, 1, Duration::from_secs(60));
    assert!(limiter.try_acquire("/webhooks/instagram"));
    assert!(!limiter.try_acquire("/webhooks/instagram"));
    assert!(limiter.try_acquire("/webhooks/razorpay"));
    assert!(limiter.try_acquire("/webhooks/paypal"));
}

#[test]
fn test_window_resets_after_elapsing() {
    let limiter = FixedWindowLimiter::new(true, 1, Duration::from_millis(20));
    assert!(limiter.try_acquire("/webhooks/razorpay"));
    assert!(!limiter.try_acquire("/webhooks/razorpay"));

    std::thread::sleep(Duration::from_millis(30));
    assert!(limiter.try_acquire("/webhooks/razorpay"));
}

#[test]
fn test_disabled_limiter_always_allows() {
    let limiter = FixedWindowLimiter::new(false, 0, Duration::from_secs(60));
    for _ in 0..100 {
        assert!(limiter.try_acquire("/webhooks/instagram"));
    }
}

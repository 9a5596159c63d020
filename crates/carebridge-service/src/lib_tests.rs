//! Handler-level tests driving the router directly.

use super::*;
use axum::body::{to_bytes, Body};
use axum::http::Request;
use carebridge_core::adapters::{InMemoryDeadLetterStore, InMemoryIdempotencyTracker};
use carebridge_core::crypto::Encryptor;
use carebridge_core::payments::{PaypalAdapter, RazorpayAdapter};
use carebridge_core::queue::{InMemoryQueueGateway, JobOptions};
use carebridge_core::signature::{PaypalSignatureVerifier, RazorpaySignatureVerifier};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tower::ServiceExt;

const IG_SECRET: &str = "ig-app-secret";
const RZP_SECRET: &str = "rzp-webhook-secret";
const VERIFY_TOKEN: &str = "expected-token";

struct TestHarness {
    router: Router,
    queue: Arc<InMemoryQueueGateway>,
    tracker: Arc<InMemoryIdempotencyTracker>,
    dead_letters: DeadLetterService,
}

fn harness() -> TestHarness {
    harness_with(|_| {})
}

/// Build a fully wired router over in-memory adapters, letting the caller
/// adjust the config first.
fn harness_with(adjust: impl FnOnce(&mut ServiceConfig)) -> TestHarness {
    let mut config = ServiceConfig::default();
    config.providers.instagram.app_secret = Some(IG_SECRET.to_string());
    config.providers.instagram.verify_token = Some(VERIFY_TOKEN.to_string());
    config.providers.razorpay.webhook_secret = Some(RZP_SECRET.to_string());
    adjust(&mut config);

    let queue = Arc::new(InMemoryQueueGateway::new(JobOptions::default()));
    let tracker = Arc::new(InMemoryIdempotencyTracker::new());

    let encryptor = Arc::new(Encryptor::from_key_bytes(&[9u8; 32]).unwrap());
    let dead_letters = DeadLetterService::new(
        Arc::new(InMemoryDeadLetterStore::new()),
        encryptor,
    );

    let razorpay = Arc::new(RazorpayAdapter::new(RazorpaySignatureVerifier::new(
        config.providers.razorpay.webhook_secret.clone(),
    )));
    // The PayPal verifier is wired but never reached in these tests.
    let paypal = Arc::new(PaypalAdapter::new(PaypalSignatureVerifier::new(
        "client-id".to_string(),
        "client-secret".to_string(),
        Some("wh-1".to_string()),
        "http://127.0.0.1:9".to_string(),
    )));

    let state = AppState::new(
        config,
        Arc::new(InstagramSignatureVerifier::new(Some(IG_SECRET.to_string()))),
        razorpay,
        paypal,
        Arc::clone(&tracker) as Arc<dyn IdempotencyTracker>,
        Arc::clone(&queue) as Arc<dyn QueueGateway>,
        Some(dead_letters.clone()),
    );

    TestHarness {
        router: create_router(state),
        queue,
        tracker,
        dead_letters,
    }
}

fn sign_hex(secret: &str, body: &[u8]) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

fn instagram_post(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/webhooks/instagram")
        .header(
            INSTAGRAM_SIGNATURE_HEADER,
            format!("sha256={}", sign_hex(IG_SECRET, body.as_bytes())),
        )
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn razorpay_post(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/webhooks/razorpay")
        .header("x-razorpay-signature", sign_hex(RZP_SECRET, body.as_bytes()))
        .header("x-razorpay-event-id", "evt_test_1")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

mod health_tests {
    use super::*;

    #[tokio::test]
    async fn test_health_endpoint_reports_healthy() {
        let h = harness();
        let response = h
            .router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
    }
}

mod handshake_tests {
    use super::*;

    #[tokio::test]
    async fn test_matching_token_echoes_challenge() {
        let h = harness();
        let uri = format!(
            "/webhooks/instagram?hub.mode=subscribe&hub.verify_token={}&hub.challenge=12345",
            VERIFY_TOKEN
        );
        let response = h
            .router
            .oneshot(Request::get(uri.as_str()).body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"12345");
    }

    #[tokio::test]
    async fn test_wrong_token_is_forbidden() {
        let h = harness();
        let uri =
            "/webhooks/instagram?hub.mode=subscribe&hub.verify_token=wrong&hub.challenge=12345";
        let response = h
            .router
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_unconfigured_token_is_server_error() {
        let h = harness_with(|config| {
            config.providers.instagram.verify_token = None;
        });
        let uri = format!(
            "/webhooks/instagram?hub.mode=subscribe&hub.verify_token={}&hub.challenge=1",
            VERIFY_TOKEN
        );
        let response = h
            .router
            .oneshot(Request::get(uri.as_str()).body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

mod instagram_webhook_tests {
    use super::*;

    const CHAT_BODY: &str = r#"{"object":"instagram","entry":[{"id":"page-1","messaging":[{"message":{"mid":"mid.test.1"}}]}]}"#;

    #[tokio::test]
    async fn test_valid_delivery_accepted_and_queued() {
        let h = harness();
        let response = h.router.oneshot(instagram_post(CHAT_BODY)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "accepted");
        assert_eq!(body["event_id"], "mid.test.1");
        assert_eq!(h.queue.ready_depth().await, 1);
    }

    /// Replayed delivery: acknowledged, but no second job.
    #[tokio::test]
    async fn test_duplicate_delivery_not_queued_twice() {
        let h = harness();
        let first = h
            .router
            .clone()
            .oneshot(instagram_post(CHAT_BODY))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = h.router.oneshot(instagram_post(CHAT_BODY)).await.unwrap();
        assert_eq!(second.status(), StatusCode::OK);
        let body = body_json(second).await;
        assert_eq!(body["status"], "duplicate");

        assert_eq!(h.queue.ready_depth().await, 1);
    }

    /// A rejected signature must leave no trace: no claim, no job.
    #[tokio::test]
    async fn test_invalid_signature_rejected_without_side_effects() {
        let h = harness();
        let request = Request::builder()
            .method("POST")
            .uri("/webhooks/instagram")
            .header(INSTAGRAM_SIGNATURE_HEADER, "sha256=deadbeef")
            .body(Body::from(CHAT_BODY))
            .unwrap();

        let response = h.router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(h.queue.ready_depth().await, 0);

        let record = h
            .tracker
            .find("mid.test.1", Provider::Instagram)
            .await
            .unwrap();
        assert!(record.is_none());
    }

    #[tokio::test]
    async fn test_missing_signature_header_rejected() {
        let h = harness();
        let request = Request::builder()
            .method("POST")
            .uri("/webhooks/instagram")
            .body(Body::from(CHAT_BODY))
            .unwrap();

        let response = h.router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_invalid_json_with_valid_signature_is_bad_request() {
        let h = harness();
        let response = h
            .router
            .oneshot(instagram_post("this is not json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    /// A missing app secret is a deployment error, surfaced as 500 rather
    /// than silently accepting or rejecting.
    #[tokio::test]
    async fn test_missing_secret_is_server_error() {
        let mut config = ServiceConfig::default();
        config.providers.instagram.app_secret = None;

        let state = AppState::new(
            config,
            Arc::new(InstagramSignatureVerifier::new(None)),
            Arc::new(RazorpayAdapter::new(RazorpaySignatureVerifier::new(None))),
            Arc::new(PaypalAdapter::new(PaypalSignatureVerifier::new(
                String::new(),
                String::new(),
                None,
                "http://127.0.0.1:9".to_string(),
            ))),
            Arc::new(InMemoryIdempotencyTracker::new()),
            Arc::new(InMemoryQueueGateway::new(JobOptions::default())),
            None,
        );
        let router = create_router(state);

        let response = router.oneshot(instagram_post("{}")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

mod razorpay_webhook_tests {
    use super::*;

    const PAYMENT_BODY: &str = r#"{"event":"payment.captured","payload":{"payment":{"entity":{"id":"pay_1","amount":100,"currency":"INR"}}}}"#;

    #[tokio::test]
    async fn test_valid_delivery_accepted() {
        let h = harness();
        let response = h.router.oneshot(razorpay_post(PAYMENT_BODY)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "accepted");
        assert_eq!(body["event_id"], "razorpay:evt_test_1");
        assert_eq!(h.queue.ready_depth().await, 1);
    }

    /// Missing secret on the per-request payment path fails closed as 401,
    /// never 500.
    #[tokio::test]
    async fn test_missing_secret_fails_closed() {
        let h = harness_with(|config| {
            config.providers.razorpay.webhook_secret = None;
        });

        // The harness builds the adapter from the adjusted config.
        let response = h.router.oneshot(razorpay_post(PAYMENT_BODY)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_tampered_body_rejected() {
        let h = harness();
        let request = Request::builder()
            .method("POST")
            .uri("/webhooks/razorpay")
            .header(
                "x-razorpay-signature",
                sign_hex(RZP_SECRET, b"different body"),
            )
            .body(Body::from(PAYMENT_BODY))
            .unwrap();

        let response = h.router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(h.queue.ready_depth().await, 0);
    }
}

mod rate_limit_tests {
    use super::*;

    #[tokio::test]
    async fn test_post_budget_enforced_per_route() {
        let h = harness_with(|config| {
            config.rate_limit.max_requests = 1;
        });

        let first = h
            .router
            .clone()
            .oneshot(instagram_post(r#"{"object":"instagram","entry":[]}"#))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = h
            .router
            .clone()
            .oneshot(instagram_post(r#"{"object":"instagram","entry":[]}"#))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);

        // Another provider's route has its own budget.
        let other = h
            .router
            .oneshot(razorpay_post(r#"{"event":"x"}"#))
            .await
            .unwrap();
        assert_ne!(other.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    /// The GET handshake is never rate limited.
    #[tokio::test]
    async fn test_handshake_not_limited() {
        let h = harness_with(|config| {
            config.rate_limit.max_requests = 1;
        });

        for _ in 0..3 {
            let uri = format!(
                "/webhooks/instagram?hub.mode=subscribe&hub.verify_token={}&hub.challenge=1",
                VERIFY_TOKEN
            );
            let response = h
                .router
                .clone()
                .oneshot(Request::get(uri.as_str()).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }
}

mod dead_letter_endpoint_tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_list_and_inspect_round_trip() {
        let h = harness();
        let cid = CorrelationId::new();
        let record = h
            .dead_letters
            .store(
                "evt-dead",
                Provider::Razorpay,
                &json!({ "k": "v" }),
                "exhausted",
                3,
                &cid,
            )
            .await
            .unwrap();

        let list_response = h
            .router
            .clone()
            .oneshot(Request::get("/dead-letters").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(list_response.status(), StatusCode::OK);
        let listed = body_json(list_response).await;
        assert_eq!(listed.as_array().unwrap().len(), 1);
        assert_eq!(listed[0]["event_id"], "evt-dead");
        // Listing never exposes payloads, sealed or not.
        assert!(listed[0].get("encrypted_payload").is_none());
        assert!(listed[0].get("payload").is_none());

        let get_response = h
            .router
            .oneshot(
                Request::get(format!("/dead-letters/{}", record.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(get_response.status(), StatusCode::OK);
        let fetched = body_json(get_response).await;
        assert_eq!(fetched["payload"], json!({ "k": "v" }));
        assert_eq!(fetched["error_message"], "exhausted");
    }

    #[tokio::test]
    async fn test_unknown_record_is_not_found() {
        let h = harness();
        let response = h
            .router
            .oneshot(
                Request::get(format!("/dead-letters/{}", Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

mod body_limit_tests {
    use super::*;

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let h = harness_with(|config| {
            config.server.max_body_size = 64;
        });

        let big = format!(
            r#"{{"object":"instagram","pad":"{}"}}"#,
            "x".repeat(256)
        );
        let response = h.router.oneshot(instagram_post(&big)).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}

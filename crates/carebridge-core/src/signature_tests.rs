//! Tests for the per-provider signature verifiers.

use super::*;
use crate::CorrelationId;

/// Compute the hex HMAC-SHA256 of `payload` keyed by `secret`, as a
/// correctly-signing provider would send it.
fn sign_hex(secret: &str, payload: &[u8]) -> String {
    hmac_sha256_hex(secret, payload)
}

fn correlation_id() -> CorrelationId {
    CorrelationId::new()
}

// ============================================================================
// Instagram verifier
// ============================================================================

mod instagram_tests {
    use super::*;

    #[test]
    fn test_valid_signature_accepted() {
        let secret = "app-secret";
        let body = br#"{"object":"instagram","entry":[]}"#;
        let header = format!("sha256={}", sign_hex(secret, body));

        let verifier = InstagramSignatureVerifier::new(Some(secret.to_string()));
        let verified = verifier
            .verify(Some(&header), body, &correlation_id())
            .unwrap();
        assert!(verified);
    }

    /// Any single-byte mutation of the body must fail verification.
    #[test]
    fn test_mutated_body_rejected() {
        let secret = "app-secret";
        let body = b"{\"a\":1}";
        let header = format!("sha256={}", sign_hex(secret, body));

        let verifier = InstagramSignatureVerifier::new(Some(secret.to_string()));
        let verified = verifier
            .verify(Some(&header), b"{\"a\":2}", &correlation_id())
            .unwrap();
        assert!(!verified);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let body = b"payload";
        let header = format!("sha256={}", sign_hex("secret-a", body));

        let verifier = InstagramSignatureVerifier::new(Some("secret-b".to_string()));
        assert!(!verifier.verify(Some(&header), body, &correlation_id()).unwrap());
    }

    #[test]
    fn test_tampered_signature_rejected() {
        let secret = "app-secret";
        let body = b"payload";
        let mut header = format!("sha256={}", sign_hex(secret, body));
        // Flip the last hex digit.
        let flipped = if header.ends_with('0') { '1' } else { '0' };
        header.pop();
        header.push(flipped);

        let verifier = InstagramSignatureVerifier::new(Some(secret.to_string()));
        assert!(!verifier.verify(Some(&header), body, &correlation_id()).unwrap());
    }

    /// A missing header is a reject, not a panic or an error.
    #[test]
    fn test_missing_header_returns_false() {
        let verifier = InstagramSignatureVerifier::new(Some("secret".to_string()));
        assert!(!verifier.verify(None, b"body", &correlation_id()).unwrap());
    }

    #[test]
    fn test_wrong_scheme_prefix_returns_false() {
        let secret = "secret";
        let body = b"body";
        let header = format!("sha1={}", sign_hex(secret, body));

        let verifier = InstagramSignatureVerifier::new(Some(secret.to_string()));
        assert!(!verifier.verify(Some(&header), body, &correlation_id()).unwrap());
    }

    /// A missing secret is a deployment error and must fail loudly rather
    /// than silently accept or reject.
    #[test]
    fn test_missing_secret_is_configuration_error() {
        let verifier = InstagramSignatureVerifier::new(None);
        let result = verifier.verify(Some("sha256=00"), b"body", &correlation_id());
        assert!(matches!(
            result,
            Err(SignatureError::SecretNotConfigured {
                provider: "instagram"
            })
        ));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let verifier = InstagramSignatureVerifier::new(Some("top-secret".to_string()));
        let debug = format!("{:?}", verifier);
        assert!(!debug.contains("top-secret"));
    }
}

// ============================================================================
// Razorpay verifier
// ============================================================================

mod razorpay_tests {
    use super::*;

    #[test]
    fn test_valid_signature_accepted() {
        let secret = "webhook-secret";
        let body = br#"{"event":"payment.captured"}"#;
        let header = sign_hex(secret, body);

        let verifier = RazorpaySignatureVerifier::new(Some(secret.to_string()));
        assert!(verifier.verify(Some(&header), body, &correlation_id()));
    }

    #[test]
    fn test_mutated_body_rejected() {
        let secret = "webhook-secret";
        let header = sign_hex(secret, b"original");

        let verifier = RazorpaySignatureVerifier::new(Some(secret.to_string()));
        assert!(!verifier.verify(Some(&header), b"originaX", &correlation_id()));
    }

    #[test]
    fn test_missing_header_fails_closed() {
        let verifier = RazorpaySignatureVerifier::new(Some("secret".to_string()));
        assert!(!verifier.verify(None, b"body", &correlation_id()));
    }

    /// Unlike the chat provider, a missing secret here fails closed instead
    /// of raising; this path must not crash per-request handling.
    #[test]
    fn test_missing_secret_fails_closed() {
        let verifier = RazorpaySignatureVerifier::new(None);
        let header = sign_hex("anything", b"body");
        assert!(!verifier.verify(Some(&header), b"body", &correlation_id()));
    }
}

// ============================================================================
// PayPal verifier (remote verification against a mock server)
// ============================================================================

mod paypal_tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transmission_headers() -> HashMap<String, String> {
        HashMap::from([
            ("paypal-auth-algo".to_string(), "SHA256withRSA".to_string()),
            (
                "paypal-cert-url".to_string(),
                "https://api.paypal.com/cert".to_string(),
            ),
            ("paypal-transmission-id".to_string(), "tx-1".to_string()),
            ("paypal-transmission-sig".to_string(), "sig==".to_string()),
            (
                "paypal-transmission-time".to_string(),
                "2026-01-01T00:00:00Z".to_string(),
            ),
        ])
    }

    fn verifier_against(server: &MockServer) -> PaypalSignatureVerifier {
        PaypalSignatureVerifier::new(
            "client-id".to_string(),
            "client-secret".to_string(),
            Some("wh-123".to_string()),
            server.uri(),
        )
    }

    async fn mount_oauth(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/v1/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "test-token",
                "token_type": "Bearer",
                "expires_in": 32400
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_success_sentinel_verifies() {
        let server = MockServer::start().await;
        mount_oauth(&server).await;
        Mock::given(method("POST"))
            .and(path("/v1/notifications/verify-webhook-signature"))
            .and(body_partial_json(serde_json::json!({
                "webhook_id": "wh-123",
                "transmission_id": "tx-1"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "verification_status": "SUCCESS"
            })))
            .mount(&server)
            .await;

        let verifier = verifier_against(&server);
        let event = serde_json::json!({"id": "WH-1", "event_type": "PAYMENT.CAPTURE.COMPLETED"});
        assert!(
            verifier
                .verify(&transmission_headers(), &event, &correlation_id())
                .await
        );
    }

    #[tokio::test]
    async fn test_failure_sentinel_rejects() {
        let server = MockServer::start().await;
        mount_oauth(&server).await;
        Mock::given(method("POST"))
            .and(path("/v1/notifications/verify-webhook-signature"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "verification_status": "FAILURE"
            })))
            .mount(&server)
            .await;

        let verifier = verifier_against(&server);
        let event = serde_json::json!({"id": "WH-1"});
        assert!(
            !verifier
                .verify(&transmission_headers(), &event, &correlation_id())
                .await
        );
    }

    #[tokio::test]
    async fn test_missing_transmission_header_rejects_without_network() {
        // No mocks mounted: the verifier must reject before calling out.
        let server = MockServer::start().await;
        let verifier = verifier_against(&server);

        let mut headers = transmission_headers();
        headers.remove("paypal-transmission-sig");

        let event = serde_json::json!({"id": "WH-1"});
        assert!(!verifier.verify(&headers, &event, &correlation_id()).await);
    }

    #[tokio::test]
    async fn test_missing_webhook_id_rejects() {
        let server = MockServer::start().await;
        let verifier = PaypalSignatureVerifier::new(
            "client-id".to_string(),
            "client-secret".to_string(),
            None,
            server.uri(),
        );

        let event = serde_json::json!({"id": "WH-1"});
        assert!(
            !verifier
                .verify(&transmission_headers(), &event, &correlation_id())
                .await
        );
    }

    #[tokio::test]
    async fn test_oauth_failure_rejects() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/oauth2/token"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let verifier = verifier_against(&server);
        let event = serde_json::json!({"id": "WH-1"});
        assert!(
            !verifier
                .verify(&transmission_headers(), &event, &correlation_id())
                .await
        );
    }

    #[tokio::test]
    async fn test_verify_endpoint_error_rejects() {
        let server = MockServer::start().await;
        mount_oauth(&server).await;
        Mock::given(method("POST"))
            .and(path("/v1/notifications/verify-webhook-signature"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let verifier = verifier_against(&server);
        let event = serde_json::json!({"id": "WH-1"});
        assert!(
            !verifier
                .verify(&transmission_headers(), &event, &correlation_id())
                .await
        );
    }
}

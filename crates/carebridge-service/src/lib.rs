//! # Carebridge Webhook Service
//!
//! HTTP server receiving provider webhooks and feeding them through the
//! ingestion pipeline.
//!
//! This service provides:
//! - Per-provider webhook endpoints with signature verification
//! - The chat provider's one-time GET verification handshake
//! - Duplicate suppression through the idempotency tracker before queueing
//! - Dead-letter inspection endpoints for operators
//! - A health check endpoint
//!
//! The handlers stay thin: verify, identify, claim, enqueue, acknowledge.
//! Everything after the acknowledgement happens in the background worker.

pub mod config;
pub mod rate_limit;
pub mod worker;

use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use carebridge_core::{
    dead_letter::{DeadLetterError, DeadLetterFilters, DeadLetterService},
    event_id::EventIdentifier,
    idempotency::{IdempotencyError, IdempotencyTracker},
    payments::PaymentWebhookAdapter,
    queue::{JobPayload, QueueError, QueueGateway},
    signature::{InstagramSignatureVerifier, SignatureError, INSTAGRAM_SIGNATURE_HEADER},
    CorrelationId, Provider, Uuid,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::HashMap, net::SocketAddr, sync::Arc};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};

use config::ServiceConfig;
use rate_limit::FixedWindowLimiter;

pub use config::ConfigError;

/// Header a caller may use to supply its own correlation id.
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

// ============================================================================
// Application State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Configuration for the service
    pub config: ServiceConfig,

    /// Verifier for the chat provider's HMAC signatures
    pub instagram_verifier: Arc<InstagramSignatureVerifier>,

    /// Payment adapters keyed by provider
    pub payment_adapters: HashMap<Provider, Arc<dyn PaymentWebhookAdapter>>,

    /// Idempotency tracker consulted before queueing
    pub tracker: Arc<dyn IdempotencyTracker>,

    /// Queue gateway jobs are handed to
    pub queue: Arc<dyn QueueGateway>,

    /// Dead-letter inspection; absent when no encryption key is configured
    pub dead_letters: Option<DeadLetterService>,

    /// Per-route rate limiter for webhook POSTs
    pub rate_limiter: Arc<FixedWindowLimiter>,
}

impl AppState {
    /// Create new application state
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ServiceConfig,
        instagram_verifier: Arc<InstagramSignatureVerifier>,
        razorpay: Arc<dyn PaymentWebhookAdapter>,
        paypal: Arc<dyn PaymentWebhookAdapter>,
        tracker: Arc<dyn IdempotencyTracker>,
        queue: Arc<dyn QueueGateway>,
        dead_letters: Option<DeadLetterService>,
    ) -> Self {
        let rate_limiter = Arc::new(FixedWindowLimiter::from_config(&config.rate_limit));
        let payment_adapters = HashMap::from([
            (Provider::Razorpay, razorpay),
            (Provider::Paypal, paypal),
        ]);

        Self {
            config,
            instagram_verifier,
            payment_adapters,
            tracker,
            queue,
            dead_letters,
            rate_limiter,
        }
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Webhook handler errors with HTTP status code mapping.
///
/// - `400 Bad Request`: malformed payloads (permanent, do not retry)
/// - `401 Unauthorized`: signature verification rejected the delivery
/// - `403 Forbidden`: handshake token mismatch
/// - `404 Not Found`: unknown dead-letter record
/// - `500 Internal Server Error`: the service itself is misconfigured
/// - `503 Service Unavailable`: transient infrastructure failure; the
///   provider should redeliver
///
/// Messages returned to clients are sanitized. Details stay in server-side
/// logs under the request's correlation id.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Signature verification rejected the delivery.
    #[error("Webhook authentication failed")]
    AuthenticationFailed { provider: Provider },

    /// A verifier cannot run because its secret is missing.
    #[error("Webhook verification is not configured for {provider}")]
    VerifierMisconfigured { provider: &'static str },

    /// The request body is not valid JSON.
    #[error("Invalid webhook payload: {message}")]
    InvalidPayload { message: String },

    /// The handshake token did not match.
    #[error("Webhook verification handshake rejected")]
    HandshakeRejected,

    /// Unknown dead-letter record id.
    #[error("Dead-letter record not found: {id}")]
    DeadLetterNotFound { id: Uuid },

    /// Transient storage or queue failure.
    #[error("Temporarily unable to accept webhook: {message}")]
    Infrastructure { message: String },
}

impl From<SignatureError> for ApiError {
    fn from(e: SignatureError) -> Self {
        match e {
            SignatureError::SecretNotConfigured { provider } => {
                Self::VerifierMisconfigured { provider }
            }
        }
    }
}

impl From<IdempotencyError> for ApiError {
    fn from(e: IdempotencyError) -> Self {
        Self::Infrastructure {
            message: e.to_string(),
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(e: QueueError) -> Self {
        Self::Infrastructure {
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::AuthenticationFailed { provider } => {
                warn!(provider = %provider, "Rejected webhook with invalid signature");
                (
                    StatusCode::UNAUTHORIZED,
                    "Webhook authentication failed".to_string(),
                )
            }
            Self::VerifierMisconfigured { provider } => {
                error!(provider = %provider, "Webhook secret is not configured");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Webhook verification is not configured".to_string(),
                )
            }
            Self::InvalidPayload { .. } => (StatusCode::BAD_REQUEST, self.to_string()),
            Self::HandshakeRejected => (StatusCode::FORBIDDEN, self.to_string()),
            Self::DeadLetterNotFound { .. } => (StatusCode::NOT_FOUND, self.to_string()),
            Self::Infrastructure { message } => {
                error!(error = %message, "Infrastructure failure while accepting webhook");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Temporarily unable to accept webhook. Please retry.".to_string(),
                )
            }
        };

        let body = serde_json::json!({
            "error": message,
            "status": status.as_u16(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        (status, Json(body)).into_response()
    }
}

/// Service-level errors
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Failed to bind to address {address}: {message}")]
    BindFailed { address: String, message: String },

    #[error("Server failed: {message}")]
    ServerFailed { message: String },

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),
}

// ============================================================================
// Response Types
// ============================================================================

/// Acknowledgement returned for an accepted (or duplicate) delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookAck {
    /// `accepted` for a newly queued event, `duplicate` for a replay.
    pub status: String,
    pub event_id: String,
    pub correlation_id: CorrelationId,
}

/// Dead-letter metadata as listed; never includes payload content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterSummary {
    pub id: Uuid,
    pub event_id: String,
    pub provider: Provider,
    pub error_message: String,
    pub retry_count: u32,
    pub failed_at: carebridge_core::Timestamp,
}

// ============================================================================
// HTTP Server
// ============================================================================

/// Create HTTP router with all endpoints
pub fn create_router(state: AppState) -> Router {
    let webhook_routes = Router::new()
        .route(
            "/webhooks/instagram",
            get(handle_instagram_handshake).post(handle_instagram_webhook),
        )
        .route("/webhooks/razorpay", post(handle_razorpay_webhook))
        .route("/webhooks/paypal", post(handle_paypal_webhook))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_middleware,
        ));

    let operator_routes = Router::new()
        .route("/dead-letters", get(list_dead_letters))
        .route("/dead-letters/{id}", get(get_dead_letter));

    let health_routes = Router::new().route("/health", get(handle_health_check));

    Router::new()
        .merge(webhook_routes)
        .merge(operator_routes)
        .merge(health_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(DefaultBodyLimit::max(state.config.server.max_body_size))
                .into_inner(),
        )
        .with_state(state)
}

/// Start HTTP server
pub async fn start_server(state: AppState) -> Result<(), ServiceError> {
    let config = state.config.clone();
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener =
        tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ServiceError::BindFailed {
                address: addr.to_string(),
                message: e.to_string(),
            })?;

    info!("Starting HTTP server on {}", addr);

    let shutdown_timeout = std::time::Duration::from_secs(config.server.shutdown_timeout_seconds);

    let shutdown_signal = async move {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("Failed to install Ctrl+C signal handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received SIGINT (Ctrl+C), initiating graceful shutdown with {}s timeout", shutdown_timeout.as_secs());
            },
            _ = terminate => {
                info!("Received SIGTERM, initiating graceful shutdown with {}s timeout", shutdown_timeout.as_secs());
            },
        }
    };

    // In-flight requests complete before the listener stops.
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .map_err(|e| ServiceError::ServerFailed {
            message: e.to_string(),
        })?;

    info!("HTTP server shutdown complete");
    Ok(())
}

// ============================================================================
// Webhook Handlers
// ============================================================================

/// Correlation id from the request header, or a fresh one.
fn correlation_id_from(headers: &HeaderMap) -> CorrelationId {
    headers
        .get(CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or_default()
}

/// Lower-cased header map for the verifier and adapter contracts.
fn normalized_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect()
}

/// Chat provider verification handshake parameters.
#[derive(Debug, Deserialize)]
pub struct HandshakeParams {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// One-time subscription handshake: echo the challenge only when the
/// presented token matches the configured one.
#[instrument(skip(state, params))]
async fn handle_instagram_handshake(
    State(state): State<AppState>,
    Query(params): Query<HandshakeParams>,
) -> Result<String, ApiError> {
    let configured = state
        .config
        .providers
        .instagram
        .verify_token
        .as_deref()
        .ok_or(ApiError::VerifierMisconfigured {
            provider: "instagram",
        })?;

    let mode_ok = params.mode.as_deref() == Some("subscribe");
    let token_ok = params.verify_token.as_deref() == Some(configured);

    match (mode_ok && token_ok, params.challenge) {
        (true, Some(challenge)) => {
            info!("Chat provider verification handshake accepted");
            Ok(challenge)
        }
        _ => {
            warn!("Chat provider verification handshake rejected");
            Err(ApiError::HandshakeRejected)
        }
    }
}

/// `POST /webhooks/instagram`
#[instrument(skip(state, headers, body))]
async fn handle_instagram_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ApiError> {
    let correlation_id = correlation_id_from(&headers);
    let signature = headers
        .get(INSTAGRAM_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let verified = state
        .instagram_verifier
        .verify(signature, &body, &correlation_id)?;
    if !verified {
        return Err(ApiError::AuthenticationFailed {
            provider: Provider::Instagram,
        });
    }

    let payload: Value = serde_json::from_slice(&body).map_err(|e| ApiError::InvalidPayload {
        message: e.to_string(),
    })?;

    let event_id = EventIdentifier::chat_event_id(&payload);
    claim_and_enqueue(&state, Provider::Instagram, event_id, payload, correlation_id).await
}

/// `POST /webhooks/razorpay`
async fn handle_razorpay_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ApiError> {
    handle_payment_webhook(state, Provider::Razorpay, headers, body).await
}

/// `POST /webhooks/paypal`
async fn handle_paypal_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ApiError> {
    handle_payment_webhook(state, Provider::Paypal, headers, body).await
}

/// Shared payment flow: verify through the provider's adapter, derive the
/// event identity, then claim and enqueue.
#[instrument(skip(state, headers, body), fields(provider = %provider))]
async fn handle_payment_webhook(
    state: AppState,
    provider: Provider,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ApiError> {
    let correlation_id = correlation_id_from(&headers);
    let adapter = state
        .payment_adapters
        .get(&provider)
        .ok_or(ApiError::VerifierMisconfigured {
            provider: "payments",
        })?
        .clone();

    let header_map = normalized_headers(&headers);
    let verified = adapter
        .verify_webhook(&header_map, &body, &correlation_id)
        .await?;
    if !verified {
        return Err(ApiError::AuthenticationFailed { provider });
    }

    let payload: Value = serde_json::from_slice(&body).map_err(|e| ApiError::InvalidPayload {
        message: e.to_string(),
    })?;

    let event_id = adapter.extract_event_id(&payload, &header_map);
    claim_and_enqueue(&state, provider, event_id, payload, correlation_id).await
}

/// Claim the event's idempotency key and enqueue a job when this delivery is
/// the first sighting. Duplicate deliveries are acknowledged without a
/// second job.
async fn claim_and_enqueue(
    state: &AppState,
    provider: Provider,
    event_id: String,
    payload: Value,
    correlation_id: CorrelationId,
) -> Result<Json<WebhookAck>, ApiError> {
    let outcome = state
        .tracker
        .claim(&event_id, provider, &correlation_id)
        .await?;

    if !outcome.is_new() {
        info!(
            event_id = %event_id,
            provider = %provider,
            correlation_id = %correlation_id,
            status = %outcome.record().status,
            "Duplicate delivery acknowledged without enqueueing"
        );
        return Ok(Json(WebhookAck {
            status: "duplicate".to_string(),
            event_id,
            correlation_id,
        }));
    }

    state
        .queue
        .enqueue(JobPayload {
            provider,
            event_id: event_id.clone(),
            raw_payload: payload,
            correlation_id,
        })
        .await?;

    info!(
        event_id = %event_id,
        provider = %provider,
        correlation_id = %correlation_id,
        "Webhook accepted and queued"
    );

    Ok(Json(WebhookAck {
        status: "accepted".to_string(),
        event_id,
        correlation_id,
    }))
}

// ============================================================================
// Operator Handlers
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct DeadLetterListParams {
    pub provider: Option<Provider>,
    pub limit: Option<usize>,
}

/// `GET /dead-letters`: metadata listing, newest first.
async fn list_dead_letters(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<DeadLetterListParams>,
) -> Result<Json<Vec<DeadLetterSummary>>, ApiError> {
    let correlation_id = correlation_id_from(&headers);
    let service = dead_letter_service(&state)?;

    let filters = DeadLetterFilters {
        provider: params.provider,
        limit: params.limit.or(Some(100)),
    };

    let records = service
        .list(&correlation_id, &filters)
        .await
        .map_err(dead_letter_error)?;

    let summaries = records
        .into_iter()
        .map(|r| DeadLetterSummary {
            id: r.id,
            event_id: r.event_id,
            provider: r.provider,
            error_message: r.error_message,
            retry_count: r.retry_count,
            failed_at: r.failed_at,
        })
        .collect();

    Ok(Json(summaries))
}

/// `GET /dead-letters/{id}`: one record with its payload decrypted for
/// inspection.
async fn get_dead_letter(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let service = dead_letter_service(&state)?;

    let (record, payload) = service
        .get_decrypted(id)
        .await
        .map_err(dead_letter_error)?
        .ok_or(ApiError::DeadLetterNotFound { id })?;

    Ok(Json(serde_json::json!({
        "id": record.id,
        "event_id": record.event_id,
        "provider": record.provider,
        "error_message": record.error_message,
        "retry_count": record.retry_count,
        "failed_at": record.failed_at,
        "payload": payload,
    })))
}

fn dead_letter_service(state: &AppState) -> Result<&DeadLetterService, ApiError> {
    state.dead_letters.as_ref().ok_or(ApiError::Infrastructure {
        message: "dead-letter storage is not configured".to_string(),
    })
}

fn dead_letter_error(e: DeadLetterError) -> ApiError {
    ApiError::Infrastructure {
        message: e.to_string(),
    }
}

// ============================================================================
// Health Handler
// ============================================================================

/// `GET /health`: liveness probe.
async fn handle_health_check() -> Json<Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

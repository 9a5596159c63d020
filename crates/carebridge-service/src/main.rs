//! # Carebridge Webhook Service
//!
//! Binary entry point for the webhook HTTP service.
//!
//! This executable:
//! - Loads configuration from environment and files
//! - Initializes logging
//! - Wires verifiers, adapters, storage, and the queue
//! - Starts the background worker (when a queue backend is configured)
//! - Starts the HTTP server

use carebridge_core::{
    adapters::{
        FilesystemDeadLetterStore, FilesystemIdempotencyTracker, InMemoryDeadLetterStore,
        InMemoryIdempotencyTracker,
    },
    crypto::Encryptor,
    dead_letter::{DeadLetterService, DeadLetterStore},
    idempotency::IdempotencyTracker,
    payments::{PaymentWebhookAdapter, PaypalAdapter, RazorpayAdapter},
    queue::{
        InMemoryQueueGateway, JobOptions, PlaceholderQueueGateway, QueueGateway, RetryPolicy,
    },
    signature::{InstagramSignatureVerifier, PaypalSignatureVerifier, RazorpaySignatureVerifier},
};
use carebridge_service::{
    config::{QueueBackend, ServiceConfig},
    start_server,
    worker::{LoggingJobHandler, Worker},
    AppState, ServiceError,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "carebridge_service=info,carebridge_core=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Carebridge Webhook Service");

    // -------------------------------------------------------------------------
    // Load configuration
    //
    // Sources (applied in order; later sources override earlier ones):
    //  1. /etc/carebridge/service.yaml     system-wide defaults
    //  2. ./config/service.yaml            deployment-local override
    //  3. Path given by CB_CONFIG_FILE env operator-specified file
    //  4. Environment variables prefixed CB__ (double-underscore separator)
    //     e.g. CB__SERVER__PORT=9090 sets server.port = 9090
    //
    // All fields carry serde defaults, so absent files or an unconfigured
    // environment produce a valid config. A malformed file or an environment
    // variable that cannot be coerced IS a hard error because it indicates
    // deliberate-but-broken operator configuration.
    // -------------------------------------------------------------------------
    let mut config_builder = config::Config::builder()
        .add_source(
            config::File::with_name("/etc/carebridge/service")
                .required(false)
                .format(config::FileFormat::Yaml),
        )
        .add_source(
            config::File::with_name("config/service")
                .required(false)
                .format(config::FileFormat::Yaml),
        );

    // Optional explicit path supplied by the operator.
    if let Ok(explicit_path) = std::env::var("CB_CONFIG_FILE") {
        if !explicit_path.is_empty() {
            config_builder = config_builder.add_source(
                config::File::with_name(&explicit_path)
                    .required(true)
                    .format(config::FileFormat::Yaml),
            );
            info!(path = %explicit_path, "Loading configuration from explicit path");
        }
    }

    let config = match config_builder
        .add_source(config::Environment::with_prefix("CB").separator("__"))
        .build()
    {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "Failed to build configuration; aborting");
            std::process::exit(3);
        }
    };

    let service_config: ServiceConfig = match config.try_deserialize() {
        Ok(sc) => sc,
        Err(e) => {
            error!(
                error = %e,
                "Could not deserialize service configuration; aborting. \
                 Fix the configuration and restart."
            );
            std::process::exit(3);
        }
    };

    if let Err(e) = service_config.validate() {
        error!(error = %e, "Service configuration is invalid; aborting");
        std::process::exit(3);
    }

    // -------------------------------------------------------------------------
    // Wire verifiers and payment adapters
    // -------------------------------------------------------------------------
    let providers = &service_config.providers;

    if providers.instagram.app_secret.is_none() {
        warn!("No chat provider app secret configured; chat deliveries will be rejected loudly");
    }
    let instagram_verifier = Arc::new(InstagramSignatureVerifier::new(
        providers.instagram.app_secret.clone(),
    ));

    let razorpay: Arc<dyn PaymentWebhookAdapter> = Arc::new(RazorpayAdapter::new(
        RazorpaySignatureVerifier::new(providers.razorpay.webhook_secret.clone()),
    ));

    let paypal: Arc<dyn PaymentWebhookAdapter> = Arc::new(PaypalAdapter::new(
        PaypalSignatureVerifier::new(
            providers.paypal.client_id.clone().unwrap_or_default(),
            providers.paypal.client_secret.clone().unwrap_or_default(),
            providers.paypal.webhook_id.clone(),
            providers.paypal.base_url.clone(),
        ),
    ));

    // -------------------------------------------------------------------------
    // Wire storage
    //
    // A configured path selects the filesystem adapter; otherwise state lives
    // in memory and is lost on restart.
    // -------------------------------------------------------------------------
    let tracker: Arc<dyn IdempotencyTracker> = match &service_config.idempotency.path {
        Some(path) => {
            match FilesystemIdempotencyTracker::new(PathBuf::from(path)).await {
                Ok(tracker) => {
                    info!(path = %path, "Using filesystem idempotency storage");
                    Arc::new(tracker)
                }
                Err(e) => {
                    error!(error = %e, path = %path, "Failed to open idempotency storage; aborting");
                    std::process::exit(3);
                }
            }
        }
        None => {
            warn!("No idempotency path configured; duplicate tracking is in-memory only");
            Arc::new(InMemoryIdempotencyTracker::new())
        }
    };

    let dead_letters = match &service_config.encryption.key_base64 {
        Some(key) => {
            let encryptor = match Encryptor::from_base64_key(key) {
                Ok(encryptor) => Arc::new(encryptor),
                Err(e) => {
                    error!(error = %e, "Failed to construct payload encryptor; aborting");
                    std::process::exit(3);
                }
            };

            let store: Arc<dyn DeadLetterStore> = match &service_config.dead_letter.path {
                Some(path) => match FilesystemDeadLetterStore::new(PathBuf::from(path)).await {
                    Ok(store) => {
                        info!(path = %path, "Using filesystem dead-letter storage");
                        Arc::new(store)
                    }
                    Err(e) => {
                        error!(error = %e, path = %path, "Failed to open dead-letter storage; aborting");
                        std::process::exit(3);
                    }
                },
                None => {
                    warn!("No dead-letter path configured; dead letters are in-memory only");
                    Arc::new(InMemoryDeadLetterStore::new())
                }
            };

            Some(DeadLetterService::new(store, encryptor))
        }
        None => {
            warn!("No encryption key configured; dead-letter endpoints are disabled");
            None
        }
    };

    // -------------------------------------------------------------------------
    // Wire queue and worker
    // -------------------------------------------------------------------------
    let retry = &service_config.queue.retry;
    let retry_policy = RetryPolicy::new(
        retry.max_attempts,
        Duration::from_secs(retry.initial_delay_seconds),
        Duration::from_secs(retry.max_delay_seconds),
        retry.backoff_multiplier,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut worker_handle = None;

    let queue: Arc<dyn QueueGateway> = match service_config.queue.backend {
        QueueBackend::Memory => {
            let gateway = Arc::new(InMemoryQueueGateway::new(JobOptions {
                retry: retry_policy,
                completed_retention: service_config.queue.completed_retention,
            }));

            let dead_letter_service = match dead_letters.clone() {
                Some(service) => service,
                // validate() requires the key for the memory backend.
                None => {
                    error!("Queue backend requires an encryption key; aborting");
                    std::process::exit(3);
                }
            };

            let worker = Worker::new(
                Arc::clone(&gateway),
                Arc::clone(&tracker),
                dead_letter_service,
                Arc::new(LoggingJobHandler),
                shutdown_rx,
            );
            worker_handle = Some(tokio::spawn(worker.run()));
            info!("Started in-memory queue backend with background worker");

            gateway
        }
        QueueBackend::None => {
            warn!("No queue backend configured; deliveries are acknowledged and dropped");
            Arc::new(PlaceholderQueueGateway::new())
        }
    };

    let state = AppState::new(
        service_config.clone(),
        instagram_verifier,
        razorpay,
        paypal,
        tracker,
        queue,
        dead_letters,
    );

    info!(
        host = %service_config.server.host,
        port = service_config.server.port,
        "Starting HTTP server"
    );

    let server_result = start_server(state).await;

    // Stop the worker once the server has drained.
    let _ = shutdown_tx.send(true);
    if let Some(handle) = worker_handle {
        if let Err(e) = handle.await {
            error!(error = %e, "Worker task panicked during shutdown");
        }
    }

    if let Err(e) = server_result {
        error!("Failed to start server: {}", e);

        let exit_code = match e {
            ServiceError::BindFailed { .. } => 1,
            ServiceError::ServerFailed { .. } => 2,
            ServiceError::Configuration(_) => 3,
        };

        std::process::exit(exit_code);
    }

    Ok(())
}

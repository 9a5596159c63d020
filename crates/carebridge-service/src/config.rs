//! Configuration types for the HTTP service.
//!
//! Every field carries a serde default, so an empty configuration file (or no
//! file at all) yields a runnable service. Provider secrets default to absent
//! and the corresponding verifiers then fail loudly (chat) or closed
//! (payments) per their own contracts. [`ServiceConfig::validate`] is the one
//! gate deliberate-but-broken operator configuration cannot pass.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};

/// Required decoded length of the payload encryption key.
const ENCRYPTION_KEY_LEN: usize = 32;

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// HTTP server settings
    pub server: ServerConfig,

    /// Per-provider webhook settings
    pub providers: ProvidersConfig,

    /// Dead-letter payload encryption
    pub encryption: EncryptionConfig,

    /// Queue backend settings
    pub queue: QueueConfig,

    /// Rate limiting for webhook POST routes
    pub rate_limit: RateLimitConfig,

    /// Dead-letter storage settings
    pub dead_letter: StorageConfig,

    /// Idempotency storage settings
    pub idempotency: StorageConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Request timeout in seconds
    pub timeout_seconds: u64,

    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,

    /// Maximum request size in bytes
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            timeout_seconds: 30,
            shutdown_timeout_seconds: 30,
            max_body_size: 1024 * 1024, // 1MB; webhook payloads are small
        }
    }
}

/// All provider sections.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ProvidersConfig {
    pub instagram: InstagramConfig,
    pub razorpay: RazorpayConfig,
    pub paypal: PaypalConfig,
}

/// Chat provider settings.
#[derive(Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct InstagramConfig {
    /// App secret for HMAC signature verification. Absent means signature
    /// verification errors loudly on every delivery.
    pub app_secret: Option<String>,

    /// Token the GET handshake must present to receive the challenge echo.
    pub verify_token: Option<String>,
}

impl std::fmt::Debug for InstagramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstagramConfig")
            .field("app_secret", &self.app_secret.as_ref().map(|_| "<REDACTED>"))
            .field(
                "verify_token",
                &self.verify_token.as_ref().map(|_| "<REDACTED>"),
            )
            .finish()
    }
}

/// HMAC payment provider settings.
#[derive(Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RazorpayConfig {
    /// Webhook secret for HMAC signature verification. Absent means every
    /// delivery is rejected.
    pub webhook_secret: Option<String>,
}

impl std::fmt::Debug for RazorpayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RazorpayConfig")
            .field(
                "webhook_secret",
                &self.webhook_secret.as_ref().map(|_| "<REDACTED>"),
            )
            .finish()
    }
}

/// Remote-verification payment provider settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaypalConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Webhook id registered with the provider; required for verification.
    pub webhook_id: Option<String>,
    /// API base URL; the sandbox endpoint by default.
    pub base_url: String,
}

impl Default for PaypalConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            webhook_id: None,
            base_url: "https://api-m.sandbox.paypal.com".to_string(),
        }
    }
}

impl std::fmt::Debug for PaypalConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaypalConfig")
            .field("client_id", &self.client_id.as_ref().map(|_| "<REDACTED>"))
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "<REDACTED>"),
            )
            .field("webhook_id", &self.webhook_id)
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Dead-letter payload encryption settings.
#[derive(Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EncryptionConfig {
    /// Base64-encoded 32-byte AES-256-GCM key. Required whenever the
    /// dead-letter path is active.
    pub key_base64: Option<String>,
}

impl std::fmt::Debug for EncryptionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionConfig")
            .field("key_base64", &self.key_base64.as_ref().map(|_| "<REDACTED>"))
            .finish()
    }
}

/// Queue backend selection. The default is `none`: until a backend is
/// deliberately configured, deliveries are acknowledged through the
/// placeholder gateway and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueBackend {
    /// In-process queue with a worker loop.
    Memory,
    /// No queue; the placeholder gateway acknowledges and drops.
    None,
}

/// Queue and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub backend: QueueBackend,

    /// Completed jobs retained before pruning
    pub completed_retention: usize,

    pub retry: RetryConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::None,
            completed_retention: 100,
            retry: RetryConfig::default(),
        }
    }
}

/// Retry policy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub max_attempts: u32,

    /// Delay after the first failure, in seconds
    pub initial_delay_seconds: u64,

    /// Cap on any single delay, in seconds
    pub max_delay_seconds: u64,

    /// Exponential growth factor
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_seconds: 60,
            max_delay_seconds: 240,
            backoff_multiplier: 2.0,
        }
    }
}

/// Fixed-window rate limit for webhook POST routes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,

    /// Requests allowed per window, per provider route
    pub max_requests: u32,

    /// Window length in seconds
    pub window_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: 300,
            window_seconds: 60,
        }
    }
}

/// Storage location for a filesystem-backed adapter. No path means the
/// in-memory adapter is used instead.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    pub path: Option<String>,
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },
}

impl ServiceConfig {
    /// Reject configurations that would start a broken service.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Invalid {
                message: "server.port must be non-zero".to_string(),
            });
        }

        if self.server.max_body_size == 0 {
            return Err(ConfigError::Invalid {
                message: "server.max_body_size must be non-zero".to_string(),
            });
        }

        if let Some(key) = &self.encryption.key_base64 {
            let decoded = BASE64.decode(key).map_err(|_| ConfigError::Invalid {
                message: "encryption.key_base64 is not valid base64".to_string(),
            })?;
            if decoded.len() != ENCRYPTION_KEY_LEN {
                return Err(ConfigError::Invalid {
                    message: format!(
                        "encryption.key_base64 must decode to {} bytes, got {}",
                        ENCRYPTION_KEY_LEN,
                        decoded.len()
                    ),
                });
            }
        } else if self.queue.backend == QueueBackend::Memory {
            // The worker dead-letters exhausted jobs, which requires the key.
            return Err(ConfigError::Missing {
                key: "encryption.key_base64".to_string(),
            });
        }

        if self.queue.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                message: "queue.retry.max_attempts must be at least 1".to_string(),
            });
        }

        if self.rate_limit.enabled {
            if self.rate_limit.max_requests == 0 {
                return Err(ConfigError::Invalid {
                    message: "rate_limit.max_requests must be non-zero".to_string(),
                });
            }
            if self.rate_limit.window_seconds == 0 {
                return Err(ConfigError::Invalid {
                    message: "rate_limit.window_seconds must be non-zero".to_string(),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

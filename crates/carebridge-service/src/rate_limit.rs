//! Fixed-window rate limiting for webhook POST routes.
//!
//! Windows are tracked per request path, so a burst on one provider route
//! never starves another. Only POST requests are counted; the chat provider's
//! GET handshake and the operator endpoints pass through unlimited.

use crate::AppState;
use axum::{
    extract::{Request, State},
    http::{Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::config::RateLimitConfig;

struct Window {
    started_at: Instant,
    count: u32,
}

/// Per-key fixed-window counter.
#[derive(Debug)]
pub struct FixedWindowLimiter {
    enabled: bool,
    max_requests: u32,
    window: Duration,
    windows: Mutex<HashMap<String, Window>>,
}

impl std::fmt::Debug for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Window")
            .field("count", &self.count)
            .finish()
    }
}

impl FixedWindowLimiter {
    pub fn new(enabled: bool, max_requests: u32, window: Duration) -> Self {
        Self {
            enabled,
            max_requests,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(
            config.enabled,
            config.max_requests,
            Duration::from_secs(config.window_seconds),
        )
    }

    /// Count one request against `key`. Returns `false` when the window's
    /// budget is spent.
    pub fn try_acquire(&self, key: &str) -> bool {
        if !self.enabled {
            return true;
        }

        let now = Instant::now();
        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            // Poisoned lock: a panic elsewhere must not block intake.
            Err(poisoned) => poisoned.into_inner(),
        };

        let window = windows.entry(key.to_string()).or_insert(Window {
            started_at: now,
            count: 0,
        });

        if now.duration_since(window.started_at) >= self.window {
            window.started_at = now;
            window.count = 0;
        }

        if window.count >= self.max_requests {
            return false;
        }

        window.count += 1;
        true
    }
}

/// Axum middleware enforcing the limiter on POST requests.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if request.method() == Method::POST {
        let key = request.uri().path().to_string();
        if !state.rate_limiter.try_acquire(&key) {
            warn!(route = %key, "Rate limit exceeded for webhook route");
            let body = serde_json::json!({
                "error": "Rate limit exceeded. Retry later.",
                "status": StatusCode::TOO_MANY_REQUESTS.as_u16(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            });
            return (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
        }
    }

    next.run(request).await
}

#[cfg(test)]
#[path = "rate_limit_tests.rs"]
mod tests;

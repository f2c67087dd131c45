//! Sliding-window rate limiting with a pluggable backend
//!
//! The in-memory implementation keeps an ordered set of recent call
//! timestamps per dependency key. A shared backend (e.g. one backed by a
//! networked store) can be supplied for multi-instance deployments; when
//! the configuration names one but none is available, construction logs a
//! degradation notice and falls back to process-local limiting. The
//! fallback is never silent.

use crate::config::RateLimitConfig;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Result of a rate-limit check
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitDecision {
    /// Whether the call was admitted
    pub allowed: bool,

    /// Calls remaining in the current window after this decision
    pub remaining: u32,

    /// How long until the window slides past the oldest call; set when the
    /// call was rejected
    pub retry_after: Option<Duration>,
}

/// Pluggable rate-limit backend (process-local or shared)
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RateLimitBackend: Send + Sync {
    /// Check and consume one admission slot for `key`
    async fn check(&self, key: &str, limit: u32, window: Duration) -> RateLimitDecision;

    /// Inspect the window without consuming a slot
    async fn status(&self, key: &str, limit: u32, window: Duration) -> RateLimitDecision;

    /// Clear the window for `key`
    async fn reset(&self, key: &str);
}

/// In-memory sliding-window rate limiter
///
/// Does not share state between process instances; suitable as the
/// process-local default and as the fallback when a shared backend is
/// unavailable.
#[derive(Default)]
pub struct InMemoryRateLimiter {
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl InMemoryRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    fn prune(window: &mut VecDeque<Instant>, cutoff: Instant) {
        while matches!(window.front(), Some(&t) if t <= cutoff) {
            window.pop_front();
        }
    }
}

#[async_trait]
impl RateLimitBackend for InMemoryRateLimiter {
    async fn check(&self, key: &str, limit: u32, window: Duration) -> RateLimitDecision {
        let mut windows = self.windows.lock().await;
        let now = Instant::now();
        let bucket = windows.entry(key.to_string()).or_default();
        Self::prune(bucket, now - window);

        let count = bucket.len() as u32;
        if count >= limit {
            let retry_after = bucket
                .front()
                .map(|oldest| (*oldest + window).saturating_duration_since(now));
            debug!(key, count, limit, "rate limit window saturated");
            return RateLimitDecision {
                allowed: false,
                remaining: 0,
                retry_after,
            };
        }

        bucket.push_back(now);
        RateLimitDecision {
            allowed: true,
            remaining: limit - count - 1,
            retry_after: None,
        }
    }

    async fn status(&self, key: &str, limit: u32, window: Duration) -> RateLimitDecision {
        let mut windows = self.windows.lock().await;
        let now = Instant::now();
        let bucket = windows.entry(key.to_string()).or_default();
        Self::prune(bucket, now - window);

        let count = bucket.len() as u32;
        let remaining = limit.saturating_sub(count);
        RateLimitDecision {
            allowed: remaining > 0,
            remaining,
            retry_after: if remaining == 0 {
                bucket
                    .front()
                    .map(|oldest| (*oldest + window).saturating_duration_since(now))
            } else {
                None
            },
        }
    }

    async fn reset(&self, key: &str) {
        let mut windows = self.windows.lock().await;
        windows.remove(key);
    }
}

/// Select the rate-limit backend for the execution runtime
///
/// Prefers the supplied shared backend; when the configuration names a
/// shared backend but none was supplied, logs the degradation and uses the
/// process-local limiter.
pub fn backend_from_config(
    config: &RateLimitConfig,
    shared: Option<Arc<dyn RateLimitBackend>>,
) -> Arc<dyn RateLimitBackend> {
    match shared {
        Some(backend) => {
            info!(backend = "shared", "rate limiter initialized");
            backend
        }
        None => {
            if let Some(ref locator) = config.shared_backend {
                warn!(
                    locator = %locator,
                    "shared rate-limit backend unavailable, falling back to process-local"
                );
            } else {
                info!(backend = "in_memory", "rate limiter initialized");
            }
            Arc::new(InMemoryRateLimiter::new())
        }
    }
}

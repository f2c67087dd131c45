//! Execution runtime wrapping external dependency calls
//!
//! Composes, in order: sliding-window rate-limit admission, circuit-breaker
//! gating, and a mandatory deadline. Breaker accounting happens on every
//! outcome; cancellation abandons the call without counting it. Retry is
//! deliberately not here: the supervisor owns retry policy and classifies
//! failures before re-dispatching.

pub mod breaker;
pub mod rate_limit;

pub use breaker::{CircuitBreaker, CircuitState};
pub use rate_limit::{backend_from_config, InMemoryRateLimiter, RateLimitBackend, RateLimitDecision};

use crate::config::RuntimeConfig;
use crate::error::{PulseError, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Runtime wrapping any unit of work with admission control and a deadline
///
/// Breaker and window state is keyed by dependency; contention is only
/// between concurrent callers of the same dependency. No lock is held
/// across an external call.
pub struct ExecutionRuntime {
    config: RuntimeConfig,
    limiter: Arc<dyn RateLimitBackend>,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl ExecutionRuntime {
    /// Create a runtime with an optional shared rate-limit backend
    pub fn new(config: RuntimeConfig, shared_limiter: Option<Arc<dyn RateLimitBackend>>) -> Self {
        let limiter = backend_from_config(&config.rate_limit, shared_limiter);
        Self {
            config,
            limiter,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Get or create the breaker for a dependency key
    async fn breaker(&self, dependency: &str) -> Arc<CircuitBreaker> {
        if let Some(b) = self.breakers.read().await.get(dependency) {
            return b.clone();
        }

        let mut breakers = self.breakers.write().await;
        breakers
            .entry(dependency.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    dependency,
                    self.config.failure_threshold,
                    self.config.cooldown(),
                ))
            })
            .clone()
    }

    /// Run `fut` against `dependency` under admission control and `deadline`
    ///
    /// Ordering: rate-limit check (immediate `RateLimited`, no blocking
    /// wait), breaker gate (`CircuitOpen` fail-fast; half-open admits one
    /// trial), then the call under the deadline. Timeouts count as breaker
    /// failures. Domain errors from `fut` are propagated untouched, never
    /// reclassified; they still count toward the breaker.
    pub async fn run<T, F>(
        &self,
        dependency: &str,
        deadline: Duration,
        cancel: &CancellationToken,
        fut: F,
    ) -> Result<T>
    where
        T: Send,
        F: Future<Output = Result<T>> + Send,
    {
        let rule = self.config.rate_limit.rule_for(dependency);
        let decision = self
            .limiter
            .check(dependency, rule.limit, rule.window())
            .await;
        if !decision.allowed {
            return Err(PulseError::RateLimited {
                dependency: dependency.to_string(),
                retry_after_ms: decision
                    .retry_after
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or(rule.window_ms),
            });
        }

        let breaker = self.breaker(dependency).await;
        breaker.try_acquire().await?;

        let started = Instant::now();
        tokio::select! {
            _ = cancel.cancelled() => {
                // Partially completed work is discarded; neither a success
                // nor a failure for breaker accounting
                breaker.record_abandoned().await;
                debug!(dependency, "call abandoned on cancellation");
                Err(PulseError::Cancelled(dependency.to_string()))
            }
            result = tokio::time::timeout(deadline, fut) => match result {
                Err(_) => {
                    breaker.record_failure().await;
                    Err(PulseError::Timeout {
                        dependency: dependency.to_string(),
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    })
                }
                Ok(Ok(value)) => {
                    breaker.record_success().await;
                    Ok(value)
                }
                Ok(Err(err)) => {
                    breaker.record_failure().await;
                    Err(err)
                }
            }
        }
    }

    /// Snapshot of all breaker states for health reporting
    pub async fn breaker_states(&self) -> HashMap<String, CircuitState> {
        let breakers = self.breakers.read().await;
        let mut states = HashMap::with_capacity(breakers.len());
        for (key, breaker) in breakers.iter() {
            states.insert(key.clone(), breaker.state().await);
        }
        states
    }

    /// Non-consuming rate-limit probe for a dependency
    pub async fn rate_limit_status(&self, dependency: &str) -> RateLimitDecision {
        let rule = self.config.rate_limit.rule_for(dependency);
        self.limiter
            .status(dependency, rule.limit, rule.window())
            .await
    }
}

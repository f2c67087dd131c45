//! Circuit breaker for protecting external dependency calls
//!
//! States follow the usual machine: `closed` (normal operation) opens after
//! a threshold of consecutive failures; after the cool-down the breaker
//! admits exactly one half-open trial call, and a single success closes it
//! while a failure reopens it.

use crate::error::{PulseError, Result};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation, requests pass through
    Closed,

    /// Failing dependency, requests blocked
    Open,

    /// Testing recovery with a single trial call
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    /// Guards the single half-open trial slot
    trial_in_flight: bool,
}

/// Per-dependency circuit breaker
///
/// All mutation happens under the inner mutex; no lock is held across an
/// external call (the runtime acquires, releases, awaits the call, then
/// records the outcome).
#[derive(Debug)]
pub struct CircuitBreaker {
    dependency: String,
    failure_threshold: u32,
    cooldown: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(dependency: impl Into<String>, failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            dependency: dependency.into(),
            failure_threshold,
            cooldown,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    /// Admission gate, called before invoking the dependency
    ///
    /// Fails fast with `CircuitOpen` while open; in half-open, admits
    /// exactly one trial call and rejects the rest.
    pub async fn try_acquire(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;

        // Promote open -> half_open once the cool-down has elapsed
        if inner.state == CircuitState::Open {
            let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
            if elapsed >= self.cooldown {
                inner.state = CircuitState::HalfOpen;
                inner.trial_in_flight = false;
                info!(dependency = %self.dependency, "circuit breaker half-open, testing recovery");
            }
        }

        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    Err(PulseError::CircuitOpen {
                        dependency: self.dependency.clone(),
                        retry_in_ms: 0,
                    })
                } else {
                    inner.trial_in_flight = true;
                    Ok(())
                }
            }
            CircuitState::Open => {
                let remaining = self.remaining_cooldown(&inner);
                Err(PulseError::CircuitOpen {
                    dependency: self.dependency.clone(),
                    retry_in_ms: remaining.as_millis() as u64,
                })
            }
        }
    }

    /// Record a successful call: reset the failure counter and close the
    /// breaker if it was half-open
    pub async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        inner.trial_in_flight = false;
        inner.consecutive_failures = 0;

        if inner.state != CircuitState::Closed {
            info!(dependency = %self.dependency, "circuit breaker closed, dependency recovered");
        }
        inner.state = CircuitState::Closed;
        inner.opened_at = None;
    }

    /// Record a failed call: bump the counter and open on threshold breach;
    /// any half-open failure reopens immediately
    pub async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.trial_in_flight = false;
        inner.consecutive_failures += 1;

        let should_open = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.consecutive_failures >= self.failure_threshold,
            CircuitState::Open => false,
        };

        if should_open {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            warn!(
                dependency = %self.dependency,
                failures = inner.consecutive_failures,
                cooldown_ms = self.cooldown.as_millis() as u64,
                "circuit breaker opened"
            );
        }
    }

    /// Release the trial slot without counting an outcome (cancellation)
    pub async fn record_abandoned(&self) {
        let mut inner = self.inner.lock().await;
        inner.trial_in_flight = false;
    }

    /// Current state, promoting open -> half_open if the cool-down elapsed
    pub async fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock().await;
        if inner.state == CircuitState::Open {
            let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
            if elapsed >= self.cooldown {
                inner.state = CircuitState::HalfOpen;
                inner.trial_in_flight = false;
            }
        }
        inner.state
    }

    /// Time until an open breaker may admit a trial call
    pub async fn time_until_recovery(&self) -> Duration {
        let inner = self.inner.lock().await;
        if inner.state != CircuitState::Open {
            return Duration::ZERO;
        }
        self.remaining_cooldown(&inner)
    }

    /// Reset to closed (operational override)
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.trial_in_flight = false;
        info!(dependency = %self.dependency, "circuit breaker reset");
    }

    fn remaining_cooldown(&self, inner: &BreakerInner) -> Duration {
        match inner.opened_at {
            Some(opened) => self.cooldown.saturating_sub(opened.elapsed()),
            None => Duration::ZERO,
        }
    }
}

//! Configuration for the pulse orchestration core
//!
//! Layered configuration in the usual order: built-in defaults, an optional
//! TOML file, then `PULSE_`-prefixed environment variables. All sections
//! deserialize with serde and carry sensible defaults so an empty config is
//! valid.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PulseConfig {
    pub supervisor: SupervisorConfig,
    pub runtime: RuntimeConfig,
    pub memory: MemoryConfig,
    pub retrieval: RetrievalConfig,
}

/// Supervisor state-machine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Maximum runs in `running` simultaneously (semaphore bound)
    pub max_concurrent_runs: usize,

    /// Per-step deadline for worker dispatch
    pub step_timeout_ms: u64,

    /// Attempt budget per step (first attempt included)
    pub max_attempts: u32,

    /// Base delay for exponential backoff between attempts
    pub backoff_base_ms: u64,

    /// Upper bound for a single backoff delay
    pub backoff_cap_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_runs: 8,
            step_timeout_ms: 30_000,
            max_attempts: 3,
            backoff_base_ms: 500,
            backoff_cap_ms: 30_000,
        }
    }
}

impl SupervisorConfig {
    /// Step deadline as a `Duration`
    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }

    /// Exponential backoff delay for a zero-based retry index, capped
    ///
    /// Jitter is applied by the caller so tests stay deterministic here.
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let exp = self.backoff_base_ms.saturating_mul(1u64 << retry.min(16));
        Duration::from_millis(exp.min(self.backoff_cap_ms))
    }
}

/// Execution runtime settings: circuit breaker and rate limiting
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Consecutive failures before a breaker opens
    pub failure_threshold: u32,

    /// Cool-down before an open breaker admits a half-open trial
    pub cooldown_ms: u64,

    pub rate_limit: RateLimitConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_ms: 60_000,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// Sliding-window rate-limit settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Default calls admitted per window
    pub default_limit: u32,

    /// Default window length
    pub default_window_ms: u64,

    /// Per-dependency overrides keyed by dependency name
    pub per_dependency: HashMap<String, RateLimitRule>,

    /// Optional shared backend locator; when set but no shared backend is
    /// supplied at construction, the runtime logs a degradation notice and
    /// falls back to process-local limiting
    pub shared_backend: Option<String>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default_limit: 60,
            default_window_ms: 60_000,
            per_dependency: HashMap::new(),
            shared_backend: None,
        }
    }
}

impl RateLimitConfig {
    /// Resolve the effective rule for a dependency key
    pub fn rule_for(&self, dependency: &str) -> RateLimitRule {
        self.per_dependency
            .get(dependency)
            .cloned()
            .unwrap_or(RateLimitRule {
                limit: self.default_limit,
                window_ms: self.default_window_ms,
            })
    }
}

/// Limit/window pair for one dependency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitRule {
    pub limit: u32,
    pub window_ms: u64,
}

impl RateLimitRule {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Memory tier retention settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Working-tier TTL, tied to session lifetime
    pub working_ttl_secs: u64,

    /// Episodic-tier TTL
    pub episodic_ttl_secs: u64,

    /// Background sweep interval
    pub sweep_interval_secs: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            working_ttl_secs: 3_600,
            episodic_ttl_secs: 14 * 86_400,
            sweep_interval_secs: 300,
        }
    }
}

/// Retrieval engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Final result count after rerank
    pub top_k: usize,

    /// Candidates fetched from each store before fusion
    pub fetch_limit: usize,

    /// Fusion weight for the vector path
    pub vector_weight: f32,

    /// Fusion weight for the graph path
    pub graph_weight: f32,

    /// Graph traversal depth
    pub graph_depth: usize,

    /// Context assembly budget in bytes
    pub context_budget_bytes: usize,

    /// Deadline per store lookup
    pub store_timeout_ms: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            fetch_limit: 20,
            vector_weight: 0.5,
            graph_weight: 0.5,
            graph_depth: 2,
            context_budget_bytes: 8_192,
            store_timeout_ms: 10_000,
        }
    }
}

impl RetrievalConfig {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

impl PulseConfig {
    /// Load configuration from an optional file plus `PULSE_` env vars
    ///
    /// Env vars use `__` as section separator, e.g.
    /// `PULSE_SUPERVISOR__MAX_ATTEMPTS=5`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        let settings = builder
            .add_source(config::Environment::with_prefix("PULSE").separator("__"))
            .build()?;

        let cfg: PulseConfig = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check cross-field invariants the type system cannot express
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| {
            Err(config::ConfigError::Message(msg.to_string()).into())
        };

        if self.supervisor.max_attempts == 0 {
            return fail("supervisor.max_attempts must be at least 1");
        }
        if self.supervisor.max_concurrent_runs == 0 {
            return fail("supervisor.max_concurrent_runs must be at least 1");
        }
        if self.runtime.failure_threshold == 0 {
            return fail("runtime.failure_threshold must be at least 1");
        }
        if self.retrieval.top_k == 0 {
            return fail("retrieval.top_k must be at least 1");
        }
        if self.retrieval.vector_weight < 0.0 || self.retrieval.graph_weight < 0.0 {
            return fail("retrieval fusion weights must be non-negative");
        }
        if self.retrieval.vector_weight + self.retrieval.graph_weight <= 0.0 {
            return fail("retrieval fusion weights must not both be zero");
        }
        Ok(())
    }
}

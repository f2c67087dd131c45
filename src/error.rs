//! Error types for the pulse orchestration core
//!
//! This module provides comprehensive error handling using thiserror for
//! structured error definitions and anyhow for error propagation. Every
//! failure surfaced by the core carries a stable machine-readable reason
//! code and a retryability classification used by the supervisor's retry
//! policy.

use thiserror::Error;

/// Retryability classification for supervisor retry decisions
///
/// `Retryable` failures may be re-dispatched with backoff; `Permanent`
/// failures terminate a run immediately. Degraded results are not errors
/// and are flagged on step outcomes instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient failure, safe to retry after backoff
    Retryable,

    /// Failure that will not be fixed by retrying
    Permanent,
}

/// Main error type for pulse-core operations
#[derive(Error, Debug)]
pub enum PulseError {
    /// External call exceeded its deadline
    #[error("Dependency '{dependency}' timed out after {elapsed_ms}ms")]
    Timeout { dependency: String, elapsed_ms: u64 },

    /// Rate-limit admission rejected the call (no blocking wait)
    #[error("Rate limited on '{dependency}', retry after {retry_after_ms}ms")]
    RateLimited {
        dependency: String,
        retry_after_ms: u64,
    },

    /// Circuit breaker is open for this dependency
    #[error("Circuit open for '{dependency}', recovery in {retry_in_ms}ms")]
    CircuitOpen {
        dependency: String,
        retry_in_ms: u64,
    },

    /// Transient dependency failure (connection error, 5xx, ...)
    #[error("Transient failure from '{dependency}': {detail}")]
    Transient { dependency: String, detail: String },

    /// Invalid input supplied to a worker or component
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Authorization failure from a dependency
    #[error("Authorization failed for '{dependency}': {detail}")]
    Unauthorized { dependency: String, detail: String },

    /// Dependency returned a response the caller could not parse
    #[error("Malformed response from '{dependency}': {detail}")]
    MalformedResponse { dependency: String, detail: String },

    /// Version-checked memory upsert lost to a concurrent writer
    #[error("Stale write for '{scope}/{key}': expected version {expected}, found {found}")]
    StaleWrite {
        scope: String,
        key: String,
        expected: u64,
        found: u64,
    },

    /// Both retrieval sources failed; the caller decides how to proceed
    #[error("All retrieval sources unavailable: {0}")]
    RetrievalUnavailable(String),

    /// Run lookup failed
    #[error("Run not found: {0}")]
    RunNotFound(String),

    /// Attempted a backward or otherwise illegal run status transition
    #[error("Invalid run transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// No worker registered for the requested capability
    #[error("No worker registered for capability '{0}'")]
    NoWorker(String),

    /// Run was cancelled while in flight
    #[error("Run cancelled: {0}")]
    Cancelled(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias for pulse-core operations
pub type Result<T> = std::result::Result<T, PulseError>;

impl PulseError {
    /// Stable machine-readable reason code for terminal failure reporting
    pub fn reason_code(&self) -> &'static str {
        match self {
            PulseError::Timeout { .. } => "timeout",
            PulseError::RateLimited { .. } => "rate_limited",
            PulseError::CircuitOpen { .. } => "circuit_open",
            PulseError::Transient { .. } => "transient_dependency",
            PulseError::InvalidInput(_) => "invalid_input",
            PulseError::Unauthorized { .. } => "unauthorized",
            PulseError::MalformedResponse { .. } => "malformed_response",
            PulseError::StaleWrite { .. } => "stale_write",
            PulseError::RetrievalUnavailable(_) => "retrieval_unavailable",
            PulseError::RunNotFound(_) => "run_not_found",
            PulseError::InvalidTransition { .. } => "invalid_transition",
            PulseError::NoWorker(_) => "no_worker",
            PulseError::Cancelled(_) => "cancelled",
            PulseError::Config(_) => "config",
            PulseError::Serialization(_) => "serialization",
            PulseError::Io(_) => "io",
            PulseError::Other(_) => "other",
        }
    }

    /// Classify for the supervisor's retry policy
    ///
    /// Admission-control rejections (`CircuitOpen`, `RateLimited`) count as
    /// retryable after backoff. `StaleWrite` is retryable because callers
    /// re-read and re-apply. Cancellation is terminal.
    pub fn class(&self) -> ErrorClass {
        match self {
            PulseError::Timeout { .. }
            | PulseError::RateLimited { .. }
            | PulseError::CircuitOpen { .. }
            | PulseError::Transient { .. }
            | PulseError::StaleWrite { .. }
            | PulseError::RetrievalUnavailable(_) => ErrorClass::Retryable,
            _ => ErrorClass::Permanent,
        }
    }

    /// Convenience check used by retry loops
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Retryable
    }
}

/// Convert anyhow::Error to PulseError
impl From<anyhow::Error> for PulseError {
    fn from(err: anyhow::Error) -> Self {
        PulseError::Other(err.to_string())
    }
}

//! Core data types for the pulse orchestration runtime
//!
//! This module defines the fundamental data structures used throughout the
//! core: tasks, runs and their state machine, memory records and tiers, and
//! the completion events published to delivery collaborators.

use crate::error::{PulseError, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for runs
///
/// Wraps a UUID to provide type safety and prevent mixing run IDs with
/// other UUID-based identifiers in the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Create a new random run ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Correlation identifier grouping tasks that belong to one logical
/// conversation or pipeline
///
/// Chained runs share a correlation ID; it also serves as the owning scope
/// for episodic memory written during the chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    /// Create a new random correlation ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Worker capability variants
///
/// The supervisor routes tasks by declared capability only; it never
/// branches on a concrete worker type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Gathers raw content from external data sources
    Collector,

    /// Analyzes collected content with retrieval-augmented LLM calls
    Analyst,

    /// Composes reports from prior analysis
    Reporter,

    /// Delivers results to an outbound channel
    Communicator,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Collector => write!(f, "collector"),
            Capability::Analyst => write!(f, "analyst"),
            Capability::Reporter => write!(f, "reporter"),
            Capability::Communicator => write!(f, "communicator"),
        }
    }
}

/// Unit of work submitted to the supervisor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Goal description (human-readable)
    pub goal: String,

    /// Required capability; routing is a typed lookup, never inferred
    pub capability: Capability,

    /// Input payload
    pub payload: serde_json::Value,

    /// Groups tasks belonging to one logical conversation or pipeline
    pub correlation_id: CorrelationId,

    /// Priority (0-10, higher = more urgent)
    pub priority: u8,
}

impl Task {
    /// Create a new task with a fresh correlation ID
    pub fn new(goal: impl Into<String>, capability: Capability, payload: serde_json::Value) -> Self {
        Self {
            goal: goal.into(),
            capability,
            payload,
            correlation_id: CorrelationId::new(),
            priority: 5,
        }
    }

    /// Attach an existing correlation ID (for chained pipelines)
    pub fn with_correlation(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    /// Set the priority, clamped to 0..=10
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(10);
        self
    }
}

/// Run lifecycle status
///
/// Transitions are monotonic along `pending -> running -> terminal`;
/// there is no backward transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Check whether a transition to `next` is legal
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::Pending, RunStatus::Running)
                | (RunStatus::Pending, RunStatus::Failed)
                | (RunStatus::Pending, RunStatus::Cancelled)
                | (RunStatus::Running, RunStatus::Completed)
                | (RunStatus::Running, RunStatus::Failed)
                | (RunStatus::Running, RunStatus::Cancelled)
        )
    }

    /// Check whether this status is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Pending => write!(f, "pending"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Outcome of one step attempt recorded in run history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum StepOutcome {
    /// Step finished; `degraded` marks partial-context results so downstream
    /// consumers can distinguish them from full-context results
    Completed { degraded: bool },

    /// Step failed with a stable reason code
    Failed { reason_code: String, detail: String },

    /// Step was cancelled mid-flight
    Cancelled,
}

/// One entry in a run's ordered step history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    /// Step name (capability that executed it)
    pub step: String,

    /// When the outcome was recorded
    pub at: DateTime<Utc>,

    /// What happened
    pub outcome: StepOutcome,

    /// How many dispatch attempts the step consumed
    pub attempts: u32,
}

/// Terminal failure detail surfaced on failed runs and completion events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalError {
    /// Stable machine-readable reason code
    pub reason_code: String,

    /// Human-readable detail
    pub detail: String,
}

impl TerminalError {
    pub fn from_error(err: &PulseError) -> Self {
        Self {
            reason_code: err.reason_code().to_string(),
            detail: err.to_string(),
        }
    }
}

/// One tracked execution of a task through the supervisor's state machine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Unique identifier
    pub id: RunId,

    /// Correlation ID shared with sibling runs in a chain
    pub correlation_id: CorrelationId,

    /// Capability the run dispatches to
    pub capability: Capability,

    /// Current status
    pub status: RunStatus,

    /// Current step index within the owning chain (0 for standalone runs)
    pub step: usize,

    /// Ordered history of step transitions
    pub history: Vec<StepRecord>,

    /// When the run entered `running`
    pub started_at: Option<DateTime<Utc>>,

    /// When the run reached a terminal status
    pub completed_at: Option<DateTime<Utc>>,

    /// Terminal error, present iff status is `failed`
    pub last_error: Option<TerminalError>,

    /// Final worker result payload, present iff status is `completed`
    pub result: Option<serde_json::Value>,
}

impl Run {
    /// Create a new run in `pending` for a task
    pub fn new(task: &Task, step: usize) -> Self {
        Self {
            id: RunId::new(),
            correlation_id: task.correlation_id.clone(),
            capability: task.capability,
            status: RunStatus::Pending,
            step,
            history: Vec::new(),
            started_at: None,
            completed_at: None,
            last_error: None,
            result: None,
        }
    }

    /// Transition to a new status, enforcing monotonic lifecycle order
    pub fn transition(&mut self, next: RunStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(PulseError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }

        self.status = next;
        match next {
            RunStatus::Running => {
                if self.started_at.is_none() {
                    self.started_at = Some(Utc::now());
                }
            }
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled => {
                if self.completed_at.is_none() {
                    self.completed_at = Some(Utc::now());
                }
            }
            RunStatus::Pending => {}
        }
        Ok(())
    }

    /// Append a step-history entry
    pub fn record_step(&mut self, outcome: StepOutcome, attempts: u32) {
        self.history.push(StepRecord {
            step: self.capability.to_string(),
            at: Utc::now(),
            outcome,
            attempts,
        });
    }
}

/// Memory tier, distinguished by retention policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Short TTL tied to session lifetime (order of an hour)
    Working,

    /// Fixed TTL on the order of weeks
    Episodic,

    /// No TTL; only superseded by higher-version writes
    Semantic,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Working => write!(f, "working"),
            Tier::Episodic => write!(f, "episodic"),
            Tier::Semantic => write!(f, "semantic"),
        }
    }
}

/// Keyed record owned by the memory manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Retention tier
    pub tier: Tier,

    /// Owning scope: session ID for working, entity/thread ID otherwise
    pub scope: String,

    /// Key, unique within (tier, scope)
    pub key: String,

    /// Value payload
    pub value: serde_json::Value,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Expiry; None for semantic records
    pub expires_at: Option<DateTime<Utc>>,

    /// Monotonically increasing per key; resolves concurrent writers by
    /// version, not wall-clock
    pub version: u64,
}

impl MemoryRecord {
    /// Check whether this record has expired at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expiry) if now > expiry)
    }

    /// Compute the expiry timestamp for a tier given its TTL in seconds
    pub fn expiry_for(tier: Tier, now: DateTime<Utc>, ttl_secs: u64) -> Option<DateTime<Utc>> {
        match tier {
            Tier::Semantic => None,
            Tier::Working | Tier::Episodic => Some(now + ChronoDuration::seconds(ttl_secs as i64)),
        }
    }
}

/// Durable fact a worker asks the memory manager to persist on success
///
/// Facts are keyed by (scope, key) with version-based upsert, which keeps
/// at-least-once redispatch idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DurableFact {
    /// Target tier
    pub tier: Tier,

    /// Key within the task's correlation scope
    pub key: String,

    /// Value payload
    pub value: serde_json::Value,
}

/// Typed result returned by a worker agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerOutput {
    /// Short human-readable summary
    pub summary: String,

    /// Structured result payload
    pub payload: serde_json::Value,

    /// Facts to persist through the memory manager on run success
    pub durable_facts: Vec<DurableFact>,

    /// True when the worker proceeded with partial context
    pub degraded: bool,
}

impl WorkerOutput {
    pub fn new(summary: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            summary: summary.into(),
            payload,
            durable_facts: Vec::new(),
            degraded: false,
        }
    }

    pub fn with_fact(mut self, tier: Tier, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.durable_facts.push(DurableFact {
            tier,
            key: key.into(),
            value,
        });
        self
    }

    pub fn degraded(mut self, degraded: bool) -> Self {
        self.degraded = degraded;
        self
    }
}

/// Run-completion event published to delivery collaborators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    pub run_id: RunId,
    pub correlation_id: CorrelationId,
    pub capability: Capability,
    pub status: RunStatus,

    /// Final result payload on success
    pub result: Option<serde_json::Value>,

    /// Terminal error on failure
    pub error: Option<TerminalError>,
}

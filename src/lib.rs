//! Pulse core: agent orchestration with hybrid retrieval and tiered memory
//!
//! The crate is organized around a supervisor that routes typed tasks to
//! capability-declared worker agents, a three-tier memory manager over a
//! pluggable record store, a hybrid retrieval engine fusing vector and graph
//! search, and an execution runtime that wraps every external dependency
//! call in rate-limit admission, circuit breaking, and a deadline.
//!
//! # Example
//!
//! ```no_run
//! use pulse_core::{Capability, PulseConfig, Supervisor, Task, WorkerRegistry};
//! use pulse_core::memory::MemoryManager;
//! use pulse_core::retrieval::RetrievalEngine;
//! use pulse_core::runtime::ExecutionRuntime;
//! use pulse_core::storage::InMemoryStore;
//! use std::sync::Arc;
//!
//! # async fn demo(
//! #     registry: WorkerRegistry,
//! #     retrieval: Arc<RetrievalEngine>,
//! # ) -> pulse_core::Result<()> {
//! let config = PulseConfig::load(None)?;
//! let runtime = Arc::new(ExecutionRuntime::new(config.runtime.clone(), None));
//! let memory = Arc::new(MemoryManager::new(
//!     Arc::new(InMemoryStore::new()),
//!     config.memory.clone(),
//! ));
//!
//! let supervisor = Supervisor::new(config, registry, memory, retrieval, runtime);
//! let run_id = supervisor
//!     .submit(Task::new(
//!         "collect this week's reviews",
//!         Capability::Collector,
//!         serde_json::json!({"source": "reviews"}),
//!     ))
//!     .await?;
//! let run = supervisor.status(run_id).await?;
//! println!("{}: {}", run.id, run.status);
//! # Ok(())
//! # }
//! ```

pub mod agents;
pub mod config;
pub mod error;
pub mod memory;
pub mod retrieval;
pub mod runtime;
pub mod services;
pub mod storage;
pub mod supervisor;
pub mod types;

pub use agents::{
    AgentContext, AnalystAgent, CollectorAgent, CommunicatorAgent, ReporterAgent, WorkerAgent,
    WorkerRegistry,
};
pub use config::PulseConfig;
pub use error::{ErrorClass, PulseError, Result};
pub use memory::MemoryManager;
pub use retrieval::{RetrievalEngine, RetrievalOutput, RetrievalQuery};
pub use runtime::ExecutionRuntime;
pub use supervisor::Supervisor;
pub use types::{
    Capability, CorrelationId, DurableFact, Run, RunEvent, RunId, RunStatus, StepOutcome, Task,
    Tier, WorkerOutput,
};

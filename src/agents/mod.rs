//! Worker agents
//!
//! Every worker implements the same narrow contract: declare a capability,
//! execute a task against the shared context, return a typed output. Workers
//! never talk to external dependencies directly; every outbound call goes
//! through the execution runtime via the context, and every durable write
//! goes through the memory manager.

pub mod analyst;
pub mod collector;
pub mod communicator;
pub mod registry;
pub mod reporter;

pub use analyst::AnalystAgent;
pub use collector::CollectorAgent;
pub use communicator::CommunicatorAgent;
pub use registry::WorkerRegistry;
pub use reporter::ReporterAgent;

use crate::error::Result;
use crate::memory::MemoryManager;
use crate::retrieval::{RetrievalEngine, RetrievalOutput, RetrievalQuery};
use crate::runtime::ExecutionRuntime;
use crate::types::{Capability, CorrelationId, MemoryRecord, Task, Tier, WorkerOutput};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Shared handles a worker executes against
///
/// One context is built per dispatch attempt. The cancellation token is the
/// run's token; a worker that awaits through `call` observes cancellation
/// without polling for it.
#[derive(Clone)]
pub struct AgentContext {
    pub memory: Arc<MemoryManager>,
    pub retrieval: Arc<RetrievalEngine>,
    pub runtime: Arc<ExecutionRuntime>,

    /// Correlation ID of the owning run; doubles as the memory scope for
    /// everything the worker reads and writes
    pub correlation_id: CorrelationId,

    /// Cancellation token for the owning run
    pub cancel: CancellationToken,

    /// Deadline applied to each outbound dependency call
    pub call_deadline: Duration,

    /// Candidate count requested from retrieval
    pub retrieval_top_k: usize,
}

impl AgentContext {
    /// Invoke an external dependency under admission control and a deadline
    pub async fn call<T, F>(&self, dependency: &str, fut: F) -> Result<T>
    where
        T: Send,
        F: Future<Output = Result<T>> + Send,
    {
        self.runtime
            .run(dependency, self.call_deadline, &self.cancel, fut)
            .await
    }

    /// Read a record from the run's correlation scope
    pub async fn recall(&self, tier: Tier, key: &str) -> Result<Option<MemoryRecord>> {
        self.memory
            .get(tier, self.correlation_id.as_str(), key)
            .await
    }

    /// Run a hybrid retrieval for this worker's query
    pub async fn retrieve(&self, query: &RetrievalQuery) -> Result<RetrievalOutput> {
        self.retrieval
            .retrieve(query, self.retrieval_top_k, &self.cancel)
            .await
    }
}


/// Contract every worker agent implements
///
/// The supervisor routes on `capability` alone and treats the worker as a
/// black box behind `execute`.
#[async_trait]
pub trait WorkerAgent: Send + Sync {
    /// Capability this worker advertises
    fn capability(&self) -> Capability;

    /// Execute one task attempt
    ///
    /// Must be safe to re-invoke: dispatch is at-least-once and the durable
    /// facts a worker returns are persisted with version-keyed upserts, so a
    /// redispatched attempt converges on the same state.
    async fn execute(&self, task: &Task, ctx: &AgentContext) -> Result<WorkerOutput>;
}

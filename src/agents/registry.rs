//! Capability-keyed worker registry

use crate::agents::WorkerAgent;
use crate::error::{PulseError, Result};
use crate::types::Capability;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Registry mapping capabilities to worker agents
///
/// Routing is a typed lookup. A task whose capability has no registered
/// worker fails with `NoWorker` before any run is started; capability is
/// never inferred from payload contents.
#[derive(Default)]
pub struct WorkerRegistry {
    workers: HashMap<Capability, Arc<dyn WorkerAgent>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker under its declared capability
    ///
    /// Re-registering a capability replaces the previous worker.
    pub fn register(&mut self, worker: Arc<dyn WorkerAgent>) {
        let capability = worker.capability();
        info!(%capability, "worker registered");
        self.workers.insert(capability, worker);
    }

    /// Resolve the worker for a capability
    pub fn resolve(&self, capability: Capability) -> Result<Arc<dyn WorkerAgent>> {
        self.workers
            .get(&capability)
            .cloned()
            .ok_or_else(|| PulseError::NoWorker(capability.to_string()))
    }

    /// Capabilities currently registered
    pub fn capabilities(&self) -> Vec<Capability> {
        self.workers.keys().copied().collect()
    }
}

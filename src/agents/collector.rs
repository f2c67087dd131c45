//! Collector worker: pulls raw content from an external data source

use crate::agents::{AgentContext, WorkerAgent};
use crate::error::Result;
use crate::services::SourceAdapter;
use crate::types::{Capability, Task, Tier, WorkerOutput};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

/// Episodic key under which collected content is stored
pub const COLLECTED_KEY: &str = "collected";

/// Worker that fetches raw content through a source adapter
pub struct CollectorAgent {
    source: Arc<dyn SourceAdapter>,
}

impl CollectorAgent {
    pub fn new(source: Arc<dyn SourceAdapter>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl WorkerAgent for CollectorAgent {
    fn capability(&self) -> Capability {
        Capability::Collector
    }

    async fn execute(&self, task: &Task, ctx: &AgentContext) -> Result<WorkerOutput> {
        let request = task.payload.clone();
        let collected = ctx.call("source", self.source.fetch(&request)).await?;

        let count = collected.as_array().map(|a| a.len()).unwrap_or(1);
        debug!(correlation_id = %ctx.correlation_id, count, "content collected");

        let payload = json!({
            "collected": collected,
            "count": count,
        });

        Ok(
            WorkerOutput::new(format!("collected {count} item(s)"), payload.clone())
                .with_fact(Tier::Episodic, COLLECTED_KEY, payload),
        )
    }
}

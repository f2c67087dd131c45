//! Reporter worker: composes a report from prior analysis

use crate::agents::analyst::ANALYSIS_KEY;
use crate::agents::{AgentContext, WorkerAgent};
use crate::error::{PulseError, Result};
use crate::services::LlmProvider;
use crate::types::{Capability, Task, Tier, WorkerOutput};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

/// Episodic key under which the composed report is stored
pub const REPORT_KEY: &str = "report";

/// Worker that turns an upstream analysis into a deliverable report
///
/// The reporter requires analysis from an earlier step in the same chain;
/// dispatching it without one is a caller error, not a transient condition,
/// so it fails permanent rather than inviting a retry.
pub struct ReporterAgent {
    llm: Arc<dyn LlmProvider>,
}

impl ReporterAgent {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl WorkerAgent for ReporterAgent {
    fn capability(&self) -> Capability {
        Capability::Reporter
    }

    async fn execute(&self, task: &Task, ctx: &AgentContext) -> Result<WorkerOutput> {
        let analysis = ctx
            .recall(Tier::Episodic, ANALYSIS_KEY)
            .await?
            .ok_or_else(|| {
                PulseError::InvalidInput(format!(
                    "no analysis available in scope {}",
                    ctx.correlation_id
                ))
            })?;

        let analysis_text = analysis.value["analysis"].as_str().unwrap_or_default();
        let prompt = format!(
            "Compose a concise report for: {}\n\nAnalysis:\n{}",
            task.goal, analysis_text,
        );
        let report = ctx.call("llm", self.llm.complete(&prompt, "")).await?;

        let payload = json!({
            "report": report,
            "based_on": {
                "key": ANALYSIS_KEY,
                "version": analysis.version,
            },
        });

        Ok(WorkerOutput::new("report composed", payload.clone())
            .with_fact(Tier::Episodic, REPORT_KEY, payload))
    }
}

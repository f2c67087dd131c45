//! Analyst worker: retrieval-augmented analysis of collected content

use crate::agents::collector::COLLECTED_KEY;
use crate::agents::{AgentContext, WorkerAgent};
use crate::error::{PulseError, Result};
use crate::retrieval::RetrievalQuery;
use crate::services::LlmProvider;
use crate::types::{Capability, Task, Tier, WorkerOutput};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

/// Episodic key under which the analysis is stored
pub const ANALYSIS_KEY: &str = "analysis";

/// Semantic key under which distilled insights accumulate
pub const INSIGHT_KEY: &str = "insight";

/// Worker that analyzes collected content with a retrieval-augmented
/// language-model call
///
/// Retrieval failure is not fatal here: when both search paths are down the
/// analyst proceeds on the collected content alone and marks the output
/// degraded, so a store outage slows the pipeline down instead of stopping
/// it.
pub struct AnalystAgent {
    llm: Arc<dyn LlmProvider>,
}

impl AnalystAgent {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    fn seed_entities(payload: &Value) -> Vec<String> {
        payload
            .get("entities")
            .and_then(Value::as_array)
            .map(|entities| {
                entities
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl WorkerAgent for AnalystAgent {
    fn capability(&self) -> Capability {
        Capability::Analyst
    }

    async fn execute(&self, task: &Task, ctx: &AgentContext) -> Result<WorkerOutput> {
        let collected = ctx
            .recall(Tier::Episodic, COLLECTED_KEY)
            .await?
            .map(|r| r.value)
            .unwrap_or_else(|| task.payload.clone());

        let query =
            RetrievalQuery::new(&task.goal).with_seeds(Self::seed_entities(&task.payload));
        let (context, degraded) = match ctx.retrieve(&query).await {
            Ok(out) => (out.context, out.degraded),
            Err(PulseError::RetrievalUnavailable(detail)) => {
                warn!(correlation_id = %ctx.correlation_id, detail, "analyzing without retrieval context");
                (String::new(), true)
            }
            Err(err) => return Err(err),
        };

        let prompt = format!(
            "Analyze the following content for: {}\n\nContent:\n{}",
            task.goal,
            serde_json::to_string_pretty(&collected)?,
        );
        let analysis = ctx.call("llm", self.llm.complete(&prompt, &context)).await?;

        let payload = json!({
            "analysis": analysis,
            "goal": task.goal,
            "context_degraded": degraded,
        });

        Ok(WorkerOutput::new("analysis complete", payload.clone())
            .with_fact(Tier::Episodic, ANALYSIS_KEY, payload)
            .with_fact(
                Tier::Semantic,
                INSIGHT_KEY,
                json!({"goal": task.goal, "insight": analysis}),
            )
            .degraded(degraded))
    }
}

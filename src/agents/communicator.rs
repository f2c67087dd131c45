//! Communicator worker: delivers a composed report over an outbound channel

use crate::agents::reporter::REPORT_KEY;
use crate::agents::{AgentContext, WorkerAgent};
use crate::error::{PulseError, Result};
use crate::services::DeliveryChannel;
use crate::types::{Capability, Task, Tier, WorkerOutput};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

/// Episodic key recording a completed delivery
pub const DELIVERED_KEY: &str = "delivered";

/// Worker that sends the chain's report to a recipient
pub struct CommunicatorAgent {
    channel: Arc<dyn DeliveryChannel>,
}

impl CommunicatorAgent {
    pub fn new(channel: Arc<dyn DeliveryChannel>) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl WorkerAgent for CommunicatorAgent {
    fn capability(&self) -> Capability {
        Capability::Communicator
    }

    async fn execute(&self, task: &Task, ctx: &AgentContext) -> Result<WorkerOutput> {
        let recipient = task.payload["recipient"].as_str().ok_or_else(|| {
            PulseError::InvalidInput("delivery task requires a recipient".to_string())
        })?;
        let subject = task.payload["subject"].as_str().unwrap_or(&task.goal);

        let report = ctx
            .recall(Tier::Episodic, REPORT_KEY)
            .await?
            .ok_or_else(|| {
                PulseError::InvalidInput(format!(
                    "no report available in scope {}",
                    ctx.correlation_id
                ))
            })?;
        let body = report.value["report"].as_str().unwrap_or_default().to_string();

        ctx.call("delivery", self.channel.send(recipient, subject, &body))
            .await?;
        info!(correlation_id = %ctx.correlation_id, recipient, "report delivered");

        let payload = json!({
            "recipient": recipient,
            "subject": subject,
            "report_version": report.version,
        });

        Ok(WorkerOutput::new(format!("delivered to {recipient}"), payload.clone())
            .with_fact(Tier::Episodic, DELIVERED_KEY, payload))
    }
}

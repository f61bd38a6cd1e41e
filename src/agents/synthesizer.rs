use crate::agents::registry::AgentRegistry;
use crate::llm::{AgentPrompts, AgentsBackend};
use crate::types::*;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

pub const REPORT_FAILURE: &str = "❌ Failed to generate comprehensive report";

/// Folds the four metric analyses into one narrative via the coordinator
pub struct ReportSynthesizer {
    backend: Arc<dyn AgentsBackend>,
    timeout: Duration,
}

impl ReportSynthesizer {
    pub fn new(backend: Arc<dyn AgentsBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    /// Single attempt with a long bound; returns the coordinator's reply or a failure string
    #[instrument(skip(self, registry, results))]
    pub async fn create_final_report(
        &self,
        registry: &AgentRegistry,
        request_id: &str,
        results: &MetricResults,
    ) -> String {
        info!("Creating comprehensive final report");

        match self.synthesize(registry, request_id, results).await {
            Ok(Some(report)) => {
                info!("Comprehensive report completed");
                report
            }
            Ok(None) => {
                warn!("Coordinator returned no report for APR {}", request_id);
                REPORT_FAILURE.to_string()
            }
            Err(e) => {
                error!("Coordinator failed for APR {}: {:#}", request_id, e);
                format!("{}: {:#}", REPORT_FAILURE, e)
            }
        }
    }

    async fn synthesize(
        &self,
        registry: &AgentRegistry,
        request_id: &str,
        results: &MetricResults,
    ) -> Result<Option<String>> {
        let binding = registry.binding(AgentKind::Coordinator)?;
        let prompt = AgentPrompts::synthesis(request_id, results);

        self.backend
            .create_message(binding.thread, MessageRole::User, &prompt)
            .await?;

        info!("Coordinator analyzing patterns and linking JIRA tickets");
        let run = self
            .backend
            .create_and_process_run(binding.thread, binding.agent, Some(self.timeout))
            .await?;

        if run.status != RunStatus::Completed {
            warn!("Coordinator run {} ended as {:?}", run.id, run.status);
        }

        let messages = self.backend.list_messages(binding.thread).await?;
        Ok(latest_agent_reply(&messages))
    }
}

use crate::agents::registry::{AgentRegistry, CleanupSummary};
use crate::agents::runner::{AnalysisRunner, RetryPolicy};
use crate::agents::session::ReviewService;
use crate::agents::synthesizer::ReportSynthesizer;
use crate::config::OrchestrationSettings;
use crate::llm::AgentsBackend;
use crate::types::*;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Main orchestrator for the APR review agent system
pub struct AprOrchestrator {
    backend: Arc<dyn AgentsBackend>,
    registry: AgentRegistry,
    runner: AnalysisRunner,
    synthesizer: ReportSynthesizer,
    settings: OrchestrationSettings,
}

impl AprOrchestrator {
    /// Create an orchestrator over an explicitly constructed backend
    pub fn new(backend: Arc<dyn AgentsBackend>, settings: OrchestrationSettings) -> Self {
        let runner = AnalysisRunner::new(backend.clone(), settings.retry_policy());
        let synthesizer = ReportSynthesizer::new(backend.clone(), settings.coordinator_timeout());

        Self {
            backend,
            registry: AgentRegistry::new(),
            runner,
            synthesizer,
            settings,
        }
    }

    /// Replace the retry policy derived from settings
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.runner = AnalysisRunner::new(self.backend.clone(), policy);
        self
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// Must be called once before any analysis
    pub async fn create_agents(&mut self, model: &str) -> Result<()> {
        self.registry
            .create_agents(self.backend.as_ref(), model, &self.settings)
            .await
    }

    pub async fn run_metric_analysis(&self, request_id: &str, kind: MetricKind) -> String {
        self.runner
            .run_metric_analysis(&self.registry, request_id, kind)
            .await
    }

    pub async fn create_final_report(&self, request_id: &str, results: &MetricResults) -> String {
        self.synthesizer
            .create_final_report(&self.registry, request_id, results)
            .await
    }

    /// Full analysis: the four metric agents, then the coordinator's synthesis
    #[instrument(skip(self))]
    pub async fn analyze_request(&self, request_id: &str) -> FinalReport {
        let started = std::time::Instant::now();

        // TODO: run the four metric agents concurrently; each already owns its thread
        let metric_results = MetricResults {
            pav: self.run_metric_analysis(request_id, MetricKind::Pav).await,
            ppa: self.run_metric_analysis(request_id, MetricKind::Ppa).await,
            sup: self.run_metric_analysis(request_id, MetricKind::Sup).await,
            dup: self.run_metric_analysis(request_id, MetricKind::Dup).await,
        };

        let narrative = self.create_final_report(request_id, &metric_results).await;

        info!(
            "APR {} analysis complete in {:.2}s",
            request_id,
            started.elapsed().as_secs_f64()
        );

        FinalReport {
            id: Uuid::new_v4(),
            request_id: request_id.to_string(),
            generated_at: Utc::now(),
            metric_results,
            narrative,
        }
    }

    /// Forward free-form text to the coordinator's thread
    #[instrument(skip(self, question))]
    pub async fn general_query(&self, question: &str) -> Result<Option<String>> {
        let binding = self.registry.binding(AgentKind::Coordinator)?;

        self.backend
            .create_message(binding.thread, MessageRole::User, question)
            .await?;

        let run = self
            .backend
            .create_and_process_run(binding.thread, binding.agent, self.settings.chat_timeout())
            .await?;

        if run.status != RunStatus::Completed {
            warn!("Coordinator chat run {} ended as {:?}", run.id, run.status);
        }

        let messages = self.backend.list_messages(binding.thread).await?;
        Ok(latest_agent_reply(&messages))
    }

    /// Delete every created agent
    pub async fn cleanup(&mut self) -> CleanupSummary {
        self.registry.cleanup(self.backend.as_ref()).await
    }
}

/// How a top-level run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnd {
    Finished,
    Interrupted,
}

/// Drive `work` unless `shutdown` resolves first. Either way the caller gets
/// control back and can clean up the agents created so far.
pub async fn run_until_shutdown<F, S>(work: F, shutdown: S) -> Result<RunEnd>
where
    F: Future<Output = Result<()>>,
    S: Future,
{
    tokio::select! {
        result = work => result.map(|()| RunEnd::Finished),
        _ = shutdown => {
            warn!("Interrupted, shutting down");
            Ok(RunEnd::Interrupted)
        }
    }
}

#[async_trait]
impl ReviewService for AprOrchestrator {
    async fn analyze(&self, request_id: &str) -> FinalReport {
        self.analyze_request(request_id).await
    }

    async fn ask(&self, question: &str) -> Result<Option<String>> {
        self.general_query(question).await
    }
}

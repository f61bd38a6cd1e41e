use crate::agents::registry::AgentRegistry;
use crate::llm::{AgentPrompts, AgentsBackend, BackendError};
use crate::types::*;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};

pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(300);

/// How often and how patiently a metric agent is retried
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            delay: Duration::from_secs(5),
            backoff_multiplier: 1.0,
        }
    }
}

impl RetryPolicy {
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    pub fn total_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Pause before retry number `retry` (1-based), never longer than `MAX_RETRY_DELAY`
    pub fn delay_before_retry(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.backoff_multiplier.max(1.0).powi(exponent);

        Duration::try_from_secs_f64(self.delay.as_secs_f64() * factor)
            .unwrap_or(MAX_RETRY_DELAY)
            .min(MAX_RETRY_DELAY)
    }
}

/// Why one attempt produced no analysis. Kept apart for logging; callers only see text.
enum AttemptFailure {
    NoReply,
    Error(anyhow::Error),
}

impl From<anyhow::Error> for AttemptFailure {
    fn from(error: anyhow::Error) -> Self {
        AttemptFailure::Error(error)
    }
}

impl From<BackendError> for AttemptFailure {
    fn from(error: BackendError) -> Self {
        AttemptFailure::Error(error.into())
    }
}

/// Runs one metric agent against a change request, retrying per policy
pub struct AnalysisRunner {
    backend: Arc<dyn AgentsBackend>,
    policy: RetryPolicy,
}

impl AnalysisRunner {
    pub fn new(backend: Arc<dyn AgentsBackend>, policy: RetryPolicy) -> Self {
        Self { backend, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Always returns text: the agent's analysis, or a failure description once
    /// every attempt is spent.
    #[instrument(skip(self, registry), fields(agent = kind.as_str()))]
    pub async fn run_metric_analysis(
        &self,
        registry: &AgentRegistry,
        request_id: &str,
        kind: MetricKind,
    ) -> String {
        let attempts = self.policy.total_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            if attempt > 1 {
                info!("Retry {}: Running {} analysis for APR {}", attempt - 1, kind, request_id);
            } else {
                info!("Running {} analysis for APR {}", kind, request_id);
            }

            metrics::increment_counter!("apr_agent_attempts_total", "agent" => kind.as_str());
            let started = Instant::now();
            let outcome = self.attempt(registry, request_id, kind).await;
            metrics::histogram!(
                "apr_agent_run_seconds",
                started.elapsed().as_secs_f64(),
                "agent" => kind.as_str()
            );

            let failure = match outcome {
                Ok(analysis) => {
                    info!("{} analysis completed", kind);
                    return analysis;
                }
                Err(failure) => failure,
            };

            metrics::increment_counter!("apr_agent_failures_total", "agent" => kind.as_str());

            if attempt >= attempts {
                let message = match failure {
                    AttemptFailure::NoReply => format!(
                        "❌ {} agent failed to provide analysis after {} attempts",
                        kind, attempts
                    ),
                    AttemptFailure::Error(e) => format!(
                        "❌ {} agent execution failed after {} attempts: {:#}",
                        kind, attempts, e
                    ),
                };
                error!("{}", message);
                return message;
            }

            match failure {
                AttemptFailure::NoReply => warn!("No response from {} agent, retrying...", kind),
                AttemptFailure::Error(e) => warn!("{} agent error: {:#}, retrying...", kind, e),
            }

            tokio::time::sleep(self.policy.delay_before_retry(attempt)).await;
        }
    }

    async fn attempt(
        &self,
        registry: &AgentRegistry,
        request_id: &str,
        kind: MetricKind,
    ) -> Result<String, AttemptFailure> {
        let binding = registry.binding(AgentKind::Metric(kind))?;
        let task = AgentPrompts::metric_task(kind, request_id);

        self.backend
            .create_message(binding.thread, MessageRole::User, &task)
            .await?;

        let run = self
            .backend
            .create_and_process_run(binding.thread, binding.agent, binding.definition.timeout)
            .await?;

        if run.status != RunStatus::Completed {
            warn!(
                "{} run {} ended as {:?}: {}",
                kind,
                run.id,
                run.status,
                run.last_error.as_deref().unwrap_or("no error reported")
            );
        }

        let messages = self.backend.list_messages(binding.thread).await?;
        latest_agent_reply(&messages).ok_or(AttemptFailure::NoReply)
    }
}

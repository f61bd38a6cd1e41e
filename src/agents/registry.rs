use crate::config::OrchestrationSettings;
use crate::llm::{AgentPrompts, AgentsBackend};
use crate::tools::catalog::{coordinator_tools, metric_agent_tools};
use crate::types::*;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use tracing::{info, instrument, warn};

/// An agent created on the service, together with the definition it was created from
#[derive(Debug, Clone)]
pub struct RegisteredAgent {
    pub definition: AgentDefinition,
    pub handle: AgentHandle,
}

/// Everything needed to talk to one agent
#[derive(Debug, Clone, Copy)]
pub struct AgentBinding<'a> {
    pub definition: &'a AgentDefinition,
    pub agent: &'a AgentHandle,
    pub thread: &'a ThreadHandle,
}

/// Outcome of tearing the agents down
#[derive(Debug, Clone, Default)]
pub struct CleanupSummary {
    pub deleted: Vec<AgentKind>,
    pub failed: Vec<(AgentKind, String)>,
}

impl CleanupSummary {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Holds the four metric agents and the coordinator, each bound to its own thread
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: BTreeMap<AgentKind, RegisteredAgent>,
    threads: BTreeMap<AgentKind, ThreadHandle>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Definitions for all five agents, in creation order
    pub fn definitions(model: &str, settings: &OrchestrationSettings) -> Vec<(AgentKind, AgentDefinition)> {
        let mut definitions: Vec<(AgentKind, AgentDefinition)> = MetricKind::ALL
            .into_iter()
            .map(|kind| {
                (
                    AgentKind::Metric(kind),
                    AgentDefinition {
                        name: kind.agent_name().to_string(),
                        instructions: AgentPrompts::metric_analyst(kind).system_prompt,
                        model: model.to_string(),
                        tools: metric_agent_tools(kind),
                        timeout: Some(settings.metric_timeout()),
                    },
                )
            })
            .collect();

        definitions.push((
            AgentKind::Coordinator,
            AgentDefinition {
                name: "APR_Coordinator".to_string(),
                instructions: AgentPrompts::coordinator().system_prompt,
                model: model.to_string(),
                tools: coordinator_tools(),
                timeout: None,
            },
        ));

        definitions
    }

    /// Create all agents, then one thread per agent.
    ///
    /// Remote failures are not retried. Agents created before a failure stay
    /// registered so `cleanup` can still remove them.
    #[instrument(skip(self, backend, settings))]
    pub async fn create_agents(
        &mut self,
        backend: &dyn AgentsBackend,
        model: &str,
        settings: &OrchestrationSettings,
    ) -> Result<()> {
        if !self.agents.is_empty() {
            return Err(anyhow::anyhow!("Agents have already been created"));
        }

        info!("Creating specialized metric agents");

        for (kind, definition) in Self::definitions(model, settings) {
            let handle = backend
                .create_agent(&definition)
                .await
                .with_context(|| format!("Failed to create {} agent", definition.name))?;
            self.insert_agent(kind, definition, handle);
        }

        let kinds: Vec<AgentKind> = self.agents.keys().copied().collect();
        for kind in kinds {
            let thread = backend
                .create_thread()
                .await
                .with_context(|| format!("Failed to create thread for {} agent", kind))?;
            self.insert_thread(kind, thread);
        }

        info!("Created {} agents successfully", self.agents.len());
        Ok(())
    }

    fn insert_agent(&mut self, kind: AgentKind, definition: AgentDefinition, handle: AgentHandle) {
        self.agents.insert(kind, RegisteredAgent { definition, handle });
    }

    fn insert_thread(&mut self, kind: AgentKind, thread: ThreadHandle) {
        self.threads.insert(kind, thread);
    }

    pub fn binding(&self, kind: AgentKind) -> Result<AgentBinding<'_>> {
        let agent = self
            .agents
            .get(&kind)
            .with_context(|| format!("No {} agent has been created", kind))?;
        let thread = self
            .threads
            .get(&kind)
            .with_context(|| format!("No thread exists for the {} agent", kind))?;

        Ok(AgentBinding {
            definition: &agent.definition,
            agent: &agent.handle,
            thread,
        })
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Delete every registered agent. Best effort: one failure never stops the rest.
    pub async fn cleanup(&mut self, backend: &dyn AgentsBackend) -> CleanupSummary {
        let mut summary = CleanupSummary::default();
        self.threads.clear();

        for (kind, agent) in std::mem::take(&mut self.agents) {
            match backend.delete_agent(&agent.handle).await {
                Ok(()) => {
                    info!("Deleted {} agent", kind);
                    summary.deleted.push(kind);
                }
                Err(e) => {
                    warn!("Error deleting {} agent: {}", kind, e);
                    summary.failed.push((kind, e.to_string()));
                }
            }
        }

        summary
    }
}

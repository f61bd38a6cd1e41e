use crate::types::{
    AgentDefinition, AgentHandle, MessageRole, RunOutcome, RunStatus, ThreadHandle, ThreadMessage,
};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Failures raised by the hosted agents service
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request to agents service failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("agents service returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("unexpected response from agents service: {0}")]
    Decode(String),

    #[error("run {run_id} did not finish within {timeout:?}")]
    Timeout { run_id: String, timeout: Duration },

    #[error("run {run_id} is still {status:?}")]
    RunPending { run_id: String, status: RunStatus },
}

/// The operations this system consumes from the agent-execution service.
///
/// Everything hard (model execution, tool calling, conversation state) happens
/// behind this trait; implementations must keep threads append-only and list
/// messages newest first.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AgentsBackend: Send + Sync {
    async fn create_agent(&self, definition: &AgentDefinition) -> Result<AgentHandle, BackendError>;

    async fn create_thread(&self) -> Result<ThreadHandle, BackendError>;

    async fn create_message(
        &self,
        thread: &ThreadHandle,
        role: MessageRole,
        content: &str,
    ) -> Result<(), BackendError>;

    /// Start a run and block until it reaches a terminal status or `timeout` elapses
    async fn create_and_process_run(
        &self,
        thread: &ThreadHandle,
        agent: &AgentHandle,
        timeout: Option<Duration>,
    ) -> Result<RunOutcome, BackendError>;

    /// Newest message first
    async fn list_messages(&self, thread: &ThreadHandle) -> Result<Vec<ThreadMessage>, BackendError>;

    async fn delete_agent(&self, agent: &AgentHandle) -> Result<(), BackendError>;
}

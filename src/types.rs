use crate::tools::ToolFunction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Core types for the APR review agent system

/// The four metric domains, each served by a dedicated specialist agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Pav,
    Ppa,
    Sup,
    Dup,
}

impl MetricKind {
    /// Fixed analysis order
    pub const ALL: [MetricKind; 4] = [MetricKind::Pav, MetricKind::Ppa, MetricKind::Sup, MetricKind::Dup];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Pav => "pav",
            MetricKind::Ppa => "ppa",
            MetricKind::Sup => "sup",
            MetricKind::Dup => "dup",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            MetricKind::Pav => "PAV",
            MetricKind::Ppa => "PPA",
            MetricKind::Sup => "SUP",
            MetricKind::Dup => "DUP",
        }
    }

    pub fn agent_name(&self) -> &'static str {
        match self {
            MetricKind::Pav => "PAV_Agent",
            MetricKind::Ppa => "PPA_Agent",
            MetricKind::Sup => "SUP_Agent",
            MetricKind::Dup => "DUP_Agent",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Registry key for every agent the system creates
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AgentKind {
    Metric(MetricKind),
    Coordinator,
}

impl AgentKind {
    pub const ALL: [AgentKind; 5] = [
        AgentKind::Metric(MetricKind::Pav),
        AgentKind::Metric(MetricKind::Ppa),
        AgentKind::Metric(MetricKind::Sup),
        AgentKind::Metric(MetricKind::Dup),
        AgentKind::Coordinator,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Metric(kind) => kind.as_str(),
            AgentKind::Coordinator => "coordinator",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration of one agent on the hosted service. Immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentDefinition {
    pub name: String,
    pub instructions: String,
    pub model: String,
    pub tools: BTreeSet<ToolFunction>,
    pub timeout: Option<Duration>,
}

impl AgentDefinition {
    /// Metadata sent alongside the definition; the service only accepts string values
    pub fn metadata(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut metadata = serde_json::Map::new();
        if let Some(timeout) = self.timeout {
            metadata.insert(
                "timeout".to_string(),
                serde_json::Value::String(timeout.as_secs().to_string()),
            );
        }
        metadata
    }
}

/// Opaque handle for an agent created on the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentHandle {
    pub id: String,
    pub name: String,
}

/// Opaque handle for a conversation thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadHandle {
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageRole {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "assistant")]
    Agent,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Agent => "assistant",
        }
    }
}

/// A message read back from a thread
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadMessage {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Extract the reply from a newest-first message listing.
///
/// Only the newest message counts: it must come from the agent and carry
/// non-blank text.
pub fn latest_agent_reply(messages: &[ThreadMessage]) -> Option<String> {
    messages
        .first()
        .filter(|message| message.role == MessageRole::Agent)
        .filter(|message| !message.content.trim().is_empty())
        .map(|message| message.content.clone())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Cancelled,
    Failed,
    Completed,
    Incomplete,
    Expired,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Cancelled
                | RunStatus::Failed
                | RunStatus::Completed
                | RunStatus::Incomplete
                | RunStatus::Expired
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub id: String,
    pub status: RunStatus,
    pub last_error: Option<String>,
}

/// Text produced by each metric agent for one request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricResults {
    pub pav: String,
    pub ppa: String,
    pub sup: String,
    pub dup: String,
}

impl MetricResults {
    pub fn get(&self, kind: MetricKind) -> &str {
        match kind {
            MetricKind::Pav => &self.pav,
            MetricKind::Ppa => &self.ppa,
            MetricKind::Sup => &self.sup,
            MetricKind::Dup => &self.dup,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (MetricKind, &str)> {
        MetricKind::ALL.into_iter().map(move |kind| (kind, self.get(kind)))
    }
}

/// Synthesised report for one change request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalReport {
    pub id: Uuid,
    pub request_id: String,
    pub generated_at: DateTime<Utc>,
    pub metric_results: MetricResults,
    pub narrative: String,
}

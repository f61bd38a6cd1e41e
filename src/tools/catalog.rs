use crate::types::MetricKind;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;

/// Data-access functions the hosted agents may call.
///
/// The functions themselves live in an external data service; this crate only
/// describes them to the agents service and forwards the calls it receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ToolFunction {
    JiraTicketDescription,
    JiraTicketTitle,
    JiraTicketReleaseNotes,
    JiraTicketAttachments,
    JiraTicketXlsxAttachment,
    PullRequestBody,
    PullRequestTitle,
    ControlPlanMetricsFromPrComment,
    PrsFromApr,
    FeatureRankings,
    PavMetricsForApr,
    PpaMetricsForApr,
    SupMetricsForApr,
    DupMetricsForApr,
}

/// Function-tool declaration as sent to the agents service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolFunction {
    pub const ALL: [ToolFunction; 14] = [
        ToolFunction::JiraTicketDescription,
        ToolFunction::JiraTicketTitle,
        ToolFunction::JiraTicketReleaseNotes,
        ToolFunction::JiraTicketAttachments,
        ToolFunction::JiraTicketXlsxAttachment,
        ToolFunction::PullRequestBody,
        ToolFunction::PullRequestTitle,
        ToolFunction::ControlPlanMetricsFromPrComment,
        ToolFunction::PrsFromApr,
        ToolFunction::FeatureRankings,
        ToolFunction::PavMetricsForApr,
        ToolFunction::PpaMetricsForApr,
        ToolFunction::SupMetricsForApr,
        ToolFunction::DupMetricsForApr,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ToolFunction::JiraTicketDescription => "get_jira_ticket_description",
            ToolFunction::JiraTicketTitle => "get_jira_ticket_title",
            ToolFunction::JiraTicketReleaseNotes => "get_jira_ticket_release_notes",
            ToolFunction::JiraTicketAttachments => "get_jira_ticket_attachments",
            ToolFunction::JiraTicketXlsxAttachment => "get_jira_ticket_xlsx_attachment",
            ToolFunction::PullRequestBody => "get_pull_request_body",
            ToolFunction::PullRequestTitle => "get_pull_request_title",
            ToolFunction::ControlPlanMetricsFromPrComment => "get_control_plan_metrics_from_pr_comment",
            ToolFunction::PrsFromApr => "get_PRs_from_apr",
            ToolFunction::FeatureRankings => "get_feature_rankings",
            ToolFunction::PavMetricsForApr => "get_pav_metrics_for_apr",
            ToolFunction::PpaMetricsForApr => "get_ppa_metrics_for_apr",
            ToolFunction::SupMetricsForApr => "get_sup_metrics_for_apr",
            ToolFunction::DupMetricsForApr => "get_dup_metrics_for_apr",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.name() == name)
    }

    pub fn description(&self) -> &'static str {
        match self {
            ToolFunction::JiraTicketDescription => "Fetch the description text of a JIRA ticket.",
            ToolFunction::JiraTicketTitle => "Fetch the title of a JIRA ticket.",
            ToolFunction::JiraTicketReleaseNotes => "Fetch the release notes recorded on a JIRA ticket.",
            ToolFunction::JiraTicketAttachments => "List the attachments of a JIRA ticket with their text content.",
            ToolFunction::JiraTicketXlsxAttachment => {
                "Fetch the spreadsheet attachment of a JIRA ticket, rendered as rows of text."
            }
            ToolFunction::PullRequestBody => "Fetch the body of a pull request.",
            ToolFunction::PullRequestTitle => "Fetch the title of a pull request.",
            ToolFunction::ControlPlanMetricsFromPrComment => {
                "Extract the control-plan metrics posted as a comment on a pull request."
            }
            ToolFunction::PrsFromApr => "List the pull requests that belong to an APR.",
            ToolFunction::FeatureRankings => "Fetch the feature rankings computed for an APR.",
            ToolFunction::PavMetricsForApr => "Compute the PAV metric scores for every pull request of an APR.",
            ToolFunction::PpaMetricsForApr => "Compute the PPA metric scores for every pull request of an APR.",
            ToolFunction::SupMetricsForApr => "Compute the SUP metric scores for every pull request of an APR.",
            ToolFunction::DupMetricsForApr => "Compute the DUP metric scores for every pull request of an APR.",
        }
    }

    pub fn parameters(&self) -> serde_json::Value {
        let (field, description) = match self {
            ToolFunction::JiraTicketDescription
            | ToolFunction::JiraTicketTitle
            | ToolFunction::JiraTicketReleaseNotes
            | ToolFunction::JiraTicketAttachments
            | ToolFunction::JiraTicketXlsxAttachment => ("ticket_key", "JIRA ticket key, e.g. PROJ-1234"),
            ToolFunction::PullRequestBody
            | ToolFunction::PullRequestTitle
            | ToolFunction::ControlPlanMetricsFromPrComment => ("pr_number", "Pull request number"),
            ToolFunction::PrsFromApr
            | ToolFunction::FeatureRankings
            | ToolFunction::PavMetricsForApr
            | ToolFunction::PpaMetricsForApr
            | ToolFunction::SupMetricsForApr
            | ToolFunction::DupMetricsForApr => ("apr_number", "APR number"),
        };

        json!({
            "type": "object",
            "properties": {
                field: {"type": "string", "description": description}
            },
            "required": [field]
        })
    }

    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }

    /// Scorer dedicated to one metric domain
    pub fn metric_scorer(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Pav => ToolFunction::PavMetricsForApr,
            MetricKind::Ppa => ToolFunction::PpaMetricsForApr,
            MetricKind::Sup => ToolFunction::SupMetricsForApr,
            MetricKind::Dup => ToolFunction::DupMetricsForApr,
        }
    }
}

/// Tools granted to a metric specialist: its scorer plus the shared lookups
pub fn metric_agent_tools(kind: MetricKind) -> BTreeSet<ToolFunction> {
    BTreeSet::from([
        ToolFunction::metric_scorer(kind),
        ToolFunction::PullRequestTitle,
        ToolFunction::JiraTicketTitle,
        ToolFunction::JiraTicketDescription,
        ToolFunction::FeatureRankings,
    ])
}

/// Correlation-oriented tool set for the coordinator
pub fn coordinator_tools() -> BTreeSet<ToolFunction> {
    BTreeSet::from([
        ToolFunction::JiraTicketDescription,
        ToolFunction::PullRequestBody,
        ToolFunction::PullRequestTitle,
        ToolFunction::ControlPlanMetricsFromPrComment,
        ToolFunction::JiraTicketTitle,
        ToolFunction::JiraTicketReleaseNotes,
        ToolFunction::JiraTicketXlsxAttachment,
        ToolFunction::JiraTicketAttachments,
        ToolFunction::PrsFromApr,
        ToolFunction::FeatureRankings,
    ])
}

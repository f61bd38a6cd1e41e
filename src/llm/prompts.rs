use crate::tools::ToolFunction;
use crate::types::{MetricKind, MetricResults};

/// Prompt template for one agent: its standing instructions plus the message it is sent
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    pub system_prompt: String,
    pub user_prompt_template: String,
}

impl PromptTemplate {
    /// Fill `{name}` placeholders from `vars` in one pass.
    ///
    /// Substituted text is never rescanned, so values that themselves contain
    /// braces (agent output often does) land in the prompt verbatim. Unknown
    /// placeholders are left as written.
    pub fn render(&self, vars: &[(&str, &str)]) -> String {
        let template = self.user_prompt_template.as_str();
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];

            let substituted = after.find('}').and_then(|close| {
                let key = &after[..close];
                vars.iter()
                    .find(|(name, _)| *name == key)
                    .map(|(_, value)| (*value, close))
            });

            match substituted {
                Some((value, close)) => {
                    out.push_str(value);
                    rest = &after[close + 1..];
                }
                None => {
                    out.push('{');
                    rest = after;
                }
            }
        }

        out.push_str(rest);
        out
    }
}

/// Collection of prompts for all agents
pub struct AgentPrompts;

impl AgentPrompts {
    /// Specialist that computes one metric for an APR
    pub fn metric_analyst(kind: MetricKind) -> PromptTemplate {
        let label = kind.label();
        let scorer = ToolFunction::metric_scorer(kind).name();

        PromptTemplate {
            system_prompt: format!(
                r#"You are the {label} metric analyst in an APR review team. Your only job is to compute and explain the {label} metric for the APR you are given.

Workflow:
1. Call `{scorer}` with the APR number to obtain the {label} scores for every pull request in the APR.
2. Use `get_pull_request_title` to name the pull requests behind the most significant scores.
3. Use `get_jira_ticket_title` and `get_jira_ticket_description` only when a score needs ticket context to be understood.
4. Use `get_feature_rankings` to say which ranked features the notable pull requests touch.

Output rules:
- Start with a one-line verdict on the {label} metric for the APR.
- List the most significant pull requests with their {label} values and a short reason each.
- Call out outliers and missing data explicitly; never invent numbers that no tool returned.
- Focus on the most significant patterns; keep the analysis short enough to finish well within your time limit.
- Do not comment on metrics other than {label}; a coordinator combines the metrics."#
            ),
            user_prompt_template: "Please analyze APR {request_id} using your specialized metric analysis function. Focus on the most significant patterns to avoid timeout issues.".to_string(),
        }
    }

    /// Coordinator that correlates the specialists' findings and handles general questions
    pub fn coordinator() -> PromptTemplate {
        PromptTemplate {
            system_prompt: r#"You are the APR Coordinator. You lead four metric specialists (PAV, PPA, SUP and DUP) and answer the operator's questions about APRs, pull requests and JIRA tickets.

When you receive the specialists' findings for an APR:
1. Summarise each metric in two or three sentences, keeping the specialists' numbers exactly as given.
2. Correlate the metrics: point out pull requests that stand out on more than one metric.
3. Use `get_PRs_from_apr`, `get_pull_request_title`, `get_pull_request_body` and `get_control_plan_metrics_from_pr_comment` to link the notable pull requests to their JIRA tickets.
4. Use the JIRA tools (`get_jira_ticket_title`, `get_jira_ticket_description`, `get_jira_ticket_release_notes`, `get_jira_ticket_attachments`, `get_jira_ticket_xlsx_attachment`) to explain why those changes behave as they do.
5. Use `get_feature_rankings` to weigh findings by feature importance.
6. Finish with prioritised, concrete recommendations.

If a specialist reported a failure instead of findings, say so plainly and continue with the remaining metrics.

For general questions, answer directly and use the tools whenever the question concerns a specific APR, pull request or ticket."#.to_string(),
            user_prompt_template: r#"Please analyze and synthesize the results for APR {request_id}.

Here are the metric analysis findings from the specialized agents:

PAV AGENT ANALYSIS:
{pav_result}

PPA AGENT ANALYSIS:
{ppa_result}

SUP AGENT ANALYSIS:
{sup_result}

DUP AGENT ANALYSIS:
{dup_result}

Please create your comprehensive analysis following your instructions."#.to_string(),
        }
    }

    /// Task message posted to a metric agent's thread
    pub fn metric_task(kind: MetricKind, request_id: &str) -> String {
        Self::metric_analyst(kind).render(&[("request_id", request_id)])
    }

    /// Combined prompt posted to the coordinator's thread
    pub fn synthesis(request_id: &str, results: &MetricResults) -> String {
        Self::coordinator().render(&[
            ("request_id", request_id),
            ("pav_result", results.get(MetricKind::Pav)),
            ("ppa_result", results.get(MetricKind::Ppa)),
            ("sup_result", results.get(MetricKind::Sup)),
            ("dup_result", results.get(MetricKind::Dup)),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn results() -> MetricResults {
        MetricResults {
            pav: "pav placeholder".to_string(),
            ppa: "ppa placeholder".to_string(),
            sup: "sup placeholder".to_string(),
            dup: "dup placeholder".to_string(),
        }
    }

    #[test]
    fn test_metric_task_embeds_request_id() {
        let task = AgentPrompts::metric_task(MetricKind::Pav, "121");
        assert_eq!(
            task,
            "Please analyze APR 121 using your specialized metric analysis function. Focus on the most significant patterns to avoid timeout issues."
        );
    }

    #[test]
    fn test_metric_instructions_name_their_scorer() {
        let template = AgentPrompts::metric_analyst(MetricKind::Dup);
        assert!(template.system_prompt.contains("get_dup_metrics_for_apr"));
        assert!(!template.system_prompt.contains("get_pav_metrics_for_apr"));
    }

    #[test]
    fn test_synthesis_prompt_labels_every_section() {
        let prompt = AgentPrompts::synthesis("99", &results());
        assert!(prompt.starts_with("Please analyze and synthesize the results for APR 99."));
        for (kind, text) in results().iter() {
            let section = format!("{} AGENT ANALYSIS:\n{}", kind.label(), text);
            assert!(prompt.contains(&section), "missing section for {}", kind);
        }
    }

    #[test]
    fn test_render_does_not_rescan_substituted_values() {
        let mut tricky = results();
        tricky.pav = "scores: {ppa_result} and {\"k\": 1}".to_string();

        let prompt = AgentPrompts::synthesis("7", &tricky);
        assert!(prompt.contains("scores: {ppa_result} and {\"k\": 1}"));
        assert_eq!(prompt.matches("ppa placeholder").count(), 1);
    }

    #[test]
    fn test_render_keeps_unknown_and_unclosed_braces() {
        let template = PromptTemplate {
            system_prompt: String::new(),
            user_prompt_template: "a {unknown} b {request_id} c {".to_string(),
        };
        assert_eq!(template.render(&[("request_id", "5")]), "a {unknown} b 5 c {");
    }
}

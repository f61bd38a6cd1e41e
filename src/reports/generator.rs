use crate::types::FinalReport;
use anyhow::Result;

/// Report generator for creating various output formats
pub struct ReportGenerator;

impl ReportGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Generate report in the specified format
    pub fn generate(&self, report: &FinalReport, format: &str) -> Result<String> {
        match format.to_lowercase().as_str() {
            "json" => self.generate_json(report),
            "markdown" => self.generate_markdown(report),
            "text" => self.generate_text(report),
            _ => Err(anyhow::anyhow!("Unsupported format: {}", format)),
        }
    }

    fn generate_json(&self, report: &FinalReport) -> Result<String> {
        Ok(serde_json::to_string_pretty(report)?)
    }

    fn generate_markdown(&self, report: &FinalReport) -> Result<String> {
        let mut sections = String::new();
        for (kind, analysis) in report.metric_results.iter() {
            sections.push_str(&format!("### {}\n{}\n\n", kind.label(), analysis.trim_end()));
        }

        Ok(format!(
            r#"# APR {} Review Report

## Summary
{}

## Metric Analyses

{}---
*Report {} generated at: {}*
"#,
            report.request_id,
            report.narrative.trim_end(),
            sections,
            report.id,
            report.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        ))
    }

    /// The console rendering: the narrative between two rules
    fn generate_text(&self, report: &FinalReport) -> Result<String> {
        let rule = "=".repeat(80);
        Ok(format!(
            "📊 Final Report for APR {}\n\n{}\n{}\n{}\n\nGenerated at: {}\n",
            report.request_id,
            rule,
            report.narrative.trim_end(),
            rule,
            report.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        ))
    }
}

impl Default for ReportGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MetricResults;
    use chrono::Utc;
    use uuid::Uuid;

    fn report() -> FinalReport {
        FinalReport {
            id: Uuid::new_v4(),
            request_id: "121".to_string(),
            generated_at: Utc::now(),
            metric_results: MetricResults {
                pav: "PAV stable".to_string(),
                ppa: "PPA up 3%".to_string(),
                sup: "❌ SUP agent failed to provide analysis after 3 attempts".to_string(),
                dup: "DUP flat".to_string(),
            },
            narrative: "Overall healthy; SUP data missing.".to_string(),
        }
    }

    #[test]
    fn test_text_wraps_narrative_in_rules() {
        let text = ReportGenerator::new().generate(&report(), "text").unwrap();
        let rule = "=".repeat(80);
        assert!(text.contains(&format!("{}\nOverall healthy; SUP data missing.\n{}", rule, rule)));
    }

    #[test]
    fn test_markdown_lists_every_metric() {
        let markdown = ReportGenerator::new().generate(&report(), "Markdown").unwrap();
        assert!(markdown.starts_with("# APR 121 Review Report"));
        for heading in ["### PAV", "### PPA", "### SUP", "### DUP"] {
            assert!(markdown.contains(heading));
        }
        assert!(markdown.contains("after 3 attempts"));
    }

    #[test]
    fn test_json_and_unknown_format() {
        let generator = ReportGenerator::new();
        let json = generator.generate(&report(), "json").unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["request_id"], "121");
        assert_eq!(value["metric_results"]["ppa"], "PPA up 3%");

        assert!(generator.generate(&report(), "pdf").is_err());
    }
}

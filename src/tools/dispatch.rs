use super::catalog::ToolFunction;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, instrument};

/// Executes the function calls that the agents service hands back during a run
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Run `name` with the JSON-encoded `arguments` and return the tool output text
    async fn invoke(&self, name: &str, arguments: &str) -> Result<String>;
}

/// Forwards tool calls to an external data service at `{base_url}/{tool_name}`
pub struct HttpToolHandler {
    client: Client,
    base_url: String,
}

impl HttpToolHandler {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build data service HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, tool: ToolFunction) -> String {
        format!("{}/{}", self.base_url, tool.name())
    }
}

#[async_trait]
impl ToolHandler for HttpToolHandler {
    #[instrument(skip(self, arguments))]
    async fn invoke(&self, name: &str, arguments: &str) -> Result<String> {
        let tool = ToolFunction::from_name(name)
            .with_context(|| format!("Unknown tool requested by agent: {}", name))?;

        let body: serde_json::Value = if arguments.trim().is_empty() {
            serde_json::json!({})
        } else {
            serde_json::from_str(arguments)
                .with_context(|| format!("Invalid arguments for {}: {}", name, arguments))?
        };

        let response = self
            .client
            .post(self.endpoint(tool))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Data service call {} failed", name))?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(anyhow::anyhow!("Data service error for {}: {} - {}", name, status, text));
        }

        debug!("Tool {} returned {} bytes", name, text.len());
        Ok(text)
    }
}

/// Used when no data service is configured; every call fails with a clear message
pub struct UnconfiguredToolHandler;

#[async_trait]
impl ToolHandler for UnconfiguredToolHandler {
    async fn invoke(&self, name: &str, _arguments: &str) -> Result<String> {
        Err(anyhow::anyhow!(
            "No data service configured for tool {} (set APR_DATA_SERVICE_URL)",
            name
        ))
    }
}

/// Render a tool failure as the output the agent sees, so the run can continue
pub fn error_output(error: &anyhow::Error) -> String {
    serde_json::json!({ "error": format!("{:#}", error) }).to_string()
}

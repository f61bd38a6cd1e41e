/// Configuration management for the APR review agent
use crate::agents::runner::RetryPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

pub const ENDPOINT_VAR: &str = "AZURE_EXISTING_AIPROJECT_ENDPOINT";
pub const MODEL_VAR: &str = "MODEL_DEPLOYMENT_NAME";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: BackendSettings,
    pub orchestration: OrchestrationSettings,
    pub tools: ToolSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    pub endpoint: String,
    pub model_deployment_name: Option<String>,
    pub api_version: String,
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationSettings {
    pub metric_timeout_seconds: u64,
    pub coordinator_timeout_seconds: u64,
    pub chat_timeout_seconds: Option<u64>,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
    pub backoff_multiplier: f64,
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolSettings {
    pub data_service_url: Option<String>,
    pub request_timeout_seconds: u64,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            model_deployment_name: None,
            api_version: "v1".to_string(),
            access_token: None,
            request_timeout_seconds: 120,
        }
    }
}

impl Default for OrchestrationSettings {
    fn default() -> Self {
        Self {
            metric_timeout_seconds: 360,
            coordinator_timeout_seconds: 600,
            chat_timeout_seconds: None,
            max_retries: 2,
            retry_delay_seconds: 5,
            backoff_multiplier: 1.0,
            poll_interval_ms: 1000,
        }
    }
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            data_service_url: None,
            request_timeout_seconds: 60,
        }
    }
}

impl OrchestrationSettings {
    pub fn metric_timeout(&self) -> Duration {
        Duration::from_secs(self.metric_timeout_seconds)
    }

    pub fn coordinator_timeout(&self) -> Duration {
        Duration::from_secs(self.coordinator_timeout_seconds)
    }

    pub fn chat_timeout(&self) -> Option<Duration> {
        self.chat_timeout_seconds.map(Duration::from_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            delay: Duration::from_secs(self.retry_delay_seconds),
            backoff_multiplier: self.backoff_multiplier,
        }
    }
}

impl Config {
    /// Load configuration from file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Defaults, then the optional YAML file, then the process environment
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => {
                info!("Loading configuration from: {:?}", path);
                Self::load_from_file(path)
                    .await
                    .with_context(|| format!("Failed to load configuration file: {:?}", path))?
            }
            Some(path) => {
                warn!("Configuration file not found: {:?}. Using defaults.", path);
                Config::default()
            }
            None => Config::default(),
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Override settings from environment variables, looked up through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup(ENDPOINT_VAR) {
            self.backend.endpoint = endpoint;
        }

        if let Some(model) = lookup(MODEL_VAR) {
            self.backend.model_deployment_name = Some(model);
        }

        if let Some(token) = lookup("AZURE_AI_ACCESS_TOKEN") {
            self.backend.access_token = Some(token);
        }

        if let Some(version) = lookup("AZURE_AI_AGENTS_API_VERSION") {
            self.backend.api_version = version;
        }

        if let Some(retries) = lookup("APR_AGENT_MAX_RETRIES") {
            self.orchestration.max_retries = retries
                .parse()
                .with_context(|| format!("Invalid APR_AGENT_MAX_RETRIES: {}", retries))?;
        }

        if let Some(delay) = lookup("APR_AGENT_RETRY_DELAY_SECONDS") {
            self.orchestration.retry_delay_seconds = delay
                .parse()
                .with_context(|| format!("Invalid APR_AGENT_RETRY_DELAY_SECONDS: {}", delay))?;
        }

        if let Some(timeout) = lookup("APR_AGENT_METRIC_TIMEOUT_SECONDS") {
            self.orchestration.metric_timeout_seconds = timeout
                .parse()
                .with_context(|| format!("Invalid APR_AGENT_METRIC_TIMEOUT_SECONDS: {}", timeout))?;
        }

        if let Some(timeout) = lookup("APR_AGENT_COORDINATOR_TIMEOUT_SECONDS") {
            self.orchestration.coordinator_timeout_seconds = timeout.parse().with_context(|| {
                format!("Invalid APR_AGENT_COORDINATOR_TIMEOUT_SECONDS: {}", timeout)
            })?;
        }

        if let Some(url) = lookup("APR_DATA_SERVICE_URL") {
            self.tools.data_service_url = Some(url);
        }

        Ok(())
    }

    /// Model deployment the agents are created with
    pub fn model_deployment_name(&self) -> Result<&str> {
        self.backend
            .model_deployment_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("Please define the environment variable {}.", MODEL_VAR))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.model_deployment_name()?;

        if self.backend.endpoint.trim().is_empty() {
            return Err(anyhow::anyhow!("Please define the environment variable {}.", ENDPOINT_VAR));
        }

        if self.orchestration.metric_timeout_seconds == 0
            || self.orchestration.coordinator_timeout_seconds == 0
            || self.orchestration.chat_timeout_seconds == Some(0)
        {
            return Err(anyhow::anyhow!("Agent timeouts must be greater than 0"));
        }

        if !self.orchestration.backoff_multiplier.is_finite() {
            return Err(anyhow::anyhow!("Retry backoff multiplier must be a finite number"));
        }

        if self.orchestration.backoff_multiplier < 1.0 {
            return Err(anyhow::anyhow!("Retry backoff multiplier must be at least 1.0"));
        }

        if self.orchestration.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("Run poll interval must be greater than 0"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::NamedTempFile;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    fn configured() -> Config {
        let mut config = Config::default();
        config
            .apply_env(env(&[
                (ENDPOINT_VAR, "https://apr.services.ai.azure.com/api/projects/apr"),
                (MODEL_VAR, "gpt-4o"),
            ]))
            .unwrap();
        config
    }

    #[tokio::test]
    async fn test_config_save_and_load() {
        let mut config = configured();
        config.orchestration.max_retries = 4;
        config.backend.access_token = Some("secret".to_string());
        let temp_file = NamedTempFile::new().unwrap();

        config.save_to_file(temp_file.path()).await.unwrap();
        let loaded_config = Config::load_from_file(temp_file.path()).await.unwrap();

        assert_eq!(loaded_config.orchestration.max_retries, 4);
        assert_eq!(loaded_config.backend.model_deployment_name.as_deref(), Some("gpt-4o"));
        // tokens only ever come from the environment
        assert!(loaded_config.backend.access_token.is_none());
    }

    #[tokio::test]
    async fn test_partial_file_keeps_defaults() {
        let temp_file = NamedTempFile::new().unwrap();
        tokio::fs::write(temp_file.path(), "orchestration:\n  max_retries: 5\n")
            .await
            .unwrap();

        let loaded = Config::load_from_file(temp_file.path()).await.unwrap();
        assert_eq!(loaded.orchestration.max_retries, 5);
        assert_eq!(loaded.orchestration.metric_timeout_seconds, 360);
        assert_eq!(loaded.orchestration.coordinator_timeout_seconds, 600);
        assert_eq!(loaded.backend.api_version, "v1");
    }

    #[test]
    fn test_missing_model_is_fatal_with_literal_message() {
        let mut config = Config::default();
        config.apply_env(env(&[(ENDPOINT_VAR, "https://x")])).unwrap();

        let err = config.validate().unwrap_err();
        assert_eq!(err.to_string(), "Please define the environment variable MODEL_DEPLOYMENT_NAME.");
    }

    #[test]
    fn test_config_validation() {
        let mut config = configured();
        assert!(config.validate().is_ok());

        config.orchestration.metric_timeout_seconds = 0;
        assert!(config.validate().is_err());

        config = configured();
        config.orchestration.backoff_multiplier = 0.5;
        assert!(config.validate().is_err());

        config = configured();
        config.orchestration.backoff_multiplier = f64::INFINITY;
        assert!(config.validate().is_err());

        config = configured();
        config.orchestration.backoff_multiplier = f64::NAN;
        assert!(config.validate().is_err());

        config = configured();
        config.backend.endpoint.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env(env(&[
                ("APR_AGENT_MAX_RETRIES", "0"),
                ("APR_AGENT_RETRY_DELAY_SECONDS", "1"),
                ("APR_DATA_SERVICE_URL", "http://data.local"),
            ]))
            .unwrap();

        let policy = config.orchestration.retry_policy();
        assert_eq!(policy.max_retries, 0);
        assert_eq!(policy.delay, Duration::from_secs(1));
        assert_eq!(config.tools.data_service_url.as_deref(), Some("http://data.local"));

        let err = config.apply_env(env(&[("APR_AGENT_MAX_RETRIES", "many")]));
        assert!(err.is_err());
    }

    #[test]
    fn test_default_timeouts() {
        let settings = OrchestrationSettings::default();
        assert_eq!(settings.metric_timeout(), Duration::from_secs(360));
        assert_eq!(settings.coordinator_timeout(), Duration::from_secs(600));
        assert_eq!(settings.chat_timeout(), None);
    }
}

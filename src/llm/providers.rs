use super::interfaces::{AgentsBackend, BackendError};
use crate::config::BackendSettings;
use crate::tools::dispatch::{error_output, ToolHandler};
use crate::types::*;
use anyhow::{Context, Result};
use async_trait::async_trait;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use chrono::{TimeZone, Utc};
use reqwest::{header, Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

const MAX_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Azure AI Foundry Agents service client
pub struct AzureAgentsClient {
    client: Client,
    endpoint: String,
    api_version: String,
    access_token: Option<String>,
    poll_interval: Duration,
    tools: Arc<dyn ToolHandler>,
}

impl AzureAgentsClient {
    pub fn new(
        settings: &BackendSettings,
        poll_interval: Duration,
        tools: Arc<dyn ToolHandler>,
    ) -> Result<Self> {
        if settings.endpoint.trim().is_empty() {
            return Err(anyhow::anyhow!("Agents service endpoint is not configured"));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_seconds))
            .build()
            .context("Failed to build agents service HTTP client")?;

        Ok(Self {
            client,
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            api_version: settings.api_version.clone(),
            access_token: settings.access_token.clone(),
            poll_interval,
            tools,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint, path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, self.url(path))
            .query(&[("api-version", self.api_version.as_str())]);

        match &self.access_token {
            Some(token) => builder.header(header::AUTHORIZATION, format!("Bearer {}", token)),
            None => builder,
        }
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, BackendError> {
        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(BackendError::Api {
                status: status.as_u16(),
                body: text,
            });
        }

        serde_json::from_str(&text).map_err(|e| BackendError::Decode(format!("{}: {}", e, text)))
    }

    async fn get_run(&self, thread: &ThreadHandle, run_id: &str) -> Result<RunObject, BackendError> {
        self.send_json(self.request(Method::GET, &format!("threads/{}/runs/{}", thread.id, run_id)))
            .await
    }

    async fn cancel_run(&self, thread: &ThreadHandle, run_id: &str) -> Result<(), BackendError> {
        let _: RunObject = self
            .send_json(self.request(
                Method::POST,
                &format!("threads/{}/runs/{}/cancel", thread.id, run_id),
            ))
            .await?;
        Ok(())
    }

    /// Answer every function call the run is blocked on
    async fn submit_tool_outputs(&self, thread: &ThreadHandle, run: &RunObject) -> Result<(), BackendError> {
        let calls = run
            .required_action
            .as_ref()
            .and_then(|action| action.submit_tool_outputs.as_ref())
            .map(|submit| submit.tool_calls.as_slice())
            .unwrap_or_default();

        let mut outputs = Vec::with_capacity(calls.len());
        for call in calls {
            let output = match &call.function {
                Some(function) => {
                    debug!("Run {} calls tool {}", run.id, function.name);
                    match self.tools.invoke(&function.name, &function.arguments).await {
                        Ok(output) => output,
                        Err(e) => {
                            warn!("Tool {} failed: {:#}", function.name, e);
                            error_output(&e)
                        }
                    }
                }
                None => error_output(&anyhow::anyhow!("Unsupported tool call type: {}", call.kind)),
            };
            outputs.push(json!({ "tool_call_id": call.id, "output": output }));
        }

        let _: RunObject = self
            .send_json(
                self.request(
                    Method::POST,
                    &format!("threads/{}/runs/{}/submit_tool_outputs", thread.id, run.id),
                )
                .json(&json!({ "tool_outputs": outputs })),
            )
            .await?;
        Ok(())
    }

    /// One poll of the run. Pending states are transient so the schedule keeps polling.
    async fn poll_step(
        &self,
        thread: &ThreadHandle,
        run_id: &str,
    ) -> Result<PollStep, backoff::Error<BackendError>> {
        let run = self.get_run(thread, run_id).await.map_err(retry_class)?;

        if run.status.is_terminal() {
            return Ok(PollStep::Finished(run.into_outcome()));
        }

        if run.status == RunStatus::RequiresAction {
            self.submit_tool_outputs(thread, &run).await.map_err(retry_class)?;
            return Ok(PollStep::ToolsSubmitted);
        }

        Err(backoff::Error::transient(BackendError::RunPending {
            run_id: run.id,
            status: run.status,
        }))
    }

    fn poll_schedule(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.poll_interval)
            .with_randomization_factor(0.0)
            .with_multiplier(1.5)
            .with_max_interval(MAX_POLL_INTERVAL.max(self.poll_interval))
            .with_max_elapsed_time(None)
            .build()
    }

    /// Polls until the run is terminal. The schedule starts over after every tool
    /// submission since the run has fresh work to do.
    async fn wait_for_run(&self, thread: &ThreadHandle, run_id: &str) -> Result<RunOutcome, BackendError> {
        loop {
            let step = backoff::future::retry(self.poll_schedule(), || self.poll_step(thread, run_id)).await?;
            match step {
                PollStep::Finished(outcome) => return Ok(outcome),
                PollStep::ToolsSubmitted => debug!("Tool outputs submitted for run {}", run_id),
            }
        }
    }
}

enum PollStep {
    Finished(RunOutcome),
    ToolsSubmitted,
}

/// Network blips, throttling and server errors are worth another poll; everything else is final
fn retry_class(error: BackendError) -> backoff::Error<BackendError> {
    match &error {
        BackendError::Http(_) => backoff::Error::transient(error),
        BackendError::Api { status, .. } if *status == 429 || *status >= 500 => {
            backoff::Error::transient(error)
        }
        _ => backoff::Error::permanent(error),
    }
}

#[async_trait]
impl AgentsBackend for AzureAgentsClient {
    #[instrument(skip(self, definition), fields(agent = %definition.name))]
    async fn create_agent(&self, definition: &AgentDefinition) -> Result<AgentHandle, BackendError> {
        let tools: Vec<_> = definition
            .tools
            .iter()
            .map(|tool| json!({ "type": "function", "function": tool.definition() }))
            .collect();

        let body = json!({
            "model": definition.model,
            "name": definition.name,
            "instructions": definition.instructions,
            "tools": tools,
            "metadata": definition.metadata(),
        });

        let created: CreatedObject = self
            .send_json(self.request(Method::POST, "assistants").json(&body))
            .await?;

        info!("Created agent {} ({})", definition.name, created.id);
        Ok(AgentHandle {
            id: created.id,
            name: definition.name.clone(),
        })
    }

    async fn create_thread(&self) -> Result<ThreadHandle, BackendError> {
        let created: CreatedObject = self
            .send_json(self.request(Method::POST, "threads").json(&json!({})))
            .await?;

        debug!("Created thread {}", created.id);
        Ok(ThreadHandle { id: created.id })
    }

    async fn create_message(
        &self,
        thread: &ThreadHandle,
        role: MessageRole,
        content: &str,
    ) -> Result<(), BackendError> {
        let body = json!({ "role": role.as_str(), "content": content });
        let _: CreatedObject = self
            .send_json(
                self.request(Method::POST, &format!("threads/{}/messages", thread.id))
                    .json(&body),
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self, thread, agent), fields(thread = %thread.id, agent = %agent.name))]
    async fn create_and_process_run(
        &self,
        thread: &ThreadHandle,
        agent: &AgentHandle,
        timeout: Option<Duration>,
    ) -> Result<RunOutcome, BackendError> {
        let run: RunObject = self
            .send_json(
                self.request(Method::POST, &format!("threads/{}/runs", thread.id))
                    .json(&json!({ "assistant_id": agent.id })),
            )
            .await?;
        debug!("Started run {}", run.id);

        let Some(limit) = timeout else {
            return self.wait_for_run(thread, &run.id).await;
        };

        match tokio::time::timeout(limit, self.wait_for_run(thread, &run.id)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!("Run {} exceeded {:?}, cancelling", run.id, limit);
                if let Err(e) = self.cancel_run(thread, &run.id).await {
                    warn!("Failed to cancel run {}: {}", run.id, e);
                }
                Err(BackendError::Timeout {
                    run_id: run.id,
                    timeout: limit,
                })
            }
        }
    }

    async fn list_messages(&self, thread: &ThreadHandle) -> Result<Vec<ThreadMessage>, BackendError> {
        let list: MessageList = self
            .send_json(
                self.request(Method::GET, &format!("threads/{}/messages", thread.id))
                    .query(&[("order", "desc")]),
            )
            .await?;

        Ok(list.data.into_iter().map(MessageObject::into_message).collect())
    }

    async fn delete_agent(&self, agent: &AgentHandle) -> Result<(), BackendError> {
        let _: serde_json::Value = self
            .send_json(self.request(Method::DELETE, &format!("assistants/{}", agent.id)))
            .await?;
        info!("Deleted agent {} ({})", agent.name, agent.id);
        Ok(())
    }
}

// Wire formats

#[derive(Debug, Deserialize)]
struct CreatedObject {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RunObject {
    id: String,
    status: RunStatus,
    #[serde(default)]
    required_action: Option<RequiredAction>,
    #[serde(default)]
    last_error: Option<RunError>,
}

impl RunObject {
    fn into_outcome(self) -> RunOutcome {
        RunOutcome {
            id: self.id,
            status: self.status,
            last_error: self
                .last_error
                .map(|e| e.message.or(e.code).unwrap_or_else(|| "unknown error".to_string())),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RunError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RequiredAction {
    #[serde(default)]
    submit_tool_outputs: Option<SubmitToolOutputs>,
}

#[derive(Debug, Deserialize)]
struct SubmitToolOutputs {
    tool_calls: Vec<ToolCallObject>,
}

#[derive(Debug, Deserialize)]
struct ToolCallObject {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    function: Option<FunctionCall>,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    data: Vec<MessageObject>,
}

#[derive(Debug, Deserialize)]
struct MessageObject {
    id: String,
    role: MessageRole,
    #[serde(default)]
    content: Vec<ContentPart>,
    created_at: i64,
}

impl MessageObject {
    fn into_message(self) -> ThreadMessage {
        let content = self
            .content
            .into_iter()
            .filter_map(|part| part.text.map(|text| text.value))
            .collect::<Vec<_>>()
            .join("\n");

        ThreadMessage {
            id: self.id,
            role: self.role,
            content,
            created_at: Utc
                .timestamp_opt(self.created_at, 0)
                .single()
                .unwrap_or_else(Utc::now),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ContentPart {
    #[serde(default)]
    text: Option<TextContent>,
}

#[derive(Debug, Deserialize)]
struct TextContent {
    value: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::UnconfiguredToolHandler;
    use std::sync::Mutex;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> AzureAgentsClient {
        let settings = BackendSettings {
            endpoint: "https://example.services.ai.azure.com/api/projects/apr/".to_string(),
            ..BackendSettings::default()
        };
        AzureAgentsClient::new(&settings, Duration::from_millis(10), Arc::new(UnconfiguredToolHandler))
            .unwrap()
    }

    #[test]
    fn test_url_joins_endpoint_and_path() {
        assert_eq!(
            client().url("/threads/t1/runs"),
            "https://example.services.ai.azure.com/api/projects/apr/threads/t1/runs"
        );
    }

    #[test]
    fn test_missing_endpoint_is_rejected() {
        let settings = BackendSettings::default();
        assert!(AzureAgentsClient::new(&settings, Duration::from_secs(1), Arc::new(UnconfiguredToolHandler)).is_err());
    }

    #[test]
    fn test_message_list_decodes_newest_first_text() {
        let payload = json!({
            "object": "list",
            "data": [
                {
                    "id": "msg_2",
                    "role": "assistant",
                    "created_at": 1_700_000_100,
                    "content": [
                        {"type": "text", "text": {"value": "PAV summary", "annotations": []}},
                        {"type": "image_file", "image_file": {"file_id": "f1"}},
                        {"type": "text", "text": {"value": "second part", "annotations": []}}
                    ]
                },
                {
                    "id": "msg_1",
                    "role": "user",
                    "created_at": 1_700_000_000,
                    "content": [{"type": "text", "text": {"value": "Please analyze APR 5"}}]
                }
            ]
        });

        let list: MessageList = serde_json::from_value(payload).unwrap();
        let messages: Vec<ThreadMessage> = list.data.into_iter().map(MessageObject::into_message).collect();

        assert_eq!(messages[0].role, MessageRole::Agent);
        assert_eq!(messages[0].content, "PAV summary\nsecond part");
        assert_eq!(messages[0].created_at.timestamp(), 1_700_000_100);
        assert_eq!(messages[1].role, MessageRole::User);
        assert_eq!(latest_agent_reply(&messages).as_deref(), Some("PAV summary\nsecond part"));
    }

    #[test]
    fn test_run_requiring_tools_decodes_calls() {
        let payload = json!({
            "id": "run_1",
            "status": "requires_action",
            "required_action": {
                "type": "submit_tool_outputs",
                "submit_tool_outputs": {
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "get_pav_metrics_for_apr", "arguments": "{\"apr_number\":\"121\"}"}
                    }]
                }
            },
            "last_error": null
        });

        let run: RunObject = serde_json::from_value(payload).unwrap();
        assert_eq!(run.status, RunStatus::RequiresAction);
        assert!(!run.status.is_terminal());
        let calls = &run.required_action.unwrap().submit_tool_outputs.unwrap().tool_calls;
        assert_eq!(calls[0].function.as_ref().unwrap().name, "get_pav_metrics_for_apr");
    }

    #[test]
    fn test_failed_run_keeps_error_message() {
        let payload = json!({
            "id": "run_2",
            "status": "failed",
            "last_error": {"code": "rate_limit_exceeded", "message": "Rate limit is exceeded."}
        });

        let outcome = serde_json::from_value::<RunObject>(payload).unwrap().into_outcome();
        assert_eq!(outcome.status, RunStatus::Failed);
        assert_eq!(outcome.last_error.as_deref(), Some("Rate limit is exceeded."));
    }

    #[test]
    fn test_throttling_is_retried_but_client_errors_are_not() {
        let throttled = BackendError::Api { status: 429, body: String::new() };
        assert!(matches!(retry_class(throttled), backoff::Error::Transient { .. }));

        let not_found = BackendError::Api { status: 404, body: String::new() };
        assert!(matches!(retry_class(not_found), backoff::Error::Permanent(_)));
    }

    /// Answers the PAV scorer and fails everything else
    #[derive(Default)]
    struct RecordingTools {
        calls: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ToolHandler for RecordingTools {
        async fn invoke(&self, name: &str, arguments: &str) -> Result<String> {
            self.calls
                .lock()
                .unwrap()
                .push((name.to_string(), arguments.to_string()));
            match name {
                "get_pav_metrics_for_apr" => Ok(r#"{"pav": 0.91}"#.to_string()),
                _ => Err(anyhow::anyhow!("ticket store offline")),
            }
        }
    }

    fn served_client(server: &MockServer, tools: Arc<dyn ToolHandler>) -> AzureAgentsClient {
        let settings = BackendSettings {
            endpoint: server.uri(),
            access_token: Some("token".to_string()),
            ..BackendSettings::default()
        };
        AzureAgentsClient::new(&settings, Duration::from_millis(5), tools).unwrap()
    }

    fn thread() -> ThreadHandle {
        ThreadHandle { id: "t1".to_string() }
    }

    fn agent() -> AgentHandle {
        AgentHandle {
            id: "asst_pav".to_string(),
            name: "PAV_Agent".to_string(),
        }
    }

    fn run(status: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({ "id": "run_1", "status": status }))
    }

    fn tool_call(call_id: &str, tool: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "id": "run_1",
            "status": "requires_action",
            "required_action": {
                "type": "submit_tool_outputs",
                "submit_tool_outputs": {
                    "tool_calls": [{
                        "id": call_id,
                        "type": "function",
                        "function": {"name": tool, "arguments": "{\"apr_number\":\"121\"}"}
                    }]
                }
            }
        }))
    }

    async fn mount_run_start(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/threads/t1/runs"))
            .and(query_param("api-version", "v1"))
            .and(header("authorization", "Bearer token"))
            .respond_with(run("queued"))
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_run_is_polled_until_terminal() {
        let server = MockServer::start().await;
        mount_run_start(&server).await;
        Mock::given(method("GET"))
            .and(path("/threads/t1/runs/run_1"))
            .respond_with(run("in_progress"))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/threads/t1/runs/run_1"))
            .respond_with(run("completed"))
            .mount(&server)
            .await;

        let client = served_client(&server, Arc::new(UnconfiguredToolHandler));
        let outcome = client
            .create_and_process_run(&thread(), &agent(), Some(Duration::from_secs(5)))
            .await
            .unwrap();

        assert_eq!(outcome.status, RunStatus::Completed);
        let polls = server
            .received_requests()
            .await
            .unwrap()
            .into_iter()
            .filter(|request| request.method.as_str() == "GET")
            .count();
        assert_eq!(polls, 3);
    }

    #[tokio::test]
    async fn test_tool_calls_are_dispatched_and_submitted() {
        let server = MockServer::start().await;
        mount_run_start(&server).await;
        Mock::given(method("GET"))
            .and(path("/threads/t1/runs/run_1"))
            .respond_with(tool_call("call_1", "get_pav_metrics_for_apr"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/threads/t1/runs/run_1"))
            .respond_with(tool_call("call_2", "get_jira_ticket_title"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/threads/t1/runs/run_1"))
            .respond_with(run("completed"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/threads/t1/runs/run_1/submit_tool_outputs"))
            .respond_with(run("queued"))
            .expect(2)
            .mount(&server)
            .await;

        let tools = Arc::new(RecordingTools::default());
        let client = served_client(&server, tools.clone());
        let outcome = client
            .create_and_process_run(&thread(), &agent(), None)
            .await
            .unwrap();
        assert_eq!(outcome.status, RunStatus::Completed);

        let calls = tools.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, "get_pav_metrics_for_apr");
        assert_eq!(calls[0].1, "{\"apr_number\":\"121\"}");

        let submitted: Vec<serde_json::Value> = server
            .received_requests()
            .await
            .unwrap()
            .into_iter()
            .filter(|request| request.url.path().ends_with("/submit_tool_outputs"))
            .map(|request| request.body_json().unwrap())
            .collect();
        assert_eq!(submitted.len(), 2);

        assert_eq!(submitted[0]["tool_outputs"][0]["tool_call_id"], "call_1");
        assert_eq!(submitted[0]["tool_outputs"][0]["output"], r#"{"pav": 0.91}"#);

        // a failing tool still answers the call so the run can continue
        assert_eq!(submitted[1]["tool_outputs"][0]["tool_call_id"], "call_2");
        let output: serde_json::Value =
            serde_json::from_str(submitted[1]["tool_outputs"][0]["output"].as_str().unwrap()).unwrap();
        assert!(output["error"].as_str().unwrap().contains("ticket store offline"));
    }

    #[tokio::test]
    async fn test_timed_out_run_is_cancelled() {
        let server = MockServer::start().await;
        mount_run_start(&server).await;
        Mock::given(method("GET"))
            .and(path("/threads/t1/runs/run_1"))
            .respond_with(run("in_progress"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/threads/t1/runs/run_1/cancel"))
            .respond_with(run("cancelling"))
            .expect(1)
            .mount(&server)
            .await;

        let client = served_client(&server, Arc::new(UnconfiguredToolHandler));
        let err = client
            .create_and_process_run(&thread(), &agent(), Some(Duration::from_millis(50)))
            .await
            .unwrap_err();

        match err {
            BackendError::Timeout { run_id, timeout } => {
                assert_eq!(run_id, "run_1");
                assert_eq!(timeout, Duration::from_millis(50));
            }
            other => panic!("expected a timeout, got {:?}", other),
        }
        server.verify().await;
    }

    #[tokio::test]
    async fn test_server_errors_and_throttling_while_polling_are_retried() {
        let server = MockServer::start().await;
        mount_run_start(&server).await;
        Mock::given(method("GET"))
            .and(path("/threads/t1/runs/run_1"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/threads/t1/runs/run_1"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/threads/t1/runs/run_1"))
            .respond_with(run("completed"))
            .mount(&server)
            .await;

        let client = served_client(&server, Arc::new(UnconfiguredToolHandler));
        let outcome = client
            .create_and_process_run(&thread(), &agent(), Some(Duration::from_secs(5)))
            .await
            .unwrap();

        assert_eq!(outcome.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_client_error_while_polling_is_final() {
        let server = MockServer::start().await;
        mount_run_start(&server).await;
        Mock::given(method("GET"))
            .and(path("/threads/t1/runs/run_1"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such run"))
            .expect(1)
            .mount(&server)
            .await;

        let client = served_client(&server, Arc::new(UnconfiguredToolHandler));
        let err = client
            .create_and_process_run(&thread(), &agent(), Some(Duration::from_secs(5)))
            .await
            .unwrap_err();

        assert!(matches!(err, BackendError::Api { status: 404, .. }));
    }
}

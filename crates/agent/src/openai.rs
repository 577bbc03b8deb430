//! Chat-completions client for OpenAI-compatible endpoints (Groq, OpenAI,
//! Ollama's `/v1` surface).

use std::time::Duration;

use async_trait::async_trait;
use crmbot_core::config::LlmConfig;
use crmbot_core::retry::RetryPolicy;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::llm::{AssistantTurn, ChatMessage, LlmClient, LlmError, ToolCall, ToolSchema};

const TOO_MANY_REQUESTS: u16 = 429;
const LLM_BACKOFF_FACTOR_SECS: f64 = 0.5;

pub struct OpenAiCompatibleClient {
    http: Client,
    endpoint: String,
    model: String,
    api_key: Option<SecretString>,
    retry: RetryPolicy,
}

impl OpenAiCompatibleClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| LlmError::Transport(format!("failed to build http client: {error}")))?;
        Ok(Self::new(
            http,
            &config.effective_base_url(),
            &config.model,
            config.api_key.clone(),
            RetryPolicy::new(config.max_retries, LLM_BACKOFF_FACTOR_SECS),
        ))
    }

    pub fn new(
        http: Client,
        base_url: &str,
        model: &str,
        api_key: Option<SecretString>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            http,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.to_string(),
            api_key,
            retry: retry.with_status(TOO_MANY_REQUESTS),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send(&self, request: &ChatRequest<'_>) -> Result<ChatResponse, LlmError> {
        let mut retry = 0_u32;

        loop {
            let mut builder = self.http.post(&self.endpoint).json(request);
            if let Some(api_key) = &self.api_key {
                builder = builder.bearer_auth(api_key.expose_secret());
            }

            let reason = match builder.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response
                            .json::<ChatResponse>()
                            .await
                            .map_err(|error| LlmError::Decode(error.to_string()));
                    }
                    if !self.retry.should_retry_status(status.as_u16())
                        || retry >= self.retry.max_retries
                    {
                        let body = response.text().await.unwrap_or_default();
                        return Err(LlmError::Status { status: status.as_u16(), body });
                    }
                    format!("status {}", status.as_u16())
                }
                Err(error) if error.is_connect() && retry < self.retry.max_retries => {
                    error.to_string()
                }
                Err(error) => return Err(LlmError::Transport(error.to_string())),
            };

            retry += 1;
            let delay = self.retry.backoff(retry);
            warn!(
                event_name = "llm.request.retrying",
                endpoint = %self.endpoint,
                retry,
                max_retries = self.retry.max_retries,
                delay_ms = delay.as_millis() as u64,
                reason = %reason,
                "retrying model request"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
    ) -> Result<AssistantTurn, LlmError> {
        let request = ChatRequest {
            model: &self.model,
            messages: messages.iter().map(WireMessage::from).collect(),
            tools: (!tools.is_empty()).then(|| tools.iter().map(WireTool::from).collect()),
            tool_choice: (!tools.is_empty()).then_some("auto"),
            temperature: 0.0,
        };

        let response = self.send(&request).await?;
        let choice = response.choices.into_iter().next().ok_or(LlmError::EmptyResponse)?;
        debug!(
            event_name = "llm.response.received",
            finish_reason = choice.finish_reason.as_deref().unwrap_or("unknown"),
            tool_calls = choice.message.tool_calls.len(),
            "model turn received"
        );

        Ok(AssistantTurn {
            content: choice.message.content,
            tool_calls: choice
                .message
                .tool_calls
                .into_iter()
                .map(|call| ToolCall {
                    id: call.id,
                    name: call.function.name,
                    arguments: call.function.arguments,
                })
                .collect(),
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl From<&ChatMessage> for WireMessage {
    fn from(message: &ChatMessage) -> Self {
        let bare = |role, content: &str| WireMessage {
            role,
            content: Some(content.to_string()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        };

        match message {
            ChatMessage::System(content) => bare("system", content.as_str()),
            ChatMessage::User(content) => bare("user", content.as_str()),
            ChatMessage::Assistant { content, tool_calls } => WireMessage {
                role: "assistant",
                // Some providers reject a null content alongside tool calls.
                content: Some(content.clone().unwrap_or_default()),
                tool_calls: tool_calls
                    .iter()
                    .map(|call| WireToolCall {
                        id: call.id.clone(),
                        call_type: "function".to_string(),
                        function: WireFunctionCall {
                            name: call.name.clone(),
                            arguments: call.arguments.clone(),
                        },
                    })
                    .collect(),
                tool_call_id: None,
            },
            ChatMessage::Tool { tool_call_id, content } => WireMessage {
                tool_call_id: Some(tool_call_id.clone()),
                ..bare("tool", content.as_str())
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: WireFunction,
}

impl From<&ToolSchema> for WireTool {
    fn from(schema: &ToolSchema) -> Self {
        Self {
            tool_type: "function",
            function: WireFunction {
                name: schema.name.clone(),
                description: schema.description.clone(),
                parameters: schema.parameters.clone(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    call_type: String,
    function: WireFunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

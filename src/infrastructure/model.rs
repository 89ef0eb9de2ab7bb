use crate::types::{Message, Role, ToolCallRequest, ToolSpec};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";

/// One inference turn: full ordered history, the currently available tools,
/// and a one-shot system instruction that is prepended but never persisted.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub model: String,
    pub system_instruction: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model provider requires an API key")]
    MissingApiKey,
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("model provider returned invalid response: {0}")]
    InvalidResponse(String),
}

impl ModelError {
    pub fn user_message(&self) -> String {
        match self {
            ModelError::MissingApiKey => {
                "The model provider requires an API key. Set OPENAI_API_KEY in the environment or a .env file.".to_string()
            }
            ModelError::Network(err) => {
                if err.is_connect() {
                    "Could not connect to the model provider. Check your network and the configured endpoint.".to_string()
                } else if err.is_timeout() {
                    "The request to the model provider timed out. Try again shortly.".to_string()
                } else if let Some(status) = err.status() {
                    match status {
                        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                            "The model provider rejected the configured API key.".to_string()
                        }
                        StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY => {
                            "The model provider is currently unavailable. Try again later.".to_string()
                        }
                        _ => format!(
                            "The request to the model provider failed with status {}.",
                            status.as_u16()
                        ),
                    }
                } else {
                    "A network error occurred while contacting the model provider.".to_string()
                }
            }
            ModelError::InvalidResponse(_) => {
                "The model provider returned a response that could not be processed. Try again."
                    .to_string()
            }
        }
    }
}

/// Seam between the agent loop and the text-generation service. Given the
/// history and available tools the provider returns exactly one message,
/// which carries tool calls only when the model wants a tool invoked.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn decide(&self, request: ModelRequest) -> Result<Message, ModelError>;
}

/// OpenAI-compatible chat-completions client (works with OpenAI, Mistral,
/// Groq, and other providers speaking the same protocol).
#[derive(Clone, Debug)]
pub struct OpenAiClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, ModelError> {
        let api_key = api_key.ok_or(ModelError::MissingApiKey)?;
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        let trimmed = self.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{trimmed}/{path}")
    }
}

#[async_trait]
impl ModelProvider for OpenAiClient {
    async fn decide(&self, request: ModelRequest) -> Result<Message, ModelError> {
        let url = self.endpoint(CHAT_COMPLETIONS_PATH);
        let payload = ChatCompletionRequest::from(&request);
        info!(
            model = request.model.as_str(),
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending request to model provider"
        );
        let response: ChatCompletionResponse = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        debug!("Received response from model provider");

        let message = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .ok_or_else(|| ModelError::InvalidResponse("missing message in choices".into()))?;

        message_from_wire(message)
    }
}

fn message_from_wire(wire: WireResponseMessage) -> Result<Message, ModelError> {
    let mut calls = Vec::with_capacity(wire.tool_calls.as_ref().map_or(0, Vec::len));
    for call in wire.tool_calls.unwrap_or_default() {
        let arguments: Map<String, Value> = if call.function.arguments.trim().is_empty() {
            Map::new()
        } else {
            serde_json::from_str(&call.function.arguments).map_err(|err| {
                ModelError::InvalidResponse(format!(
                    "tool call arguments are not a JSON object: {err}"
                ))
            })?
        };
        calls.push(ToolCallRequest {
            id: call.id,
            name: call.function.name,
            arguments,
        });
    }

    let content = wire.content.unwrap_or_default();
    if calls.is_empty() {
        Ok(Message::assistant(content))
    } else {
        Ok(Message::tool_request(content, calls))
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
}

impl From<&ModelRequest> for ChatCompletionRequest {
    fn from(value: &ModelRequest) -> Self {
        let mut messages = Vec::with_capacity(value.messages.len() + 1);
        messages.push(WireMessage {
            role: Role::System.as_str().to_string(),
            content: value.system_instruction.clone(),
            tool_call_id: None,
            tool_calls: None,
        });
        for message in &value.messages {
            messages.push(WireMessage::from(message));
        }

        let tools = if value.tools.is_empty() {
            None
        } else {
            Some(value.tools.iter().map(WireTool::from).collect())
        };

        Self {
            model: value.model.clone(),
            messages,
            tools,
        }
    }
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
}

impl From<&Message> for WireMessage {
    fn from(value: &Message) -> Self {
        let tool_calls = if value.tool_calls.is_empty() {
            None
        } else {
            Some(value.tool_calls.iter().map(WireToolCall::from).collect())
        };
        Self {
            role: value.role.as_str().to_string(),
            content: value.content.clone(),
            tool_call_id: value.call_id.clone(),
            tool_calls,
        }
    }
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionDef,
}

impl From<&ToolSpec> for WireTool {
    fn from(value: &ToolSpec) -> Self {
        Self {
            kind: "function",
            function: WireFunctionDef {
                name: value.name.clone(),
                description: value.description.clone(),
                parameters: value.parameters.clone(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct WireFunctionDef {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: WireFunctionCall,
}

impl From<&ToolCallRequest> for WireToolCall {
    fn from(value: &ToolCallRequest) -> Self {
        Self {
            id: value.id.clone(),
            kind: "function".to_string(),
            function: WireFunctionCall {
                name: value.name.clone(),
                // Chat-completions carries arguments as a JSON string.
                arguments: serde_json::to_string(&value.arguments)
                    .unwrap_or_else(|_| String::from("{}")),
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<WireResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct WireResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

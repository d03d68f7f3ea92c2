//! Language-model access.
//!
//! The orchestrator talks to a [`LanguageModel`] in two phases: *dispatch*
//! (propose capability calls for the user's utterance) and *compose* (turn
//! capability output into the reply). [`OpenAiChatModel`] speaks the
//! OpenAI-compatible chat-completions protocol with function calling;
//! [`OfflineModel`] is the deterministic stand-in used when no API key is
//! configured. It proposes nothing and composes replies straight from tool
//! output, leaving call selection to the orchestrator's safety check.

use crate::capability::{CapabilityCall, CapabilityDescriptor};
use crate::config::LlmConfig;
use crate::error::LlmError;
use anyhow::Context;
use log::{debug, info, warn};
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Calls proposed by an assistant message.
    pub calls: Vec<CapabilityCall>,
    /// Call a tool message answers.
    pub call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content.into())
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content.into())
    }

    pub fn assistant(content: impl Into<String>, calls: Vec<CapabilityCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            calls,
            call_id: None,
        }
    }

    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            calls: Vec::new(),
            call_id: Some(call_id.into()),
        }
    }

    fn plain(role: Role, content: String) -> Self {
        Self {
            role,
            content,
            calls: Vec::new(),
            call_id: None,
        }
    }

    fn to_wire(&self) -> Value {
        match self.role {
            Role::Assistant if !self.calls.is_empty() => {
                let content = match self.content.is_empty() {
                    true => Value::Null,
                    false => Value::String(self.content.clone()),
                };
                let tool_calls: Vec<Value> = self
                    .calls
                    .iter()
                    .map(|c| {
                        json!({
                            "id": c.id,
                            "type": "function",
                            "function": {
                                "name": c.name,
                                "arguments": Value::Object(c.args.clone()).to_string(),
                            },
                        })
                    })
                    .collect();
                json!({ "role": "assistant", "content": content, "tool_calls": tool_calls })
            }
            Role::Tool => json!({
                "role": "tool",
                "tool_call_id": self.call_id.clone().unwrap_or_default(),
                "content": self.content,
            }),
            role => json!({ "role": role.as_str(), "content": self.content }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Dispatch,
    Compose,
}

pub struct ModelRequest<'a> {
    pub messages: &'a [ChatMessage],
    pub tools: &'a [&'a CapabilityDescriptor],
    pub phase: Phase,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelReply {
    pub text: String,
    pub calls: Vec<CapabilityCall>,
}

pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &str;

    /// # Errors
    ///
    /// [`LlmError`] on transport, status or decoding failures.
    fn respond(&self, request: &ModelRequest<'_>) -> Result<ModelReply, LlmError>;
}

pub struct OpenAiChatModel {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ResponseToolCall>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    #[serde(default)]
    id: String,
    function: ResponseFunction,
}

#[derive(Debug, Deserialize)]
struct ResponseFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

impl OpenAiChatModel {
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built.
    pub fn new(config: &LlmConfig, api_key: String) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .context("Failed to build HTTP client for the language model")?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
        })
    }

    /// Client when the configured API key variable is set.
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built.
    pub fn from_config(config: &LlmConfig) -> anyhow::Result<Option<Self>> {
        match config.api_key() {
            Some(key) => {
                info!("Using language model {} at {}", config.model, config.endpoint);
                Ok(Some(Self::new(config, key)?))
            }
            None => {
                info!("{} not set, using the offline model", config.api_key_env);
                Ok(None)
            }
        }
    }

    fn request_body(&self, request: &ModelRequest<'_>) -> Value {
        let mut body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": request.messages.iter().map(ChatMessage::to_wire).collect::<Vec<_>>(),
        });
        if !request.tools.is_empty() {
            body["tools"] = request
                .tools
                .iter()
                .map(|d| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": d.name,
                            "description": d.description,
                            "parameters": d.json_schema(),
                        },
                    })
                })
                .collect();
            body["tool_choice"] = json!("auto");
        }
        body
    }
}

impl LanguageModel for OpenAiChatModel {
    fn name(&self) -> &str {
        &self.model
    }

    fn respond(&self, request: &ModelRequest<'_>) -> Result<ModelReply, LlmError> {
        debug!(
            "{:?} request to {} with {} messages, {} tools",
            request.phase,
            self.model,
            request.messages.len(),
            request.tools.len()
        );
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(request))
            .send()
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response.text().map_err(|e| LlmError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(LlmError::Status {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }
        parse_reply(&body)
    }
}

/// Decode a chat-completions response body.
///
/// # Errors
///
/// [`LlmError::Malformed`] when the body is not a completion with a choice.
pub fn parse_reply(body: &str) -> Result<ModelReply, LlmError> {
    let response: CompletionResponse =
        serde_json::from_str(body).map_err(|e| LlmError::Malformed(e.to_string()))?;
    let message = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::Malformed("no choices in response".to_string()))?
        .message;

    Ok(ModelReply {
        text: message.content.unwrap_or_default(),
        calls: message
            .tool_calls
            .into_iter()
            .map(|c| CapabilityCall::new(c.id, c.function.name, parse_arguments(&c.function.arguments)))
            .collect(),
    })
}

fn parse_arguments(raw: &str) -> Map<String, Value> {
    if raw.trim().is_empty() {
        return Map::new();
    }
    match serde_json::from_str::<Map<String, Value>>(raw) {
        Ok(args) => args,
        Err(e) => {
            warn!("Ignoring malformed tool arguments {raw:?}: {e}");
            Map::new()
        }
    }
}

/// Deterministic model for offline use and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineModel;

impl LanguageModel for OfflineModel {
    fn name(&self) -> &str {
        "offline"
    }

    fn respond(&self, request: &ModelRequest<'_>) -> Result<ModelReply, LlmError> {
        if request.phase == Phase::Dispatch {
            return Ok(ModelReply::default());
        }

        // Latest run of tool output, ignoring interleaved system instructions.
        let mut outputs: Vec<&str> = request
            .messages
            .iter()
            .rev()
            .filter(|m| m.role != Role::System)
            .take_while(|m| m.role == Role::Tool)
            .map(|m| m.content.as_str())
            .collect();
        outputs.reverse();

        if outputs.is_empty() {
            return Ok(ModelReply::default());
        }
        Ok(ModelReply {
            text: format!("Here's what I found:\n\n{}", outputs.join("\n\n")),
            calls: Vec::new(),
        })
    }
}

//! OpenAI-compatible chat-completions client (Groq by default).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use niftyrag_core::config::AgentSettings;
use niftyrag_core::{HttpAuth, HttpClient, HttpRequest};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::AgentError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded argument object, as sent by the model.
    #[serde(default)]
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_type")]
    pub kind: String,
    pub function: FunctionCall,
}

fn function_type() -> String {
    String::from("function")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn plain(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain("assistant", content)
    }

    pub fn assistant_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: String::from("assistant"),
            content: None,
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::plain("tool", content)
        }
    }
}

/// A tool as advertised to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolSpec {
    fn to_json(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

pub type ChatFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ChatMessage, AgentError>> + Send + 'a>>;

/// One assistant turn given the conversation so far.
pub trait ChatModel: Send + Sync {
    fn complete<'a>(
        &'a self,
        messages: &'a [ChatMessage],
        tools: &'a [ToolSpec],
    ) -> ChatFuture<'a>;
}

pub struct OpenAiChatClient {
    http: Arc<dyn HttpClient>,
    base_url: String,
    model: String,
    temperature: f32,
    api_key: String,
    timeout_ms: u64,
}

impl OpenAiChatClient {
    pub fn new(
        http: Arc<dyn HttpClient>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            temperature: 0.0,
            api_key: api_key.into(),
            timeout_ms: 60_000,
        }
    }

    /// Build from `[agent]` settings; fails without an API key.
    pub fn from_settings(
        http: Arc<dyn HttpClient>,
        settings: &AgentSettings,
    ) -> Result<Self, AgentError> {
        let api_key = settings
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or(AgentError::MissingApiKey)?;
        Ok(
            Self::new(http, settings.base_url.clone(), settings.model.clone(), api_key)
                .with_temperature(settings.temperature),
        )
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn request_body(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Value {
        let mut body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": messages,
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.iter().map(ToolSpec::to_json).collect());
            body["tool_choice"] = Value::from("auto");
        }
        body
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: ChatMessage,
}

impl ChatModel for OpenAiChatClient {
    fn complete<'a>(
        &'a self,
        messages: &'a [ChatMessage],
        tools: &'a [ToolSpec],
    ) -> ChatFuture<'a> {
        Box::pin(async move {
            let request = HttpRequest::post(format!("{}/chat/completions", self.base_url))
                .with_auth(&HttpAuth::BearerToken(self.api_key.clone()))
                .with_json(&self.request_body(messages, tools))
                .with_timeout_ms(self.timeout_ms);

            let response = self
                .http
                .execute(request)
                .await
                .map_err(|e| AgentError::Transport(e.message().to_string()))?;
            if !response.is_success() {
                return Err(AgentError::Api {
                    status: response.status,
                    message: api_error_message(&response.body),
                });
            }

            let parsed: CompletionResponse = serde_json::from_str(&response.body)
                .map_err(|e| AgentError::MalformedResponse(e.to_string()))?;
            let choice = parsed
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| AgentError::MalformedResponse(String::from("no choices")))?;
            tracing::debug!(
                model = %self.model,
                tool_calls = choice.message.tool_calls.len(),
                "chat completion received"
            );
            Ok(choice.message)
        })
    }
}

fn api_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| value["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.chars().take(200).collect())
}

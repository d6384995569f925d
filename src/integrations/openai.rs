//! OpenAI chat-completions client and the [`LanguageModel`] implementation on top of it.

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::llm::{ChatMessage, Decision, LanguageModel, OutputSchema, ToolSpec};
use crate::metrics;
use crate::{Error, Result};

pub const OPENAI_API_URL: &str = "https://api.openai.com/v1";

/// OpenAI client.
#[derive(Debug, Clone)]
pub struct OpenAIClient {
    http: Client,
    api_key: String,
    base_url: String,
}

impl OpenAIClient {
    /// Create client from environment variable.
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("OPENAI_API_KEY")
            .map_err(|_| Error::Configuration("OPENAI_API_KEY is not set".to_string()))?;
        Self::new(api_key, Duration::from_secs(60))
    }

    /// Create client with API key and per-request timeout.
    pub fn new<S: Into<String>>(api_key: S, timeout: Duration) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(Error::Configuration("OPENAI_API_KEY is empty".to_string()));
        }

        let http = Client::builder()
            .user_agent("graph_reader/0.1.0")
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Configuration(format!("HTTP client error: {}", e)))?;

        Ok(Self {
            http,
            api_key,
            base_url: OPENAI_API_URL.to_string(),
        })
    }

    /// Point the client at a compatible endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Chat completion returning the text of the first choice.
    pub async fn chat_completion(
        &self,
        messages: &[ChatMessage],
        model: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String> {
        let request = ChatRequest {
            model,
            messages,
            temperature,
            max_tokens,
            response_format: None,
            tools: Vec::new(),
        };

        self.send(&request)
            .await?
            .content
            .ok_or_else(|| Error::Service("Empty response from OpenAI".to_string()))
    }

    /// Chat completion bound to a JSON schema; returns the raw message text.
    pub async fn structured_completion(
        &self,
        messages: &[ChatMessage],
        schema: &OutputSchema,
        model: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String> {
        let request = ChatRequest {
            model,
            messages,
            temperature,
            max_tokens,
            response_format: Some(json!({
                "type": "json_schema",
                "json_schema": {
                    "name": schema.name,
                    "schema": schema.schema,
                    "strict": false
                }
            })),
            tools: Vec::new(),
        };

        self.send(&request)
            .await?
            .content
            .ok_or_else(|| Error::Service("Empty response from OpenAI".to_string()))
    }

    /// Chat completion with tools; returns the assistant message as is.
    pub async fn tool_completion(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
        model: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<ChatMessage> {
        let request = ChatRequest {
            model,
            messages,
            temperature,
            max_tokens,
            response_format: None,
            tools: tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.parameters
                        }
                    })
                })
                .collect(),
        };

        self.send(&request).await
    }

    async fn send(&self, request: &ChatRequest<'_>) -> Result<ChatMessage> {
        debug!(
            "OpenAI request: model={} messages={} tools={}",
            request.model,
            request.messages.len(),
            request.tools.len()
        );

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Service(format!("OpenAI request failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::Service(format!("Failed to read response: {}", e)))?;

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Error::Configuration(format!(
                "OpenAI rejected the API key ({}): {}",
                status, text
            )));
        }
        if !status.is_success() {
            return Err(Error::Service(format!("OpenAI error {}: {}", status, text)));
        }

        let chat_response: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| Error::Service(format!("Invalid response: {}", e)))?;

        chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| Error::Service("Empty response from OpenAI".to_string()))
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Model name and sampling parameters used for every call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            max_tokens: 2000,
        }
    }
}

/// [`LanguageModel`] backed by the OpenAI chat-completions API.
#[derive(Debug, Clone)]
pub struct OpenAIModel {
    client: OpenAIClient,
    settings: ModelSettings,
}

impl OpenAIModel {
    pub fn new(client: OpenAIClient, settings: ModelSettings) -> Self {
        Self { client, settings }
    }

    pub fn settings(&self) -> &ModelSettings {
        &self.settings
    }
}

fn tracked<T>(kind: &str, result: Result<T>) -> Result<T> {
    metrics::record_oracle_call(kind, result.is_ok());
    result
}

#[async_trait]
impl LanguageModel for OpenAIModel {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let s = &self.settings;
        let result = self
            .client
            .chat_completion(messages, &s.model, s.temperature, s.max_tokens)
            .await;
        tracked("complete", result)
    }

    async fn complete_structured(
        &self,
        messages: &[ChatMessage],
        schema: &OutputSchema,
    ) -> Result<Value> {
        let s = &self.settings;
        let result = self
            .client
            .structured_completion(messages, schema, &s.model, s.temperature, s.max_tokens)
            .await
            .and_then(|text| {
                serde_json::from_str::<Value>(&text).map_err(|e| {
                    Error::SchemaViolation(format!("{} output is not JSON: {}", schema.name, e))
                })
            });
        tracked("structured", result)
    }

    async fn decide(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<Decision> {
        let s = &self.settings;
        let result = self
            .client
            .tool_completion(messages, tools, &s.model, s.temperature, s.max_tokens)
            .await
            .and_then(|message| match (message.tool_calls, message.content) {
                (Some(calls), _) if !calls.is_empty() => Ok(Decision::ToolCalls(calls)),
                (_, Some(content)) => Ok(Decision::Final(content)),
                _ => Err(Error::Service("Empty response from OpenAI".to_string())),
            });
        tracked("decide", result)
    }
}

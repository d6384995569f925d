//! Language-model oracle abstraction.
//!
//! The pipeline and the reader never talk to a provider directly; they hold an
//! `Arc<dyn LanguageModel>` and use one of three call shapes:
//! - [`LanguageModel::complete`] for free text,
//! - [`LanguageModel::complete_structured`] for output bound to a JSON schema,
//! - [`LanguageModel::decide`] for tool calling, which yields either tool
//!   invocations or a final answer.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// Chat message in the OpenAI wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn with_content(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_content("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_content("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_content("assistant", content)
    }

    /// Assistant turn that requested tool invocations.
    pub fn assistant_tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: None,
            tool_calls: Some(calls),
            tool_call_id: None,
        }
    }

    /// Tool output answering the call with `call_id`.
    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// Tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: FunctionCall,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            kind: function_kind(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments, as the model produced them
    pub arguments: String,
}

fn function_kind() -> String {
    "function".to_string()
}

/// Declared callable action offered to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolSpec {
    /// Describe a tool whose arguments deserialize into `T`.
    pub fn of<T: JsonSchema>(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters: schema_value::<T>(),
        }
    }
}

/// Declared output schema for structured completions.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSchema {
    pub name: String,
    pub schema: Value,
}

impl OutputSchema {
    pub fn of<T: JsonSchema>(name: &str) -> Self {
        Self {
            name: name.to_string(),
            schema: schema_value::<T>(),
        }
    }
}

fn schema_value<T: JsonSchema>() -> Value {
    let mut schema = serde_json::to_value(schemars::schema_for!(T)).unwrap_or(Value::Null);
    if let Some(obj) = schema.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }
    schema
}

/// Outcome of one tool-calling turn.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// The model wants these tools executed before it continues
    ToolCalls(Vec<ToolCall>),
    /// The model produced its final text
    Final(String),
}

/// Blocking request/response access to a language model.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Free-text completion.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;

    /// Completion constrained to `schema`; returns the decoded JSON value.
    async fn complete_structured(
        &self,
        messages: &[ChatMessage],
        schema: &OutputSchema,
    ) -> Result<Value>;

    /// Tool-calling turn over the declared `tools`.
    async fn decide(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<Decision>;
}

/// Structured completion decoded into `T`; non-conforming output is a schema violation.
pub async fn complete_as<T>(llm: &dyn LanguageModel, messages: &[ChatMessage], name: &str) -> Result<T>
where
    T: DeserializeOwned + JsonSchema,
{
    let schema = OutputSchema::of::<T>(name);
    let value = llm.complete_structured(messages, &schema).await?;
    serde_json::from_value(value)
        .map_err(|e| Error::SchemaViolation(format!("{} output does not match schema: {}", name, e)))
}

/// System + user message pair.
pub fn system_user(system: &str, user: &str) -> Vec<ChatMessage> {
    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

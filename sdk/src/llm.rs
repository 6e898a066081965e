//! LLM client contract
//!
//! Weave does not ship provider adapters. The engine and the bundled managers
//! reach completions, embeddings and structured output through [`LlmClient`];
//! callers plug in whichever provider they use.

use std::fmt;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::errors::EngineError;

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    /// Tool result message
    Tool,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// Message in a conversation history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,

    /// Optional sender name (speaker name for user messages, tool name for tool results)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
            name: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            name: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            name: None,
        }
    }

    /// Create a new tool result message
    pub fn tool_result(content: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: content.into(),
            name: Some(tool_name.into()),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Capability tier requested from the provider
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    Fast,
    #[default]
    Default,
    Advanced,
}

/// Tool the model may call during a completion
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the tool arguments
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub model_type: ModelType,
    pub temperature: f32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            model_type: ModelType::Default,
            temperature: 0.7,
            tools: Vec::new(),
        }
    }
}

/// Request for a completion constrained to a JSON schema
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StructuredOutputRequest {
    pub messages: Vec<Message>,
    pub model_type: ModelType,
    pub temperature: f32,
    pub schema_name: String,
    pub schema: serde_json::Value,
    pub strict_schema: bool,
}

/// Provider-agnostic LLM client
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate the next assistant message
    async fn generate_completion(&self, request: CompletionRequest) -> Result<Message, EngineError>;

    /// Generate a JSON value conforming to the request schema
    async fn generate_structured_output(
        &self,
        request: StructuredOutputRequest,
    ) -> Result<serde_json::Value, EngineError>;

    /// Embed text into a vector
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, EngineError>;
}

/// Generate structured output and decode it into `T`
pub async fn generate_structured<T>(
    client: &dyn LlmClient,
    request: StructuredOutputRequest,
) -> Result<T, EngineError>
where
    T: DeserializeOwned,
{
    let value = client.generate_structured_output(request).await?;
    serde_json::from_value(value).map_err(|e| {
        EngineError::LLMProvider(format!("structured output did not match schema: {}", e))
    })
}

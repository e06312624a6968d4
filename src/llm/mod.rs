//! LLM driver abstraction and the tool-calling orchestrator.
//!
//! The [`LlmDriver`] trait is the streaming seam to the model provider. The
//! [`Orchestrator`] runs the tool loop on top of a driver, executing tool
//! calls through the [`ToolRegistry`](crate::tools::ToolRegistry).
//!
//! - [`ChatCompletionsDriver`]: OpenAI-compatible `/v1/chat/completions`
//! - [`Provider`]: URL conventions of the compatible hosts

pub mod chat_completions;
pub mod orchestrator;
pub mod provider;

pub use chat_completions::ChatCompletionsDriver;
pub use orchestrator::{MAX_TOOL_STEPS, Orchestrator};
pub use provider::Provider;

use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::normalized::NormalizedEvent;

/// LLM connection and model settings.
#[derive(Clone)]
pub struct LlmSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    /// Detected from `base_url`.
    pub provider: Provider,
}

impl std::fmt::Debug for LlmSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmSettings")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("model", &self.model)
            .field("provider", &self.provider)
            .finish()
    }
}

impl From<&LlmConfig> for LlmSettings {
    fn from(cfg: &LlmConfig) -> Self {
        Self {
            base_url: cfg.base_url.clone(),
            api_key: cfg.api_key.clone().filter(|k| !k.is_empty()),
            model: cfg.model.clone(),
            provider: Provider::detect_from_url(&cfg.base_url),
        }
    }
}

/// Role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A message in the model's conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl Message {
    fn plain(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(MessageRole::Assistant, content)
    }
}

/// A tool call made by the assistant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    /// Always `"function"`.
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: ToolCallFunction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallFunction {
    pub name: String,
    /// Arguments as a JSON string.
    pub arguments: String,
}

/// Request to an LLM driver.
#[derive(Debug)]
pub struct LlmRequest {
    pub messages: Vec<serde_json::Value>,
    /// Function schemas; empty disables tool calling.
    pub tools: Vec<serde_json::Value>,
}

pub type EventStream = Pin<Box<dyn Stream<Item = anyhow::Result<NormalizedEvent>> + Send>>;

/// Streaming access to a model.
#[async_trait::async_trait]
pub trait LlmDriver: Send + Sync {
    /// Stream a response as [`NormalizedEvent`]s. Tool calls are reported
    /// with `ToolCallDelta` and `ToolCallComplete`; the driver never
    /// executes them.
    async fn stream(&self, req: LlmRequest) -> anyhow::Result<EventStream>;
}

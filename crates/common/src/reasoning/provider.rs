//! LLM provider contract
//!
//! The reasoning engine talks to the model only through `LlmProvider`:
//! one system instruction, one user message, an optional tool catalog.

use super::tools::ToolDefinition;
use super::types::ToolInput;
use crate::errors::ProviderError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// How the provider may pick tools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolChoice {
    Auto,
}

/// A single-message request to the provider
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageRequest {
    pub system: String,
    pub user_message: String,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: Option<ToolChoice>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl MessageRequest {
    /// Request with no tools attached
    pub fn new(system: impl Into<String>, user_message: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            system: system.into(),
            user_message: user_message.into(),
            tools: Vec::new(),
            tool_choice: None,
            max_tokens,
            temperature: 0.0,
        }
    }

    /// Attach a tool catalog with automatic selection; an empty catalog attaches nothing.
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        if !tools.is_empty() {
            self.tools = tools;
            self.tool_choice = Some(ToolChoice::Auto);
        }
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// One content block of a provider response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: ToolInput,
    },
}

/// Why the provider stopped generating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub content: Vec<ContentBlock>,
    pub stop_reason: StopReason,
}

impl ProviderResponse {
    /// Text of the first text block, skipping any leading tool-use blocks
    pub fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
            ContentBlock::ToolUse { .. } => None,
        })
    }
}

/// Trait for LLM message generation
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send one message and return the raw response
    async fn create_message(&self, request: &MessageRequest) -> Result<ProviderResponse, ProviderError>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

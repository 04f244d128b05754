//! Anthropic Messages API provider
//!
//! Implements `LlmProvider` over HTTP with reqwest. Retries are left to the
//! reasoning engine; this client reports each failure once, classified as
//! API, transport or response-format error.

use crate::config::LlmConfig;
use crate::errors::ProviderError;
use crate::reasoning::provider::{
    ContentBlock, LlmProvider, MessageRequest, ProviderResponse, StopReason, ToolChoice,
};
use crate::reasoning::tools::ToolDefinition;
use crate::reasoning::types::ToolInput;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Anthropic Messages API client
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
    api_version: String,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "no_tools")]
    tools: &'a [ToolDefinition],
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ToolChoice>,
}

fn no_tools(tools: &&[ToolDefinition]) -> bool {
    tools.is_empty()
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: ToolInput,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct WireResponse {
    content: Vec<WireBlock>,
    stop_reason: Option<StopReason>,
}

#[derive(Deserialize)]
struct WireErrorBody {
    error: WireError,
}

#[derive(Deserialize)]
struct WireError {
    message: String,
}

impl AnthropicProvider {
    /// Create a provider from configuration
    pub fn new(config: &LlmConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ProviderError::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key: config.api_key.clone().filter(|key| !key.is_empty()),
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_version: config.api_version.clone(),
        })
    }

    fn build_request<'a>(&'a self, request: &'a MessageRequest) -> WireRequest<'a> {
        WireRequest {
            model: &self.model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            system: &request.system,
            messages: vec![WireMessage {
                role: "user",
                content: &request.user_message,
            }],
            tools: &request.tools,
            tool_choice: if request.tools.is_empty() {
                None
            } else {
                request.tool_choice
            },
        }
    }

    fn parse_response(body: &str) -> Result<ProviderResponse, ProviderError> {
        let wire: WireResponse = serde_json::from_str(body)
            .map_err(|e| ProviderError::ResponseFormat(format!("Failed to parse response: {}", e)))?;

        let content = wire
            .content
            .into_iter()
            .filter_map(|block| match block {
                WireBlock::Text { text } => Some(ContentBlock::Text { text }),
                WireBlock::ToolUse { id, name, input } => Some(ContentBlock::ToolUse { id, name, input }),
                WireBlock::Other => None,
            })
            .collect();

        Ok(ProviderResponse {
            content,
            stop_reason: wire.stop_reason.unwrap_or(StopReason::Other),
        })
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn create_message(&self, request: &MessageRequest) -> Result<ProviderResponse, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::Other("LLM API key is not configured".to_string()))?;

        let url = format!("{}/v1/messages", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", &self.api_version)
            .header("Content-Type", "application/json")
            .json(&self.build_request(request))
            .send()
            .await
            .map_err(|e| ProviderError::Transport(format!("Request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Transport(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            let message = serde_json::from_str::<WireErrorBody>(&body)
                .map(|b| b.error.message)
                .unwrap_or(body);
            tracing::warn!(status = status.as_u16(), error = %message, "LLM API error");
            return Err(ProviderError::Api {
                status: Some(status.as_u16()),
                message,
            });
        }

        Self::parse_response(&body)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

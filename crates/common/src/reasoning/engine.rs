//! Reasoning Engine - Executes one LLM round
//!
//! Provides:
//! - System prompt and user message composition per round
//! - Provider calls with exponential backoff on recoverable errors
//! - Classification of the provider response into `EngineResponse`
//! - Character-based token usage estimation

use super::provider::{ContentBlock, LlmProvider, MessageRequest, ProviderResponse, StopReason};
use super::tools::ToolDefinition;
use super::types::{EngineResponse, Round, TokenUsage, ToolCall};
use crate::config::ReasoningConfig;
use crate::errors::{ProviderError, ReasoningError, Result};
use crate::metrics;
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Base instructions for the course materials assistant
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an AI assistant specialized in course materials and educational content with access to comprehensive search and outline tools for course information.

Tool Usage Guidelines:
- **Course Content Search**: Use `search_course_content` for questions about specific course content or detailed educational materials
- **Course Outline**: Use `get_course_outline` for questions about course structure, lesson lists, course overview, or table of contents
- **Multi-round reasoning**: You can make multiple tool calls across rounds to gather comprehensive information
- **Progressive refinement**: If you need additional information after seeing tool results, you can make another tool call in the next round
- Synthesize tool results into accurate, fact-based responses
- If tools yield no results, state this clearly without offering alternatives

Response Protocol:
- **General knowledge questions**: Answer using existing knowledge without tools
- **Course content questions**: Use search tool first, then answer
- **Course outline/structure questions**: Use outline tool first, then answer
- **Complex queries**: Break down into multiple tool calls across rounds if needed
- **No meta-commentary**:
 - Provide direct answers only: no reasoning process, tool explanations, or question-type analysis
 - Do not mention \"based on the search results\" or \"based on the outline\"
 - Do not explain your reasoning process across rounds

All responses must be:
1. **Brief, Concise and focused** - Get to the point quickly
2. **Educational** - Maintain instructional value
3. **Clear** - Use accessible language
4. **Example-supported** - Include relevant examples when they aid understanding
Provide only the direct answer to what was asked.
";

/// Characters per estimated token
const CHARS_PER_TOKEN: u64 = 4;

/// Fixed allowance for tool definitions and protocol overhead
const ESTIMATE_BUFFER_TOKENS: u64 = 200;

/// Trait for executing a single reasoning round
#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    /// Run one provider call for `query`, with the briefing of earlier rounds.
    ///
    /// The returned round has no tool executions; the coordinator fills them in.
    async fn execute_reasoning_round(
        &self,
        query: &str,
        context_briefing: &str,
        tools: &[ToolDefinition],
        round_number: usize,
    ) -> Result<Round>;

    /// Estimate the tokens a round with this briefing and query would consume
    fn estimate_token_usage(&self, context_briefing: &str, query: &str) -> u64;
}

/// Engine backed by an `LlmProvider`
pub struct LlmReasoningEngine {
    provider: Arc<dyn LlmProvider>,
    config: Arc<ReasoningConfig>,
    system_prompt: String,
    temperature: f32,
}

impl LlmReasoningEngine {
    /// Create an engine using the default system prompt
    pub fn new(provider: Arc<dyn LlmProvider>, config: Arc<ReasoningConfig>) -> Self {
        Self {
            provider,
            config,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            temperature: 0.0,
        }
    }

    /// Replace the base instructions
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    fn build_system_content(&self, context_briefing: &str) -> String {
        if context_briefing.is_empty() {
            self.system_prompt.clone()
        } else {
            format!(
                "{}\n\nContext from previous reasoning:\n{}",
                self.system_prompt, context_briefing
            )
        }
    }

    fn build_user_message(query: &str, round_number: usize) -> String {
        if round_number == 0 {
            format!("Answer this question about course materials: {}", query)
        } else {
            format!("Continue working on this question: {}", query)
        }
    }

    /// Call the provider, retrying recoverable errors with exponential backoff.
    async fn call_with_retries(&self, request: &MessageRequest) -> Result<ProviderResponse> {
        let max_attempts = self.config.engine_max_attempts.max(1);
        let attempts = AtomicU32::new(0);

        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.config.engine_retry_base_delay())
            .with_multiplier(2.0)
            .with_randomization_factor(0.0)
            .with_max_interval(Duration::from_secs(60))
            .with_max_elapsed_time(None)
            .build();

        let provider = &self.provider;
        let attempts_ref = &attempts;

        let result = backoff::future::retry_notify(
            policy,
            move || async move {
                let attempt = attempts_ref.fetch_add(1, Ordering::SeqCst) + 1;
                match provider.create_message(request).await {
                    Ok(response) => Ok(response),
                    Err(e) if e.is_recoverable() && attempt < max_attempts => {
                        Err(backoff::Error::transient(e))
                    }
                    Err(e) => Err(backoff::Error::permanent(e)),
                }
            },
            |err: ProviderError, wait: Duration| {
                warn!(
                    attempt = attempts_ref.load(Ordering::SeqCst),
                    max_attempts = max_attempts,
                    wait_ms = wait.as_millis() as u64,
                    error = %err,
                    "Provider call failed, retrying"
                );
                metrics::record_provider_retry();
            },
        )
        .await;

        result.map_err(|source| ReasoningError::Api {
            attempts: attempts.load(Ordering::SeqCst),
            source,
        })
    }

    fn classify(response: &ProviderResponse) -> EngineResponse {
        let calls: Vec<ToolCall> = response
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse { id, name, input } => Some(ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                }),
                ContentBlock::Text { .. } => None,
            })
            .collect();

        if calls.is_empty() {
            EngineResponse::FinalAnswer(response.first_text().unwrap_or_default().to_string())
        } else {
            EngineResponse::ToolRequests(calls)
        }
    }

    fn calculate_token_usage(request: &MessageRequest, response: &ProviderResponse) -> TokenUsage {
        let tools_chars = if request.tools.is_empty() {
            0
        } else {
            serde_json::to_string(&request.tools)
                .map(|s| s.chars().count())
                .unwrap_or(0)
        };
        let input_chars =
            request.system.chars().count() + request.user_message.chars().count() + tools_chars;

        let output_chars: usize = response
            .content
            .iter()
            .map(|block| match block {
                ContentBlock::Text { text } => text.chars().count(),
                ContentBlock::ToolUse { input, .. } => serde_json::to_string(input)
                    .map(|s| s.chars().count())
                    .unwrap_or(0),
            })
            .sum();

        TokenUsage::new(
            input_chars as u64 / CHARS_PER_TOKEN,
            output_chars as u64 / CHARS_PER_TOKEN,
        )
    }
}

#[async_trait]
impl ReasoningEngine for LlmReasoningEngine {
    async fn execute_reasoning_round(
        &self,
        query: &str,
        context_briefing: &str,
        tools: &[ToolDefinition],
        round_number: usize,
    ) -> Result<Round> {
        let start = Instant::now();

        let request = MessageRequest::new(
            self.build_system_content(context_briefing),
            Self::build_user_message(query, round_number),
            self.config.max_tokens_per_round,
        )
        .with_tools(tools.to_vec())
        .with_temperature(self.temperature);

        let response = self.call_with_retries(&request).await?;

        let token_usage = Self::calculate_token_usage(&request, &response);
        let classified = Self::classify(&response);

        // Only a direct answer that actually carries text has final text
        let final_text = match classified {
            EngineResponse::FinalAnswer(_) if response.stop_reason != StopReason::ToolUse => {
                response.first_text().map(str::to_string)
            }
            _ => None,
        };

        debug!(
            round = round_number,
            model = %self.provider.model_name(),
            tool_calls = classified.tool_calls().len(),
            tokens = token_usage.total,
            "Reasoning round executed"
        );

        Ok(Round {
            number: round_number,
            query: query.to_string(),
            response: Some(classified),
            tool_executions: Vec::new(),
            final_text,
            duration: start.elapsed(),
            token_usage,
            error: None,
        })
    }

    fn estimate_token_usage(&self, context_briefing: &str, query: &str) -> u64 {
        let chars = self.system_prompt.chars().count()
            + context_briefing.chars().count()
            + query.chars().count();
        chars as u64 / CHARS_PER_TOKEN + ESTIMATE_BUFFER_TOKENS
    }
}

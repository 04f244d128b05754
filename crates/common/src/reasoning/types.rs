//! Session and round data model
//!
//! Provides:
//! - `Session`, the full reasoning lifecycle of one user query
//! - `Round`, one engine invocation plus its tool consequences
//! - `ToolExecutionResult`, the outcome of one tool invocation
//! - `TerminationReason`, why a session's round loop stopped
//! - `AssembledResponse` and `Source`, the final answer handed to callers

use crate::errors::{ReasoningError, Result, ToolError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Input parameters of a tool call
pub type ToolInput = serde_json::Map<String, Value>;

/// Why a session's round loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// Engine answered directly without requesting tools
    NaturalCompletion,
    MaxRoundsReached,
    ToolFailure,
    ApiError,
    ContextOverflow,
    UserCancellation,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::NaturalCompletion => "natural_completion",
            TerminationReason::MaxRoundsReached => "max_rounds_reached",
            TerminationReason::ToolFailure => "tool_failure",
            TerminationReason::ApiError => "api_error",
            TerminationReason::ContextOverflow => "context_overflow",
            TerminationReason::UserCancellation => "user_cancellation",
        }
    }

    /// Reasons produced by the round and token ceilings
    pub fn is_limit(&self) -> bool {
        matches!(
            self,
            TerminationReason::MaxRoundsReached | TerminationReason::ContextOverflow
        )
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Approximate token usage of one round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub total: u64,
}

impl TokenUsage {
    pub fn new(input: u64, output: u64) -> Self {
        Self {
            input,
            output,
            total: input + output,
        }
    }
}

/// A tool invocation requested by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call identifier
    pub id: String,
    pub name: String,
    pub input: ToolInput,
}

/// The engine's classification of a provider response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum EngineResponse {
    FinalAnswer(String),
    ToolRequests(Vec<ToolCall>),
}

impl EngineResponse {
    /// Tool calls requested by the engine (empty for a direct answer)
    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            EngineResponse::FinalAnswer(_) => &[],
            EngineResponse::ToolRequests(calls) => calls,
        }
    }
}

/// Outcome of one tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecutionResult {
    /// Requested tool name, or `"original (via fallback)"` when a substitute answered
    pub tool_name: String,
    pub tool_input: ToolInput,
    pub success: bool,
    /// Result text, or an error description when the call failed
    pub result: String,
    pub execution_time: Duration,
    pub error: Option<ToolError>,
}

/// One engine invocation plus its tool consequences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Round {
    /// 0-based round index
    pub number: usize,
    pub query: String,
    /// Classified engine output; `None` for a synthetic error round
    pub response: Option<EngineResponse>,
    pub tool_executions: Vec<ToolExecutionResult>,
    /// Present iff the engine took the direct-answer path
    pub final_text: Option<String>,
    pub duration: Duration,
    pub token_usage: TokenUsage,
    /// Failure description for synthetic error rounds
    pub error: Option<String>,
}

impl Round {
    /// Build a synthetic round standing in for a failed engine or dispatcher call.
    pub fn error(number: usize, query: &str, message: impl fmt::Display, duration: Duration) -> Self {
        let message = message.to_string();
        Self {
            number,
            query: query.to_string(),
            response: None,
            tool_executions: Vec::new(),
            final_text: Some(format!("Error in round {}: {}", number, message)),
            duration,
            token_usage: TokenUsage::default(),
            error: Some(message),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Tool calls the engine requested this round
    pub fn tool_calls(&self) -> &[ToolCall] {
        self.response
            .as_ref()
            .map(EngineResponse::tool_calls)
            .unwrap_or(&[])
    }

    pub fn successful_executions(&self) -> impl Iterator<Item = &ToolExecutionResult> {
        self.tool_executions.iter().filter(|e| e.success)
    }
}

/// Insertion-ordered fact mapping; re-inserting a key replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FactSheet {
    entries: Vec<(String, String)>,
}

impl FactSheet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn extend(&mut self, other: FactSheet) {
        for (key, value) in other.entries {
            self.insert(key, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// One entry of the tool usage layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUsageRecord {
    pub round: usize,
    pub tool: String,
    pub input: ToolInput,
    pub success: bool,
    pub duration: Duration,
}

/// Full reasoning lifecycle of one user query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub original_query: String,
    pub rounds: Vec<Round>,

    // Context layers
    pub discovered_facts: FactSheet,
    pub reasoning_trace: Vec<String>,
    pub evolving_intent: String,
    pub tool_usage_history: Vec<ToolUsageRecord>,

    /// Unset while the session is active
    pub termination_reason: Option<TerminationReason>,
    pub total_duration: Duration,
    pub total_tokens: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Create a session; the intent layer is seeded with the raw query.
    pub fn new(id: impl Into<String>, query: &str) -> Self {
        Self {
            id: id.into(),
            original_query: query.to_string(),
            rounds: Vec::new(),
            discovered_facts: FactSheet::new(),
            reasoning_trace: Vec::new(),
            evolving_intent: query.to_string(),
            tool_usage_history: Vec::new(),
            termination_reason: None,
            total_duration: Duration::ZERO,
            total_tokens: 0,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.termination_reason.is_none()
    }

    pub fn last_round(&self) -> Option<&Round> {
        self.rounds.last()
    }

    /// Append a completed round and accumulate its token usage.
    ///
    /// Rounds must arrive in order and never beyond `max_rounds`.
    pub fn record_round(&mut self, round: Round, max_rounds: usize) -> Result<()> {
        if round.number != self.rounds.len() {
            return Err(ReasoningError::SessionState {
                message: format!(
                    "round {} recorded out of order (expected {})",
                    round.number,
                    self.rounds.len()
                ),
            });
        }
        if self.rounds.len() >= max_rounds {
            return Err(ReasoningError::RoundLimit { max_rounds });
        }

        self.total_tokens += round.token_usage.total;
        self.rounds.push(round);
        Ok(())
    }

    /// Stamp the termination reason and completion time.
    pub fn finish(&mut self, reason: TerminationReason, total_duration: Duration) {
        self.termination_reason = Some(reason);
        self.total_duration = total_duration;
        self.completed_at = Some(Utc::now());
    }
}

/// A de-duplicated citation extracted from search results
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Source {
    pub text: String,
    pub url: Option<String>,
}

impl Source {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            url: None,
        }
    }

    /// Deduplication key: display text plus URL, with a stable placeholder for a missing URL
    pub fn dedup_key(&self) -> (String, String) {
        (
            self.text.clone(),
            self.url.clone().unwrap_or_else(|| "no_url".to_string()),
        )
    }
}

/// Final answer text plus its sources
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssembledResponse {
    pub text: String,
    pub sources: Vec<Source>,
}

impl AssembledResponse {
    pub fn new(text: impl Into<String>, sources: Vec<Source>) -> Self {
        Self {
            text: text.into(),
            sources,
        }
    }

    /// A response carrying no sources
    pub fn text_only(text: impl Into<String>) -> Self {
        Self::new(text, Vec::new())
    }
}

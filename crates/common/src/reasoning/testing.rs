//! Scripted collaborators for unit tests

use super::provider::{ContentBlock, LlmProvider, MessageRequest, ProviderResponse, StopReason};
use super::tools::ToolRegistry;
use super::types::ToolInput;
use crate::errors::{ProviderError, ToolError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// Provider answering from a fixed queue of responses
pub(crate) struct ScriptedProvider {
    responses: Mutex<VecDeque<Result<ProviderResponse, ProviderError>>>,
    requests: Mutex<Vec<MessageRequest>>,
    delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<Result<ProviderResponse, ProviderError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Sleep before every answer
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<MessageRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn create_message(&self, request: &MessageRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::Other("script exhausted".into())))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// A direct text answer
pub(crate) fn text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        content: vec![ContentBlock::Text { text: text.to_string() }],
        stop_reason: StopReason::EndTurn,
    }
}

/// A response requesting the given tools, in order
pub(crate) fn tool_response(calls: Vec<(&str, Value)>) -> ProviderResponse {
    let content = calls
        .into_iter()
        .enumerate()
        .map(|(i, (name, input))| ContentBlock::ToolUse {
            id: format!("toolu_{:02}", i),
            name: name.to_string(),
            input: input.as_object().cloned().unwrap_or_default(),
        })
        .collect();
    ProviderResponse {
        content,
        stop_reason: StopReason::ToolUse,
    }
}

/// Convert a JSON object literal into tool input
pub(crate) fn input(value: Value) -> ToolInput {
    value.as_object().cloned().unwrap_or_default()
}

/// Registry answering from per-tool queues; the last scripted answer repeats
#[derive(Default)]
pub(crate) struct ScriptedRegistry {
    scripts: Mutex<HashMap<String, VecDeque<Result<String, ToolError>>>>,
    calls: Mutex<Vec<(String, ToolInput)>>,
}

impl ScriptedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, tool: &str, results: Vec<Result<String, ToolError>>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(tool.to_string(), results.into());
        self
    }

    /// Names of the tools executed, in call order
    pub fn call_names(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn calls(&self) -> Vec<(String, ToolInput)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolRegistry for ScriptedRegistry {
    async fn execute(&self, name: &str, input: &ToolInput) -> Result<String, ToolError> {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), input.clone()));

        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(name) {
            Some(queue) if queue.len() > 1 => queue
                .pop_front()
                .unwrap_or_else(|| Err(ToolError::NotFound(name.to_string()))),
            Some(queue) => queue
                .front()
                .cloned()
                .unwrap_or_else(|| Err(ToolError::NotFound(name.to_string()))),
            None => Err(ToolError::NotFound(name.to_string())),
        }
    }
}

//! Tool Dispatcher - Executes requested tool calls
//!
//! Provides:
//! - Sequential execution against a `ToolRegistry`
//! - Linear-backoff retries for transient tool errors
//! - Fallback substitution with adapted inputs
//! - Execution counters with derived rates

use super::tools::{ToolRegistry, GET_COURSE_OUTLINE, SEARCH_COURSE_CONTENT};
use super::types::{ToolCall, ToolExecutionResult, ToolInput};
use crate::config::ReasoningConfig;
use crate::errors::{Result, ToolError};
use crate::metrics;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Result prefixes a registry uses to report failure without raising
const FAILURE_PREFIXES: &[&str] = &["Error", "No"];

const RETRYABLE_MARKERS: &[&str] = &["timeout", "connection", "network", "temporary", "rate limit"];

const NON_RETRYABLE_MARKERS: &[&str] = &["not found", "invalid", "permission", "authentication"];

/// Snapshot of dispatcher counters.
///
/// Rates are `None` until at least one execution has been recorded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub fallback_used: u64,
    pub retry_attempts: u64,
    pub success_rate: Option<f64>,
    pub failure_rate: Option<f64>,
    pub fallback_rate: Option<f64>,
    pub retry_rate: Option<f64>,
}

/// Trait for tool dispatch
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    /// Execute calls in request order; tool-level failures become failed results.
    async fn execute_tools(
        &self,
        tool_calls: &[ToolCall],
        session_id: &str,
        round_number: usize,
    ) -> Result<Vec<ToolExecutionResult>>;

    /// Alternative tools to try, in order, when `tool_name` fails
    fn get_fallback_tools(&self, tool_name: &str) -> Vec<String>;

    /// Whether a raised error is worth retrying
    fn can_retry_tool(&self, tool_name: &str, error: &ToolError) -> bool;

    fn get_execution_metrics(&self) -> ExecutionMetrics;

    fn reset_metrics(&self);
}

#[derive(Default)]
struct Counters {
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    fallback_used: AtomicU64,
    retry_attempts: AtomicU64,
}

/// Dispatcher backed by a `ToolRegistry`
pub struct RegistryToolDispatcher {
    registry: Arc<dyn ToolRegistry>,
    config: Arc<ReasoningConfig>,
    fallbacks: HashMap<String, Vec<String>>,
    counters: Counters,
}

impl RegistryToolDispatcher {
    /// Create a dispatcher with the course tool fallback table
    pub fn new(registry: Arc<dyn ToolRegistry>, config: Arc<ReasoningConfig>) -> Self {
        let mut fallbacks = HashMap::new();
        fallbacks.insert(
            SEARCH_COURSE_CONTENT.to_string(),
            vec![GET_COURSE_OUTLINE.to_string()],
        );
        fallbacks.insert(
            GET_COURSE_OUTLINE.to_string(),
            vec![SEARCH_COURSE_CONTENT.to_string()],
        );

        Self {
            registry,
            config,
            fallbacks,
            counters: Counters::default(),
        }
    }

    /// Register `fallback` as the next alternative for `tool`
    pub fn with_fallback(mut self, tool: &str, fallback: &str) -> Self {
        self.fallbacks
            .entry(tool.to_string())
            .or_default()
            .push(fallback.to_string());
        self
    }

    async fn execute_single_tool(
        &self,
        call: &ToolCall,
        session_id: &str,
        round_number: usize,
    ) -> ToolExecutionResult {
        let start = Instant::now();
        self.counters.total.fetch_add(1, Ordering::Relaxed);

        let mut result = self.try_tool_execution(&call.name, &call.input).await;

        if !result.success && self.config.enable_tool_fallbacks {
            for fallback in self.get_fallback_tools(&call.name) {
                let adapted = adapt_input_for_tool(&fallback, &call.input);
                let fallback_result = self.try_tool_execution(&fallback, &adapted).await;

                if fallback_result.success {
                    info!(
                        session_id = %session_id,
                        round = round_number,
                        tool = %call.name,
                        fallback = %fallback,
                        "Tool satisfied by fallback"
                    );
                    self.counters.fallback_used.fetch_add(1, Ordering::Relaxed);
                    metrics::record_tool_fallback(&call.name);

                    result = ToolExecutionResult {
                        tool_name: format!("{} (via {})", call.name, fallback),
                        tool_input: call.input.clone(),
                        success: true,
                        result: fallback_result.result,
                        execution_time: start.elapsed(),
                        error: None,
                    };
                    break;
                }
            }
        }

        if result.success {
            self.counters.successful.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            warn!(
                session_id = %session_id,
                round = round_number,
                tool = %call.name,
                result = %result.result,
                "Tool execution failed"
            );
        }
        metrics::record_tool_execution(&call.name, result.success);

        result
    }

    /// Run one tool, retrying raised transient errors.
    async fn try_tool_execution(&self, tool_name: &str, input: &ToolInput) -> ToolExecutionResult {
        let max_retries = self.config.tool_max_retries;
        let mut attempt = 0u32;

        loop {
            let start = Instant::now();
            match self.registry.execute(tool_name, input).await {
                Ok(text) => {
                    let success = !text.is_empty()
                        && !FAILURE_PREFIXES.iter().any(|p| text.starts_with(p));
                    let result = if text.is_empty() {
                        "No results found".to_string()
                    } else {
                        text
                    };
                    return ToolExecutionResult {
                        tool_name: tool_name.to_string(),
                        tool_input: input.clone(),
                        success,
                        result,
                        execution_time: start.elapsed(),
                        error: None,
                    };
                }
                Err(err) => {
                    if attempt < max_retries && self.can_retry_tool(tool_name, &err) {
                        attempt += 1;
                        self.counters.retry_attempts.fetch_add(1, Ordering::Relaxed);
                        metrics::record_tool_retry(tool_name);

                        let delay = self.config.tool_retry_delay() * attempt;
                        debug!(
                            tool = %tool_name,
                            attempt = attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "Retrying tool"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    return ToolExecutionResult {
                        tool_name: tool_name.to_string(),
                        tool_input: input.clone(),
                        success: false,
                        result: format!("Tool execution failed: {}", err),
                        execution_time: start.elapsed(),
                        error: Some(err),
                    };
                }
            }
        }
    }
}

#[async_trait]
impl ToolDispatcher for RegistryToolDispatcher {
    async fn execute_tools(
        &self,
        tool_calls: &[ToolCall],
        session_id: &str,
        round_number: usize,
    ) -> Result<Vec<ToolExecutionResult>> {
        let mut results = Vec::with_capacity(tool_calls.len());
        for call in tool_calls {
            results.push(self.execute_single_tool(call, session_id, round_number).await);
        }
        Ok(results)
    }

    fn get_fallback_tools(&self, tool_name: &str) -> Vec<String> {
        self.fallbacks.get(tool_name).cloned().unwrap_or_default()
    }

    fn can_retry_tool(&self, _tool_name: &str, error: &ToolError) -> bool {
        let message = error.to_string().to_lowercase();

        if RETRYABLE_MARKERS.iter().any(|m| message.contains(m)) {
            return true;
        }
        if NON_RETRYABLE_MARKERS.iter().any(|m| message.contains(m)) {
            return false;
        }
        true
    }

    fn get_execution_metrics(&self) -> ExecutionMetrics {
        let total = self.counters.total.load(Ordering::Relaxed);
        let successful = self.counters.successful.load(Ordering::Relaxed);
        let failed = self.counters.failed.load(Ordering::Relaxed);
        let fallback_used = self.counters.fallback_used.load(Ordering::Relaxed);
        let retry_attempts = self.counters.retry_attempts.load(Ordering::Relaxed);

        let rate = |n: u64| (total > 0).then(|| n as f64 / total as f64);

        ExecutionMetrics {
            total_executions: total,
            successful_executions: successful,
            failed_executions: failed,
            fallback_used,
            retry_attempts,
            success_rate: rate(successful),
            failure_rate: rate(failed),
            fallback_rate: rate(fallback_used),
            retry_rate: rate(retry_attempts),
        }
    }

    fn reset_metrics(&self) {
        self.counters.total.store(0, Ordering::Relaxed);
        self.counters.successful.store(0, Ordering::Relaxed);
        self.counters.failed.store(0, Ordering::Relaxed);
        self.counters.fallback_used.store(0, Ordering::Relaxed);
        self.counters.retry_attempts.store(0, Ordering::Relaxed);
    }
}

/// Reshape tool input for the tool that will actually run
fn adapt_input_for_tool(tool_name: &str, original: &ToolInput) -> ToolInput {
    match tool_name {
        GET_COURSE_OUTLINE => {
            if let Some(course) = original.get("course_name") {
                return single_field("course_name", course.clone());
            }
            let query = original.get("query").and_then(Value::as_str).unwrap_or_default();
            let course = extract_course_name(query);
            if !course.is_empty() {
                return single_field("course_name", Value::String(course));
            }
        }
        SEARCH_COURSE_CONTENT => {
            if let Some(course) = original.get("course_name").filter(|_| !original.contains_key("query")) {
                let course_text = course
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| course.to_string());
                let mut adapted = single_field("query", Value::String(format!("overview of {}", course_text)));
                adapted.insert("course_name".to_string(), course.clone());
                return adapted;
            }
        }
        _ => {}
    }
    original.clone()
}

fn single_field(key: &str, value: Value) -> ToolInput {
    let mut input = ToolInput::new();
    input.insert(key.to_string(), value);
    input
}

/// Longest run of capitalized words in `query`; the first run wins ties.
fn extract_course_name(query: &str) -> String {
    let mut best = String::new();
    let mut current: Vec<&str> = Vec::new();

    for word in query.split_whitespace() {
        if word.chars().next().is_some_and(char::is_uppercase) {
            current.push(word);
        } else {
            keep_longer(&mut best, &mut current);
        }
    }
    keep_longer(&mut best, &mut current);

    best
}

fn keep_longer(best: &mut String, run: &mut Vec<&str>) {
    if run.is_empty() {
        return;
    }
    let candidate = run.join(" ");
    if candidate.chars().count() > best.chars().count() {
        *best = candidate;
    }
    run.clear();
}

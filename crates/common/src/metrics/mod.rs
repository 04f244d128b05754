//! Metrics and observability utilities
//!
//! Provides Prometheus metrics for reasoning sessions, rounds and tool
//! executions with standardized naming conventions.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::{Duration, Instant};

/// Metrics prefix for all CourseMind metrics
pub const METRICS_PREFIX: &str = "coursemind";

/// Histogram buckets for round latency (in seconds).
/// A round is dominated by one LLM call plus sequential tool calls.
pub const ROUND_BUCKETS: &[f64] = &[
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.000,  // 2s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
    60.00,  // 60s
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Session metrics
    describe_counter!(
        format!("{}_sessions_total", METRICS_PREFIX),
        Unit::Count,
        "Total reasoning sessions by termination reason"
    );

    describe_histogram!(
        format!("{}_session_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Reasoning session wall-clock duration in seconds"
    );

    describe_histogram!(
        format!("{}_session_tokens", METRICS_PREFIX),
        Unit::Count,
        "Estimated tokens consumed per session"
    );

    // Round metrics
    describe_counter!(
        format!("{}_rounds_total", METRICS_PREFIX),
        Unit::Count,
        "Total reasoning rounds by outcome"
    );

    describe_histogram!(
        format!("{}_round_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Reasoning round latency in seconds"
    );

    // Tool metrics
    describe_counter!(
        format!("{}_tool_executions_total", METRICS_PREFIX),
        Unit::Count,
        "Total tool executions by tool and status"
    );

    describe_counter!(
        format!("{}_tool_fallbacks_total", METRICS_PREFIX),
        Unit::Count,
        "Tool calls satisfied by a fallback tool"
    );

    describe_counter!(
        format!("{}_tool_retries_total", METRICS_PREFIX),
        Unit::Count,
        "Tool retry attempts after a raised error"
    );

    // Provider metrics
    describe_counter!(
        format!("{}_provider_retries_total", METRICS_PREFIX),
        Unit::Count,
        "LLM provider calls retried after a recoverable error"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record round metrics
pub struct RoundMetrics {
    start: Instant,
}

impl RoundMetrics {
    /// Start tracking a round
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Record round completion; returns the measured duration
    pub fn finish(self, outcome: &str) -> Duration {
        let duration = self.start.elapsed();

        counter!(
            format!("{}_rounds_total", METRICS_PREFIX),
            "outcome" => outcome.to_string()
        )
        .increment(1);

        histogram!(format!("{}_round_duration_seconds", METRICS_PREFIX))
            .record(duration.as_secs_f64());

        duration
    }
}

/// Helper to record a finished session
pub fn record_session(reason: &str, duration_secs: f64, total_tokens: u64) {
    counter!(
        format!("{}_sessions_total", METRICS_PREFIX),
        "reason" => reason.to_string()
    )
    .increment(1);

    histogram!(format!("{}_session_duration_seconds", METRICS_PREFIX)).record(duration_secs);

    histogram!(format!("{}_session_tokens", METRICS_PREFIX)).record(total_tokens as f64);
}

/// Helper to record one tool execution result
pub fn record_tool_execution(tool: &str, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_tool_executions_total", METRICS_PREFIX),
        "tool" => tool.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_tool_fallback(tool: &str) {
    counter!(
        format!("{}_tool_fallbacks_total", METRICS_PREFIX),
        "tool" => tool.to_string()
    )
    .increment(1);
}

pub fn record_tool_retry(tool: &str) {
    counter!(
        format!("{}_tool_retries_total", METRICS_PREFIX),
        "tool" => tool.to_string()
    )
    .increment(1);
}

pub fn record_provider_retry() {
    counter!(format!("{}_provider_retries_total", METRICS_PREFIX)).increment(1);
}

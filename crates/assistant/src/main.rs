//! CourseMind Assistant
//!
//! Command-line entry point for the reasoning core.
//! Handles:
//! - Configuration and logging setup
//! - Optional Prometheus metrics endpoint
//! - Answering a question from the arguments, or one per stdin line

use coursemind_common::{
    config::AppConfig,
    llm::AnthropicProvider,
    metrics,
    CourseAssistant,
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Runs the assistant on the direct path only. Hosts with a course search
/// backend get multi-round reasoning by calling `CourseAssistant::with_tools`.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load configuration
    dotenvy::dotenv().ok();
    let config = AppConfig::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;

    // 2. Setup logging
    let filter = EnvFilter::new(&config.observability.log_level);
    if config.observability.json_logging {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }

    info!(
        service = %config.observability.service_name,
        "Starting CourseMind Assistant v{}",
        coursemind_common::VERSION
    );

    // 3. Metrics
    if config.observability.metrics_port != 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .set_buckets_for_metric(
                Matcher::Full(format!("{}_round_duration_seconds", metrics::METRICS_PREFIX)),
                metrics::ROUND_BUCKETS,
            )?
            .install()?;
        info!("Metrics exposed on {}", addr);
    }
    metrics::register_metrics();

    // 4. Assistant (no tool registry here, so every query takes the direct path)
    let provider = Arc::new(AnthropicProvider::new(&config.llm)?);
    let assistant = CourseAssistant::new(provider, Arc::new(config.reasoning.clone()))
        .with_temperature(config.llm.temperature);

    // 5. Answer
    let question = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if !question.trim().is_empty() {
        println!("{}", assistant.generate(&question, None).await);
        return Ok(());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        println!("{}", assistant.generate(query, None).await);
    }

    info!("Assistant shutdown complete");
    Ok(())
}

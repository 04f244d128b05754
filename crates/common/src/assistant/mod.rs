//! Course Assistant - Entry point for answering questions
//!
//! Provides:
//! - `Responder`, one strategy for turning a query into an answer
//! - `DirectResponder`, a single tool-less provider call
//! - `MultiRoundResponder`, the coordinator loop bounded by a wall-clock timeout
//! - `CourseAssistant`, which picks the strategy and falls back on failure

use crate::config::ReasoningConfig;
use crate::errors::{ReasoningError, Result};
use crate::reasoning::assembler::StandardResponseAssembler;
use crate::reasoning::coordinator::{ReasoningCoordinator, SessionMetrics};
use crate::reasoning::dispatcher::{ExecutionMetrics, RegistryToolDispatcher};
use crate::reasoning::engine::{LlmReasoningEngine, DEFAULT_SYSTEM_PROMPT};
use crate::reasoning::provider::{LlmProvider, MessageRequest};
use crate::reasoning::synthesizer::LayeredContextSynthesizer;
use crate::reasoning::tools::ToolRegistry;
use crate::reasoning::types::{AssembledResponse, Session, TerminationReason};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Returned by `generate` when no path produced an answer
pub const TECHNICAL_DIFFICULTIES: &str =
    "I'm experiencing technical difficulties right now. Please try again in a moment.";

/// Returned by the direct path when the model sent no text
pub const EMPTY_RESPONSE: &str = "I couldn't generate a response.";

/// Strategy for answering a single query
#[async_trait]
pub trait Responder: Send + Sync {
    async fn respond(&self, query: &str, session_id: Option<&str>) -> Result<AssembledResponse>;
}

/// One provider call without tools
pub struct DirectResponder {
    provider: Arc<dyn LlmProvider>,
    system_prompt: String,
    max_tokens: u32,
    temperature: f32,
}

impl DirectResponder {
    pub fn new(provider: Arc<dyn LlmProvider>, max_tokens: u32) -> Self {
        Self {
            provider,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_tokens,
            temperature: 0.0,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Answer `query`, with prior conversation appended to the system prompt
    pub async fn answer(&self, query: &str, history: Option<&str>) -> Result<String> {
        let system = match history.filter(|h| !h.trim().is_empty()) {
            Some(history) => format!("{}\n\nPrevious conversation:\n{}", self.system_prompt, history),
            None => self.system_prompt.clone(),
        };

        let request = MessageRequest::new(system, query, self.max_tokens).with_temperature(self.temperature);
        let response = self.provider.create_message(&request).await?;

        Ok(response
            .first_text()
            .map(str::to_string)
            .unwrap_or_else(|| EMPTY_RESPONSE.to_string()))
    }
}

#[async_trait]
impl Responder for DirectResponder {
    async fn respond(&self, query: &str, _session_id: Option<&str>) -> Result<AssembledResponse> {
        self.answer(query, None).await.map(AssembledResponse::text_only)
    }
}

/// Multi-round reasoning bounded by `reasoning_timeout_secs`
pub struct MultiRoundResponder {
    coordinator: Arc<ReasoningCoordinator>,
    timeout: Duration,
}

impl MultiRoundResponder {
    pub fn new(coordinator: Arc<ReasoningCoordinator>) -> Self {
        let timeout = coordinator.config().reasoning_timeout();
        Self { coordinator, timeout }
    }

    pub fn coordinator(&self) -> &Arc<ReasoningCoordinator> {
        &self.coordinator
    }
}

#[async_trait]
impl Responder for MultiRoundResponder {
    async fn respond(&self, query: &str, session_id: Option<&str>) -> Result<AssembledResponse> {
        // The id is fixed up front so a timed-out session can be terminated
        let session_id = session_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let start = Instant::now();

        match tokio::time::timeout(self.timeout, self.coordinator.process_query(query, Some(&session_id))).await {
            Ok(outcome) => {
                let session = outcome?;
                Ok(self.coordinator.assemble_response(&session))
            }
            Err(_) => {
                let elapsed_ms = start.elapsed().as_millis() as u64;
                warn!(session_id = %session_id, elapsed_ms, "Reasoning timed out");
                self.coordinator
                    .terminate_session(&session_id, TerminationReason::UserCancellation);
                Err(ReasoningError::Timeout { elapsed_ms })
            }
        }
    }
}

/// Question-answering facade over the direct and multi-round paths.
///
/// The multi-round path is used iff a tool registry was supplied.
pub struct CourseAssistant {
    provider: Arc<dyn LlmProvider>,
    config: Arc<ReasoningConfig>,
    temperature: f32,
    registry: Option<Arc<dyn ToolRegistry>>,
    direct: DirectResponder,
    multi_round: Option<MultiRoundResponder>,
}

impl CourseAssistant {
    pub fn new(provider: Arc<dyn LlmProvider>, config: Arc<ReasoningConfig>) -> Self {
        let direct = DirectResponder::new(provider.clone(), config.max_tokens_per_round);
        Self {
            provider,
            config,
            temperature: 0.0,
            registry: None,
            direct,
            multi_round: None,
        }
    }

    /// Sampling temperature for both paths
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self.rebuild();
        self
    }

    /// Enable multi-round reasoning over `registry`
    pub fn with_tools(mut self, registry: Arc<dyn ToolRegistry>) -> Self {
        self.registry = Some(registry);
        self.rebuild();
        self
    }

    /// Rebuild both responders from the current settings
    fn rebuild(&mut self) {
        self.direct = DirectResponder::new(self.provider.clone(), self.config.max_tokens_per_round)
            .with_temperature(self.temperature);
        self.multi_round = self
            .registry
            .clone()
            .map(|registry| MultiRoundResponder::new(Arc::new(self.build_coordinator(registry))));
    }

    fn build_coordinator(&self, registry: Arc<dyn ToolRegistry>) -> ReasoningCoordinator {
        let config = self.config.clone();
        let catalog = registry.definitions();
        let engine = LlmReasoningEngine::new(self.provider.clone(), config.clone())
            .with_temperature(self.temperature);

        ReasoningCoordinator::new(
            Arc::new(engine),
            Arc::new(LayeredContextSynthesizer::new(config.clone())),
            Arc::new(RegistryToolDispatcher::new(registry, config.clone())),
            Arc::new(StandardResponseAssembler::new(config.clone())),
            config,
        )
        .with_tools(catalog)
    }

    pub fn is_multi_round(&self) -> bool {
        self.multi_round.is_some()
    }

    pub fn config(&self) -> &ReasoningConfig {
        &self.config
    }

    /// Answer a query as plain text. Never fails.
    ///
    /// Multi-round failures fall back to the direct path. `history` is only
    /// used by the direct path.
    pub async fn generate(&self, query: &str, history: Option<&str>) -> String {
        if let Some(multi_round) = &self.multi_round {
            match multi_round.respond(query, None).await {
                Ok(response) => return response.text,
                Err(e) => {
                    error!(error = %e, code = e.code().as_code(), "Multi-round reasoning failed, answering directly");
                }
            }
        }

        match self.direct.answer(query, history).await {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, code = e.code().as_code(), "Direct response failed");
                TECHNICAL_DIFFICULTIES.to_string()
            }
        }
    }

    /// Answer a query with its sources
    pub async fn generate_with_sources(&self, query: &str, session_id: Option<&str>) -> Result<AssembledResponse> {
        match &self.multi_round {
            Some(multi_round) => multi_round.respond(query, session_id).await,
            None => {
                info!("No tools configured, answering directly");
                self.direct.respond(query, session_id).await
            }
        }
    }

    pub fn get_session(&self, session_id: &str) -> Option<Session> {
        self.multi_round
            .as_ref()
            .and_then(|m| m.coordinator().get_session(session_id))
    }

    /// Stop an in-flight session; false when it is not active
    pub fn terminate_session(&self, session_id: &str, reason: TerminationReason) -> bool {
        self.multi_round
            .as_ref()
            .map(|m| m.coordinator().terminate_session(session_id, reason))
            .unwrap_or(false)
    }

    pub fn session_metrics(&self) -> SessionMetrics {
        self.multi_round
            .as_ref()
            .map(|m| m.coordinator().get_session_metrics())
            .unwrap_or_default()
    }

    pub fn tool_metrics(&self) -> Option<ExecutionMetrics> {
        self.multi_round
            .as_ref()
            .map(|m| m.coordinator().dispatcher().get_execution_metrics())
    }

    pub fn reset_metrics(&self) {
        if let Some(multi_round) = &self.multi_round {
            multi_round.coordinator().dispatcher().reset_metrics();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ProviderError;
    use crate::reasoning::testing::{text_response, tool_response, ScriptedProvider, ScriptedRegistry};
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    fn config() -> Arc<ReasoningConfig> {
        Arc::new(ReasoningConfig {
            max_total_tokens: 100_000,
            engine_max_attempts: 1,
            engine_retry_base_delay_ms: 1,
            tool_retry_delay_ms: 1,
            ..ReasoningConfig::default()
        })
    }

    fn registry() -> Arc<ScriptedRegistry> {
        Arc::new(ScriptedRegistry::new().on(
            "search_course_content",
            vec![Ok("[Intro to Rust - Lesson 2] Ownership moves values.".into())],
        ))
    }

    #[tokio::test]
    async fn test_direct_path_without_tools() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(text_response("Hello there"))]));
        let assistant = CourseAssistant::new(provider.clone(), config());
        assert!(!assistant.is_multi_round());

        let text = assistant.generate("Hi", Some("User: earlier\nAssistant: reply")).await;
        assert_eq!(text, "Hello there");

        let request = &provider.requests()[0];
        assert!(request.tools.is_empty());
        assert_eq!(request.user_message, "Hi");
        assert!(request.system.ends_with("Previous conversation:\nUser: earlier\nAssistant: reply"));

        assert!(assistant.tool_metrics().is_none());
        assert_eq!(assistant.session_metrics(), SessionMetrics::default());
    }

    #[tokio::test]
    async fn test_multi_round_answer_with_sources() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(tool_response(vec![("search_course_content", json!({"query": "ownership"}))])),
            Ok(text_response("Ownership moves values between bindings.")),
        ]));
        let assistant = CourseAssistant::new(provider, config()).with_tools(registry());
        assert!(assistant.is_multi_round());

        let response = assert_ok!(assistant.generate_with_sources("What is ownership?", Some("s-1")).await);
        assert_eq!(response.text, "Ownership moves values between bindings.");
        assert_eq!(response.sources.len(), 1);
        assert_eq!(response.sources[0].text, "Intro to Rust - Lesson 2");

        let session = assistant.get_session("s-1").unwrap();
        assert_eq!(session.termination_reason, Some(TerminationReason::NaturalCompletion));
        assert_eq!(assistant.tool_metrics().unwrap().successful_executions, 1);

        assistant.reset_metrics();
        assert_eq!(assistant.tool_metrics().unwrap().total_executions, 0);
        assert!(!assistant.terminate_session("s-1", TerminationReason::UserCancellation));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_terminates_session() {
        let config = Arc::new(ReasoningConfig {
            reasoning_timeout_secs: 1,
            ..(*config()).clone()
        });
        let provider = Arc::new(
            ScriptedProvider::new(vec![Ok(text_response("too slow"))]).with_delay(Duration::from_secs(5)),
        );
        let assistant = CourseAssistant::new(provider, config).with_tools(registry());

        let err = assert_err!(assistant.generate_with_sources("Question", Some("slow")).await);
        assert!(matches!(err, ReasoningError::Timeout { .. }));

        let session = assistant.get_session("slow").unwrap();
        assert_eq!(session.termination_reason, Some(TerminationReason::UserCancellation));
        assert_eq!(assistant.session_metrics().active_sessions, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generate_uses_direct_path_after_timeout() {
        let config = Arc::new(ReasoningConfig {
            reasoning_timeout_secs: 1,
            ..(*config()).clone()
        });
        // The timed-out call never consumes its scripted answer
        let provider = Arc::new(
            ScriptedProvider::new(vec![Ok(text_response("direct answer"))]).with_delay(Duration::from_secs(2)),
        );
        let assistant = CourseAssistant::new(provider.clone(), config).with_tools(registry());

        let text = assistant.generate("Question", None).await;
        assert_eq!(text, "direct answer");
        assert_eq!(provider.call_count(), 2);
        assert!(provider.requests()[1].tools.is_empty());
    }

    #[tokio::test]
    async fn test_temperature_applies_in_either_builder_order() {
        for tools_first in [true, false] {
            let provider = Arc::new(ScriptedProvider::new(vec![
                Ok(text_response("multi-round answer")),
                Ok(text_response("direct answer")),
            ]));
            let assistant = CourseAssistant::new(provider.clone(), config());
            let assistant = if tools_first {
                assistant.with_tools(registry()).with_temperature(0.7)
            } else {
                assistant.with_temperature(0.7).with_tools(registry())
            };
            assert!(assistant.is_multi_round());

            assert_eq!(assistant.generate("Question", None).await, "multi-round answer");
            assert_eq!(assistant.direct.answer("Question", None).await.unwrap(), "direct answer");

            let requests = provider.requests();
            assert_eq!(requests.len(), 2);
            assert!(!requests[0].tools.is_empty());
            assert!(requests.iter().all(|r| r.temperature == 0.7));
        }
    }

    #[tokio::test]
    async fn test_generate_reports_technical_difficulties() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(ProviderError::Other("boom".into())),
            Err(ProviderError::Other("boom".into())),
        ]));
        let assistant = CourseAssistant::new(provider, config());

        assert_eq!(assistant.generate("Question", None).await, TECHNICAL_DIFFICULTIES);
        let err = assert_err!(assistant.generate_with_sources("Question", None).await);
        assert!(matches!(err, ReasoningError::Provider(_)));
    }
}

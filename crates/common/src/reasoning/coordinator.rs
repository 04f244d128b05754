//! Reasoning Coordinator - Drives the multi-round loop
//!
//! Provides:
//! - Session lifecycle over shared active/completed registries
//! - The round loop: engine, tool dispatch, context update, limit checks
//! - External termination of in-flight sessions
//! - Aggregate session metrics
//!
//! Per-round failures become synthetic error rounds. Only failures escaping
//! the loop itself end a session with `ApiError` and reach the caller.

use super::assembler::{ResponseAssembler, StandardResponseAssembler};
use super::dispatcher::{RegistryToolDispatcher, ToolDispatcher};
use super::engine::{LlmReasoningEngine, ReasoningEngine};
use super::provider::LlmProvider;
use super::synthesizer::{trace_entry, ContextSynthesizer, LayeredContextSynthesizer};
use super::tools::{course_tool_catalog, ToolDefinition, ToolRegistry};
use super::types::{AssembledResponse, Round, Session, TerminationReason, ToolUsageRecord};
use crate::config::ReasoningConfig;
use crate::errors::{ReasoningError, Result};
use crate::metrics::{self, RoundMetrics};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Aggregate counters over all sessions handled by one coordinator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub total_sessions: u64,
    pub successful_completions: u64,
    /// Sessions stopped by the round or token ceiling
    pub early_terminations: u64,
    pub error_terminations: u64,
    pub active_sessions: usize,
    pub completed_sessions: usize,
}

#[derive(Default)]
struct SessionRegistry {
    active: HashMap<String, Session>,
    completed: HashMap<String, Session>,
    total: u64,
    successful: u64,
    early: u64,
    errors: u64,
}

impl SessionRegistry {
    /// Move a finished session into the completed set and count it
    fn complete(&mut self, session: Session) {
        self.active.remove(&session.id);

        match session.termination_reason {
            Some(TerminationReason::NaturalCompletion) => self.successful += 1,
            Some(reason) if reason.is_limit() => self.early += 1,
            _ => self.errors += 1,
        }

        metrics::record_session(
            session
                .termination_reason
                .map(|r| r.as_str())
                .unwrap_or("unknown"),
            session.total_duration.as_secs_f64(),
            session.total_tokens,
        );

        self.completed.insert(session.id.clone(), session);
    }

    /// Whether `session` (this run of it, not an older one with the same id) is still active
    fn owns(&self, session: &Session) -> bool {
        self.active
            .get(&session.id)
            .is_some_and(|active| active.started_at == session.started_at)
    }
}

/// How the round loop ended
enum LoopExit {
    Finished(TerminationReason),
    /// The session was terminated from outside while the loop was running
    Terminated,
}

/// Top-level coordinator of reasoning sessions
pub struct ReasoningCoordinator {
    engine: Arc<dyn ReasoningEngine>,
    synthesizer: Arc<dyn ContextSynthesizer>,
    dispatcher: Arc<dyn ToolDispatcher>,
    assembler: Arc<dyn ResponseAssembler>,
    config: Arc<ReasoningConfig>,
    tools: Vec<ToolDefinition>,
    registry: RwLock<SessionRegistry>,
}

impl ReasoningCoordinator {
    /// Create a coordinator from its components, using the course tool catalog
    pub fn new(
        engine: Arc<dyn ReasoningEngine>,
        synthesizer: Arc<dyn ContextSynthesizer>,
        dispatcher: Arc<dyn ToolDispatcher>,
        assembler: Arc<dyn ResponseAssembler>,
        config: Arc<ReasoningConfig>,
    ) -> Self {
        Self {
            engine,
            synthesizer,
            dispatcher,
            assembler,
            config,
            tools: course_tool_catalog(),
            registry: RwLock::new(SessionRegistry::default()),
        }
    }

    /// Coordinator wired with the standard component implementations
    pub fn standard(
        provider: Arc<dyn LlmProvider>,
        tools: Arc<dyn ToolRegistry>,
        config: Arc<ReasoningConfig>,
    ) -> Self {
        let catalog = tools.definitions();
        Self::new(
            Arc::new(LlmReasoningEngine::new(provider, config.clone())),
            Arc::new(LayeredContextSynthesizer::new(config.clone())),
            Arc::new(RegistryToolDispatcher::new(tools, config.clone())),
            Arc::new(StandardResponseAssembler::new(config.clone())),
            config,
        )
        .with_tools(catalog)
    }

    /// Replace the tool catalog sent to the engine
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn config(&self) -> &ReasoningConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<dyn ToolDispatcher> {
        &self.dispatcher
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionRegistry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionRegistry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a query through the round loop until it terminates.
    ///
    /// A fresh id is generated when `session_id` is `None`. Reusing the id of
    /// a completed session replaces that record; reusing an active id fails.
    pub async fn process_query(&self, query: &str, session_id: Option<&str>) -> Result<Session> {
        let start = Instant::now();
        let session_id = session_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut session = self.initialize_session(&session_id, query)?;
        info!(session_id = %session.id, "Reasoning session started");

        let outcome = self.run_rounds(&mut session).await;

        let failure = match outcome {
            Ok(LoopExit::Finished(reason)) => {
                self.settle(&mut session, reason, start.elapsed());
                None
            }
            Ok(LoopExit::Terminated) => {
                adopt_external_termination(&mut self.write(), &mut session, start.elapsed());
                None
            }
            Err(e) => {
                error!(session_id = %session.id, error = %e, "Reasoning loop failed");
                self.settle(&mut session, TerminationReason::ApiError, start.elapsed());
                Some(e)
            }
        };

        info!(
            session_id = %session.id,
            rounds = session.rounds.len(),
            tokens = session.total_tokens,
            reason = ?session.termination_reason,
            duration_ms = session.total_duration.as_millis() as u64,
            "Reasoning session finished"
        );

        match failure {
            Some(source) => Err(ReasoningError::QueryFailed {
                session_id: session.id,
                source: Box::new(source),
            }),
            None => Ok(session),
        }
    }

    /// Look up a session, active ones first
    pub fn get_session(&self, session_id: &str) -> Option<Session> {
        let registry = self.read();
        registry
            .active
            .get(session_id)
            .or_else(|| registry.completed.get(session_id))
            .cloned()
    }

    /// Stop an active session with `reason`; returns false if it was not active.
    ///
    /// A loop still running for the session stops before its next round.
    pub fn terminate_session(&self, session_id: &str, reason: TerminationReason) -> bool {
        let mut registry = self.write();
        let Some(mut session) = registry.active.remove(session_id) else {
            return false;
        };

        let elapsed = (Utc::now() - session.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        session.finish(reason, elapsed);
        info!(session_id = %session_id, reason = %reason, "Session terminated");
        registry.complete(session);
        true
    }

    pub fn get_session_metrics(&self) -> SessionMetrics {
        let registry = self.read();
        SessionMetrics {
            total_sessions: registry.total,
            successful_completions: registry.successful,
            early_terminations: registry.early,
            error_terminations: registry.errors,
            active_sessions: registry.active.len(),
            completed_sessions: registry.completed.len(),
        }
    }

    /// Final answer and sources for a finished session
    pub fn assemble_response(&self, session: &Session) -> AssembledResponse {
        self.assembler.assemble_final_response(session)
    }

    fn initialize_session(&self, session_id: &str, query: &str) -> Result<Session> {
        let mut registry = self.write();
        if registry.active.contains_key(session_id) {
            return Err(ReasoningError::SessionActive {
                id: session_id.to_string(),
            });
        }

        let session = Session::new(session_id, query);
        registry.completed.remove(session_id);
        registry.active.insert(session_id.to_string(), session.clone());
        registry.total += 1;
        Ok(session)
    }

    async fn run_rounds(&self, session: &mut Session) -> Result<LoopExit> {
        let max_rounds = self.config.max_rounds;

        loop {
            let still_active = self.read().owns(session);
            if !still_active {
                return Ok(LoopExit::Terminated);
            }
            if session.rounds.len() >= max_rounds {
                return Ok(LoopExit::Finished(TerminationReason::MaxRoundsReached));
            }
            if session.total_tokens > self.config.max_total_tokens {
                return Ok(LoopExit::Finished(TerminationReason::ContextOverflow));
            }

            let round = self.execute_round(session).await;
            let answered = round.tool_executions.is_empty();

            session.record_round(round, max_rounds)?;
            self.update_session_context(session)?;
            self.refresh_active(session);

            if answered {
                return Ok(LoopExit::Finished(TerminationReason::NaturalCompletion));
            }
        }
    }

    /// One round; failures of the engine or dispatcher yield an error round.
    async fn execute_round(&self, session: &Session) -> Round {
        let round_number = session.rounds.len();
        let timer = RoundMetrics::start();

        let briefing = if round_number == 0 {
            String::new()
        } else {
            self.synthesizer.build_context_briefing(session, round_number)
        };

        let estimate = self.engine.estimate_token_usage(&briefing, &session.original_query);
        if session.total_tokens + estimate > self.config.max_total_tokens {
            warn!(
                session_id = %session.id,
                round = round_number,
                used = session.total_tokens,
                estimate = estimate,
                limit = self.config.max_total_tokens,
                "Round likely to exceed token budget"
            );
        }

        match self.try_round(session, &briefing, round_number).await {
            Ok(mut round) => {
                let outcome = if round.tool_executions.is_empty() { "answer" } else { "tool_use" };
                round.duration = timer.finish(outcome);
                debug!(
                    session_id = %session.id,
                    round = round_number,
                    tools = round.tool_executions.len(),
                    "Round complete"
                );
                round
            }
            Err(e) => {
                warn!(session_id = %session.id, round = round_number, error = %e, "Round failed");
                let duration = timer.finish("error");
                Round::error(round_number, &session.original_query, e, duration)
            }
        }
    }

    async fn try_round(&self, session: &Session, briefing: &str, round_number: usize) -> Result<Round> {
        let mut round = self
            .engine
            .execute_reasoning_round(&session.original_query, briefing, &self.tools, round_number)
            .await?;

        let calls = round.tool_calls().to_vec();
        if !calls.is_empty() {
            round.tool_executions = self
                .dispatcher
                .execute_tools(&calls, &session.id, round_number)
                .await?;
        }

        Ok(round)
    }

    /// Fold the latest round into the four context layers
    fn update_session_context(&self, session: &mut Session) -> Result<()> {
        let Some(round) = session.rounds.last() else {
            return Err(ReasoningError::SessionState {
                message: format!("session {} has no round to synthesize", session.id),
            });
        };

        let facts = self.synthesizer.extract_factual_information(round);
        let intent = self.synthesizer.update_intent_understanding(session, round);
        let trace = trace_entry(round);
        let usage: Vec<ToolUsageRecord> = round
            .tool_executions
            .iter()
            .map(|execution| ToolUsageRecord {
                round: round.number,
                tool: execution.tool_name.clone(),
                input: execution.tool_input.clone(),
                success: execution.success,
                duration: execution.execution_time,
            })
            .collect();

        session.discovered_facts.extend(facts);
        session.reasoning_trace.extend(trace);
        session.evolving_intent = intent;
        session.tool_usage_history.extend(usage);
        Ok(())
    }

    /// Publish the loop's copy of the session to the active registry
    fn refresh_active(&self, session: &Session) {
        let mut registry = self.write();
        if registry.owns(session) {
            registry.active.insert(session.id.clone(), session.clone());
        }
    }

    /// Complete the session with `reason`, unless it was terminated from
    /// outside while its last round ran.
    fn settle(&self, session: &mut Session, reason: TerminationReason, elapsed: Duration) {
        let mut registry = self.write();
        if registry.owns(session) {
            session.finish(reason, elapsed);
            registry.complete(session.clone());
        } else {
            debug!(session_id = %session.id, "Session terminated during its last round");
            adopt_external_termination(&mut registry, session, elapsed);
        }
    }
}

/// Keep the externally chosen reason, but record the rounds this loop completed.
///
/// The session was already counted when it was terminated.
fn adopt_external_termination(registry: &mut SessionRegistry, session: &mut Session, elapsed: Duration) {
    let reason = registry
        .completed
        .get(&session.id)
        .filter(|done| done.started_at == session.started_at)
        .and_then(|done| done.termination_reason)
        .unwrap_or(TerminationReason::UserCancellation);

    session.finish(reason, elapsed);
    if registry
        .completed
        .get(&session.id)
        .map_or(true, |done| done.started_at == session.started_at)
    {
        registry.completed.insert(session.id.clone(), session.clone());
    }
}

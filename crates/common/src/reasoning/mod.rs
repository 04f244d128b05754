//! Multi-round reasoning core
//!
//! Provides:
//! - `ReasoningCoordinator`, the session state machine
//! - `ReasoningEngine` for single LLM rounds
//! - `ToolDispatcher` for tool execution with retries and fallbacks
//! - `ContextSynthesizer` for the briefing carried between rounds
//! - `ResponseAssembler` for final answers and sources
//!
//! The LLM and the tools stay behind the `LlmProvider` and `ToolRegistry` traits.

pub mod assembler;
pub mod coordinator;
pub mod dispatcher;
pub mod engine;
pub mod provider;
pub mod synthesizer;
pub mod tools;
pub mod types;

mod text;

#[cfg(test)]
pub(crate) mod testing;

pub use assembler::{ResponseAssembler, StandardResponseAssembler};
pub use coordinator::{ReasoningCoordinator, SessionMetrics};
pub use dispatcher::{ExecutionMetrics, RegistryToolDispatcher, ToolDispatcher};
pub use engine::{LlmReasoningEngine, ReasoningEngine, DEFAULT_SYSTEM_PROMPT};
pub use provider::{ContentBlock, LlmProvider, MessageRequest, ProviderResponse, StopReason, ToolChoice};
pub use synthesizer::{ContextSynthesizer, IntentHint, LayeredContextSynthesizer};
pub use tools::{course_tool_catalog, ToolDefinition, ToolRegistry};
pub use types::{
    AssembledResponse, EngineResponse, FactSheet, Round, Session, Source, TerminationReason,
    TokenUsage, ToolCall, ToolExecutionResult, ToolInput, ToolUsageRecord,
};

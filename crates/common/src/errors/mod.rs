//! Error types for the CourseMind reasoning core
//!
//! Provides:
//! - `ReasoningError`, the base error for the multi-round reasoning loop
//! - `ProviderError` for failures of the external LLM provider
//! - `ToolError` for failures of the external tool registry
//! - Error codes for machine-readable identification
//!
//! Most per-round failures never surface as errors: they are converted into
//! error rounds or failed tool results so a session can still finish with a
//! best-effort answer. Only failures escaping the coordinator loop reach the
//! caller, wrapped in `ReasoningError::QueryFailed`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using ReasoningError
pub type Result<T> = std::result::Result<T, ReasoningError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Reasoning limits (1xxx)
    ContextOverflow,
    RoundLimit,
    Timeout,

    // Session state (2xxx)
    SessionActive,
    SessionState,
    QueryFailed,

    // External collaborators (8xxx)
    ToolExecution,
    ApiError,
    ProviderError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::ContextOverflow => 1001,
            ErrorCode::RoundLimit => 1002,
            ErrorCode::Timeout => 1003,

            ErrorCode::SessionActive => 2001,
            ErrorCode::SessionState => 2002,
            ErrorCode::QueryFailed => 2003,

            ErrorCode::ToolExecution => 8001,
            ErrorCode::ApiError => 8002,
            ErrorCode::ProviderError => 8003,
        }
    }
}

/// Failure reported by the external LLM provider.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// The provider answered with an error status.
    #[error("Provider API error (status={status:?}): {message}")]
    Api {
        status: Option<u16>,
        message: String,
    },

    /// The request never produced a response (DNS, connection reset, timeout).
    #[error("Provider transport error: {0}")]
    Transport(String),

    /// The response body could not be decoded.
    #[error("Malformed provider response: {0}")]
    ResponseFormat(String),

    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    /// Provider-level failures that may succeed when the request is repeated.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ProviderError::Api { .. } | ProviderError::Transport(_))
    }
}

/// Failure raised by the external tool registry.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid tool input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Execution(String),
}

/// Reasoning system error types
#[derive(Error, Debug)]
pub enum ReasoningError {
    #[error("Context overflow: {tokens} tokens exceeds limit of {limit}")]
    ContextOverflow { tokens: u64, limit: u64 },

    #[error("Tool execution failed ({tool_name}): {message}")]
    ToolExecution { tool_name: String, message: String },

    #[error("API call failed after {attempts} attempt(s): {source}")]
    Api {
        attempts: u32,
        #[source]
        source: ProviderError,
    },

    #[error("Round limit reached: {max_rounds} rounds")]
    RoundLimit { max_rounds: usize },

    #[error("Query processing failed for session {session_id}: {source}")]
    QueryFailed {
        session_id: String,
        #[source]
        source: Box<ReasoningError>,
    },

    #[error("Session already active: {id}")]
    SessionActive { id: String },

    #[error("Session state error: {message}")]
    SessionState { message: String },

    #[error("Reasoning timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
}

impl ReasoningError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            ReasoningError::ContextOverflow { .. } => ErrorCode::ContextOverflow,
            ReasoningError::ToolExecution { .. } => ErrorCode::ToolExecution,
            ReasoningError::Api { .. } => ErrorCode::ApiError,
            ReasoningError::RoundLimit { .. } => ErrorCode::RoundLimit,
            ReasoningError::QueryFailed { .. } => ErrorCode::QueryFailed,
            ReasoningError::SessionActive { .. } => ErrorCode::SessionActive,
            ReasoningError::SessionState { .. } => ErrorCode::SessionState,
            ReasoningError::Timeout { .. } => ErrorCode::Timeout,
            ReasoningError::Provider(_) => ErrorCode::ProviderError,
        }
    }
}

impl From<ToolError> for ReasoningError {
    fn from(err: ToolError) -> Self {
        let tool_name = match &err {
            ToolError::NotFound(name) => name.clone(),
            _ => "unknown".to_string(),
        };
        ReasoningError::ToolExecution {
            tool_name,
            message: err.to_string(),
        }
    }
}

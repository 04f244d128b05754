//! CourseMind Common Library
//!
//! Shared code for the course materials assistant including:
//! - The multi-round reasoning core (engine, dispatcher, synthesizer, assembler, coordinator)
//! - The assistant facade choosing between direct and multi-round answering
//! - Anthropic Messages API provider
//! - Error types and handling
//! - Configuration management
//! - Metrics and observability

pub mod assistant;
pub mod config;
pub mod errors;
pub mod llm;
pub mod metrics;
pub mod reasoning;

// Re-export commonly used types
pub use assistant::{CourseAssistant, Responder};
pub use config::{AppConfig, ReasoningConfig};
pub use errors::{ReasoningError, Result};
pub use llm::AnthropicProvider;
pub use reasoning::{AssembledResponse, ReasoningCoordinator, Session, TerminationReason};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

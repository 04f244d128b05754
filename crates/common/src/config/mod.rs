//! Configuration management for CourseMind services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// LLM provider configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// Multi-round reasoning policy
    #[serde(default)]
    pub reasoning: ReasoningConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// API key for the provider (requests fail without one)
    pub api_key: Option<String>,

    /// API base URL
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    /// Model to use
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Value of the `anthropic-version` header
    #[serde(default = "default_llm_api_version")]
    pub api_version: String,

    /// HTTP request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Sampling temperature
    #[serde(default)]
    pub temperature: f32,
}

/// Reasoning policy shared by every component of one assistant instance.
///
/// Constructed once and never mutated while rounds are running.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReasoningConfig {
    /// Maximum engine rounds per session
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,

    /// Output token budget for a single provider call
    #[serde(default = "default_max_tokens_per_round")]
    pub max_tokens_per_round: u32,

    /// Session token ceiling; a session above it starts no further rounds
    #[serde(default = "default_max_total_tokens")]
    pub max_total_tokens: u64,

    /// Combined layer length (characters) above which briefings are compressed
    #[serde(default = "default_compression_threshold")]
    pub context_compression_threshold: usize,

    /// Per-tool timeout for hosts that enforce one
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,

    /// Overall reasoning timeout, enforced by the assistant facade
    #[serde(default = "default_reasoning_timeout")]
    pub reasoning_timeout_secs: u64,

    #[serde(default = "default_enabled")]
    pub enable_tool_fallbacks: bool,

    #[serde(default = "default_enabled")]
    pub enable_context_compression: bool,

    #[serde(default = "default_enabled")]
    pub enable_partial_responses: bool,

    /// Provider attempts per round, including the first one
    #[serde(default = "default_engine_max_attempts")]
    pub engine_max_attempts: u32,

    /// First provider retry delay; doubles on each further attempt
    #[serde(default = "default_engine_retry_base_delay")]
    pub engine_retry_base_delay_ms: u64,

    /// Retries of a raised tool error, after the first attempt
    #[serde(default = "default_tool_max_retries")]
    pub tool_max_retries: u32,

    /// Tool retry delay; grows linearly with the attempt number
    #[serde(default = "default_tool_retry_delay")]
    pub tool_retry_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error) or a full filter directive
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logging: bool,

    /// Prometheus exporter port (0 to disable)
    #[serde(default)]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_llm_base_url() -> String { "https://api.anthropic.com".to_string() }
fn default_llm_model() -> String { "claude-sonnet-4-20250514".to_string() }
fn default_llm_api_version() -> String { "2023-06-01".to_string() }
fn default_llm_timeout() -> u64 { 60 }
fn default_max_rounds() -> usize { 2 }
fn default_max_tokens_per_round() -> u32 { 800 }
fn default_max_total_tokens() -> u64 { 1600 }
fn default_compression_threshold() -> usize { 1200 }
fn default_tool_timeout() -> u64 { 30 }
fn default_reasoning_timeout() -> u64 { 120 }
fn default_enabled() -> bool { true }
fn default_engine_max_attempts() -> u32 { 3 }
fn default_engine_retry_base_delay() -> u64 { 1000 }
fn default_tool_max_retries() -> u32 { 2 }
fn default_tool_retry_delay() -> u64 { 500 }
fn default_log_level() -> String { "info".to_string() }
fn default_service_name() -> String { "coursemind".to_string() }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with defaults
            .set_default("reasoning.max_rounds", default_max_rounds() as i64)?
            .set_default("observability.log_level", default_log_level())?

            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__REASONING__MAX_ROUNDS=3
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize()
    }
}

impl ReasoningConfig {
    /// Get reasoning timeout as Duration
    pub fn reasoning_timeout(&self) -> Duration {
        Duration::from_secs(self.reasoning_timeout_secs)
    }

    /// Get tool timeout as Duration
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    /// Get the first provider retry delay as Duration
    pub fn engine_retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.engine_retry_base_delay_ms)
    }

    /// Get the tool retry delay unit as Duration
    pub fn tool_retry_delay(&self) -> Duration {
        Duration::from_millis(self.tool_retry_delay_ms)
    }
}

impl LlmConfig {
    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            api_version: default_llm_api_version(),
            timeout_secs: default_llm_timeout(),
            temperature: 0.0,
        }
    }
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            max_tokens_per_round: default_max_tokens_per_round(),
            max_total_tokens: default_max_total_tokens(),
            context_compression_threshold: default_compression_threshold(),
            tool_timeout_secs: default_tool_timeout(),
            reasoning_timeout_secs: default_reasoning_timeout(),
            enable_tool_fallbacks: default_enabled(),
            enable_context_compression: default_enabled(),
            enable_partial_responses: default_enabled(),
            engine_max_attempts: default_engine_max_attempts(),
            engine_retry_base_delay_ms: default_engine_retry_base_delay(),
            tool_max_retries: default_tool_max_retries(),
            tool_retry_delay_ms: default_tool_retry_delay(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: false,
            metrics_port: 0,
            service_name: default_service_name(),
        }
    }
}

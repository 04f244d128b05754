//! Context Synthesizer - Builds the briefing handed to later rounds
//!
//! Provides:
//! - Four-layer briefings (intent, facts, tool history, reasoning trace)
//! - Fact extraction from tool results and direct answers
//! - Intent refinement driven by a table of per-tool hints
//! - Lossy section compression once the layers grow too large
//!
//! Compression only affects the briefing text; session state is never trimmed.

use super::text::{cached_regex, char_len, ellipsize, truncate_chars};
use super::tools::{GET_COURSE_OUTLINE, SEARCH_COURSE_CONTENT};
use super::types::{FactSheet, Round, Session, ToolUsageRecord};
use crate::config::ReasoningConfig;
use regex_lite::Regex;
use serde_json::Value;
use std::sync::{Arc, OnceLock};

/// Layer sizes above which compression is forced
const MAX_FACTUAL_ITEMS: usize = 10;
const MAX_REASONING_ENTRIES: usize = 5;
const MAX_TOOL_HISTORY: usize = 8;

// Summarization windows
const RECENT_TOOL_FACTS: usize = 3;
const RECENT_RESPONSE_FACTS: usize = 2;
const RECENT_TOOL_USES: usize = 6;
const RECENT_TRACE_ENTRIES: usize = 3;

const TRACE_ENTRY_CHARS: usize = 50;
const FACT_EXCERPT_CHARS: usize = 100;
const COMPRESSED_SECTION_CHARS: usize = 200;

const MAX_KEY_TERMS: usize = 3;
const MAX_REFINEMENTS: usize = 2;

const SECTION_SEPARATOR: &str = "\n\n";

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "what", "how", "when", "where", "why",
];

static TRACE_PREFIX: OnceLock<Option<Regex>> = OnceLock::new();

/// Annotation appended to the intent when a tool succeeds.
///
/// Skipped when the intent already mentions `marker` (case-insensitive).
#[derive(Debug, Clone, PartialEq)]
pub struct IntentHint {
    pub tool_name: String,
    pub marker: String,
    pub annotation: String,
}

impl IntentHint {
    pub fn new(tool_name: &str, marker: &str, annotation: &str) -> Self {
        Self {
            tool_name: tool_name.to_string(),
            marker: marker.to_string(),
            annotation: annotation.to_string(),
        }
    }
}

/// Hints for the two course tools
pub fn default_intent_hints() -> Vec<IntentHint> {
    vec![
        IntentHint::new(SEARCH_COURSE_CONTENT, "specific content", " (seeking specific content)"),
        IntentHint::new(GET_COURSE_OUTLINE, "course structure", " (exploring course structure)"),
    ]
}

/// Trait for context synthesis
pub trait ContextSynthesizer: Send + Sync {
    /// Briefing for `round_number`; always empty for round 0.
    fn build_context_briefing(&self, session: &Session, round_number: usize) -> String;

    /// Facts discovered in one round, keyed `tool_<name>_<round>` and `response_<round>`
    fn extract_factual_information(&self, round: &Round) -> FactSheet;

    /// The session intent refined by this round's successful tool executions
    fn update_intent_understanding(&self, session: &Session, round: &Round) -> String;

    fn should_compress_context(&self, session: &Session) -> bool;
}

/// Four-layer synthesizer
pub struct LayeredContextSynthesizer {
    config: Arc<ReasoningConfig>,
    intent_hints: Vec<IntentHint>,
}

impl LayeredContextSynthesizer {
    pub fn new(config: Arc<ReasoningConfig>) -> Self {
        Self {
            config,
            intent_hints: default_intent_hints(),
        }
    }

    /// Register an additional intent hint
    pub fn with_intent_hint(mut self, hint: IntentHint) -> Self {
        self.intent_hints.push(hint);
        self
    }

    fn summarize_facts(facts: &FactSheet) -> String {
        let tool_facts: Vec<&str> = facts
            .iter()
            .filter(|(key, _)| key.starts_with("tool_"))
            .map(|(_, value)| value)
            .collect();
        let response_facts: Vec<&str> = facts
            .iter()
            .filter(|(key, _)| key.starts_with("response_"))
            .map(|(_, value)| value)
            .collect();

        let mut parts = Vec::new();
        if !tool_facts.is_empty() {
            parts.push(format!("Found: {}", last_n(&tool_facts, RECENT_TOOL_FACTS).join("; ")));
        }
        if !response_facts.is_empty() {
            parts.push(format!(
                "Insights: {}",
                last_n(&response_facts, RECENT_RESPONSE_FACTS).join("; ")
            ));
        }
        parts.join(". ")
    }

    fn summarize_tool_usage(history: &[ToolUsageRecord]) -> String {
        let mut searches = Vec::new();
        let mut outlines = Vec::new();

        for record in last_n(history, RECENT_TOOL_USES) {
            let status = if record.success { "✓" } else { "✗" };
            match record.tool.as_str() {
                SEARCH_COURSE_CONTENT => {
                    let query = input_str(&record.input, "query");
                    let course = input_str(&record.input, "course_name");
                    if course.is_empty() {
                        searches.push(format!("{} searched '{}'", status, query));
                    } else {
                        searches.push(format!("{} searched '{}' in {}", status, query, course));
                    }
                }
                GET_COURSE_OUTLINE => {
                    let course = input_str(&record.input, "course_name");
                    outlines.push(format!("{} outlined '{}'", status, course));
                }
                _ => {}
            }
        }

        let mut parts = Vec::new();
        if !searches.is_empty() {
            parts.push(format!("Searches: {}", searches.join("; ")));
        }
        if !outlines.is_empty() {
            parts.push(format!("Outlines: {}", outlines.join("; ")));
        }

        if parts.is_empty() {
            "No recent searches".to_string()
        } else {
            parts.join(". ")
        }
    }

    fn summarize_reasoning(trace: &[String]) -> String {
        let prefix = cached_regex(&TRACE_PREFIX, r"^Round \d+:\s*");
        last_n(trace, RECENT_TRACE_ENTRIES)
            .iter()
            .map(|entry| {
                let clean = match prefix {
                    Some(re) => re.replace(entry, "").into_owned(),
                    None => entry.clone(),
                };
                ellipsize(&clean, TRACE_ENTRY_CHARS)
            })
            .collect::<Vec<_>>()
            .join("; ")
    }

    fn compress_briefing(briefing: &str) -> String {
        briefing
            .split(SECTION_SEPARATOR)
            .map(|section| ellipsize(section, COMPRESSED_SECTION_CHARS))
            .collect::<Vec<_>>()
            .join(SECTION_SEPARATOR)
    }

    /// Combined character length of the fact, trace and tool-history layers
    fn layers_length(session: &Session) -> usize {
        let facts: usize = session
            .discovered_facts
            .iter()
            .map(|(key, value)| char_len(key) + char_len(value))
            .sum();
        let trace: usize = session.reasoning_trace.iter().map(|entry| char_len(entry)).sum();
        let history: usize = session
            .tool_usage_history
            .iter()
            .map(|record| {
                char_len(&record.tool)
                    + serde_json::to_string(&record.input)
                        .map(|s| char_len(&s))
                        .unwrap_or(0)
            })
            .sum();
        facts + trace + history
    }
}

impl ContextSynthesizer for LayeredContextSynthesizer {
    fn build_context_briefing(&self, session: &Session, round_number: usize) -> String {
        if round_number == 0 {
            return String::new();
        }

        let mut sections = vec![format!("User Intent: {}", session.evolving_intent)];

        if !session.discovered_facts.is_empty() {
            sections.push(format!(
                "Information Discovered: {}",
                Self::summarize_facts(&session.discovered_facts)
            ));
        }
        if !session.tool_usage_history.is_empty() {
            sections.push(format!(
                "Search History: {}",
                Self::summarize_tool_usage(&session.tool_usage_history)
            ));
        }
        if !session.reasoning_trace.is_empty() {
            sections.push(format!(
                "Previous Reasoning: {}",
                Self::summarize_reasoning(&session.reasoning_trace)
            ));
        }

        let briefing = sections.join(SECTION_SEPARATOR);
        if self.should_compress_context(session) {
            Self::compress_briefing(&briefing)
        } else {
            briefing
        }
    }

    fn extract_factual_information(&self, round: &Round) -> FactSheet {
        let mut facts = FactSheet::new();

        for execution in round.successful_executions() {
            if !execution.result.is_empty() {
                facts.insert(
                    format!("tool_{}_{}", execution.tool_name, round.number),
                    extract_key_info(&execution.result),
                );
            }
        }

        if let Some(text) = round.final_text.as_deref().filter(|t| !t.is_empty()) {
            facts.insert(format!("response_{}", round.number), extract_key_info(text));
        }

        facts
    }

    fn update_intent_understanding(&self, session: &Session, round: &Round) -> String {
        let mut intent = session.evolving_intent.clone();

        for hint in &self.intent_hints {
            let used = round
                .successful_executions()
                .any(|execution| execution.tool_name == hint.tool_name);
            if used && !intent.to_lowercase().contains(&hint.marker.to_lowercase()) {
                intent.push_str(&hint.annotation);
            }
        }

        let refinements: Vec<String> = round
            .successful_executions()
            .filter_map(|execution| execution.tool_input.get("query").and_then(Value::as_str))
            .filter(|query| !query.is_empty())
            .map(extract_key_terms)
            .filter(|terms| !terms.is_empty())
            .take(MAX_REFINEMENTS)
            .collect();

        if !refinements.is_empty() {
            intent = format!("{} -> {}", intent, refinements.join("; "));
        }

        intent
    }

    fn should_compress_context(&self, session: &Session) -> bool {
        if !self.config.enable_context_compression {
            return false;
        }

        session.discovered_facts.len() > MAX_FACTUAL_ITEMS
            || session.reasoning_trace.len() > MAX_REASONING_ENTRIES
            || session.tool_usage_history.len() > MAX_TOOL_HISTORY
            || Self::layers_length(session) > self.config.context_compression_threshold
    }
}

/// Trace entry recorded for a round that produced final text
pub fn trace_entry(round: &Round) -> Option<String> {
    round
        .final_text
        .as_deref()
        .filter(|text| !text.is_empty())
        .map(|text| format!("Round {}: {}...", round.number, truncate_chars(text, FACT_EXCERPT_CHARS)))
}

fn last_n<T>(items: &[T], n: usize) -> &[T] {
    &items[items.len().saturating_sub(n)..]
}

fn input_str<'a>(input: &'a serde_json::Map<String, Value>, key: &str) -> &'a str {
    input.get(key).and_then(Value::as_str).unwrap_or_default()
}

/// First sentence of `text`, capped at the fact excerpt length
fn extract_key_info(text: &str) -> String {
    let first_sentence = text.trim().split('.').next().unwrap_or_default().trim();
    ellipsize(first_sentence, FACT_EXCERPT_CHARS)
}

/// Up to three non-stopword terms longer than two characters
fn extract_key_terms(query: &str) -> String {
    query
        .to_lowercase()
        .split_whitespace()
        .filter(|word| !STOPWORDS.contains(word) && word.chars().count() > 2)
        .take(MAX_KEY_TERMS)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reasoning::testing::input;
    use crate::reasoning::types::{EngineResponse, TokenUsage, ToolCall, ToolExecutionResult};
    use serde_json::json;
    use std::time::Duration;

    fn synthesizer() -> LayeredContextSynthesizer {
        LayeredContextSynthesizer::new(Arc::new(ReasoningConfig::default()))
    }

    fn execution(tool: &str, query: serde_json::Value, success: bool, result: &str) -> ToolExecutionResult {
        ToolExecutionResult {
            tool_name: tool.into(),
            tool_input: input(query),
            success,
            result: result.into(),
            execution_time: Duration::from_millis(3),
            error: None,
        }
    }

    fn tool_round(number: usize, executions: Vec<ToolExecutionResult>) -> Round {
        Round {
            number,
            query: "q".into(),
            response: Some(EngineResponse::ToolRequests(vec![ToolCall {
                id: "toolu_00".into(),
                name: SEARCH_COURSE_CONTENT.into(),
                input: input(json!({})),
            }])),
            tool_executions: executions,
            final_text: None,
            duration: Duration::from_millis(10),
            token_usage: TokenUsage::new(10, 5),
            error: None,
        }
    }

    #[test]
    fn test_round_zero_briefing_is_empty() {
        let mut session = Session::new("s1", "What is Rust?");
        session.discovered_facts.insert("tool_x_0", "fact");
        assert_eq!(synthesizer().build_context_briefing(&session, 0), "");
    }

    #[test]
    fn test_briefing_sections_in_order() {
        let mut session = Session::new("s1", "What are decorators?");
        session.discovered_facts.insert("tool_search_course_content_0", "Decorators wrap functions");
        session.discovered_facts.insert("response_0", "They add behavior");
        session.tool_usage_history.push(ToolUsageRecord {
            round: 0,
            tool: SEARCH_COURSE_CONTENT.into(),
            input: input(json!({"query": "decorators", "course_name": "Advanced Python"})),
            success: true,
            duration: Duration::from_millis(3),
        });
        session.reasoning_trace.push("Round 0: Decorators wrap functions...".into());

        let briefing = synthesizer().build_context_briefing(&session, 1);
        let sections: Vec<&str> = briefing.split("\n\n").collect();
        assert_eq!(sections.len(), 4);
        assert_eq!(sections[0], "User Intent: What are decorators?");
        assert_eq!(
            sections[1],
            "Information Discovered: Found: Decorators wrap functions. Insights: They add behavior"
        );
        assert_eq!(
            sections[2],
            "Search History: Searches: ✓ searched 'decorators' in Advanced Python"
        );
        assert_eq!(sections[3], "Previous Reasoning: Decorators wrap functions...");
    }

    #[test]
    fn test_fact_extraction_keys_and_excerpts() {
        let round = Round {
            final_text: Some("Generators yield values. They are lazy.".into()),
            ..tool_round(
                2,
                vec![
                    execution(SEARCH_COURSE_CONTENT, json!({"query": "x"}), true, "[Python - Lesson 1] Lists are ordered. More."),
                    execution(GET_COURSE_OUTLINE, json!({"course_name": "Go"}), false, "No course found"),
                ],
            )
        };

        let facts = synthesizer().extract_factual_information(&round);
        assert_eq!(facts.len(), 2);
        assert_eq!(
            facts.get("tool_search_course_content_2"),
            Some("[Python - Lesson 1] Lists are ordered")
        );
        assert_eq!(facts.get("response_2"), Some("Generators yield values"));
    }

    #[test]
    fn test_long_fact_excerpt_is_truncated() {
        assert_eq!(extract_key_info(&"x".repeat(150)), format!("{}...", "x".repeat(100)));
    }

    #[test]
    fn test_intent_annotations_applied_once() {
        let mut session = Session::new("s1", "How do closures work");
        let round = tool_round(
            0,
            vec![execution(
                SEARCH_COURSE_CONTENT,
                json!({"query": "what are the closures in Rust"}),
                true,
                "Closures capture their environment.",
            )],
        );

        let synth = synthesizer();
        let intent = synth.update_intent_understanding(&session, &round);
        assert_eq!(
            intent,
            "How do closures work (seeking specific content) -> are closures rust"
        );

        session.evolving_intent = intent;
        let again = synth.update_intent_understanding(&session, &round);
        assert_eq!(again.matches("(seeking specific content)").count(), 1);
    }

    #[test]
    fn test_failed_executions_do_not_refine_intent() {
        let session = Session::new("s1", "Course structure of Go");
        let round = tool_round(
            0,
            vec![execution(GET_COURSE_OUTLINE, json!({"course_name": "Go"}), false, "Error: offline")],
        );
        assert_eq!(
            synthesizer().update_intent_understanding(&session, &round),
            "Course structure of Go"
        );
    }

    #[test]
    fn test_custom_intent_hint() {
        let synth = synthesizer().with_intent_hint(IntentHint::new(
            "search_web",
            "external sources",
            " (consulting external sources)",
        ));
        let session = Session::new("s1", "Latest Rust release");
        let round = tool_round(0, vec![execution("search_web", json!({}), true, "Rust 1.80 released")]);
        assert_eq!(
            synth.update_intent_understanding(&session, &round),
            "Latest Rust release (consulting external sources)"
        );
    }

    #[test]
    fn test_refinements_capped_at_two() {
        let session = Session::new("s1", "q");
        let round = tool_round(
            0,
            vec![
                execution("other", json!({"query": "alpha beta"}), true, "ok"),
                execution("other", json!({"query": "gamma"}), true, "ok"),
                execution("other", json!({"query": "delta"}), true, "ok"),
            ],
        );
        assert_eq!(
            synthesizer().update_intent_understanding(&session, &round),
            "q -> alpha beta; gamma"
        );
    }

    #[test]
    fn test_compression_triggered_by_fact_count() {
        let synth = synthesizer();
        let mut session = Session::new("s1", "q");
        for i in 0..9 {
            session.discovered_facts.insert(format!("tool_t_{}", i), "f");
        }
        assert!(!synth.should_compress_context(&session));

        session.discovered_facts.insert("tool_t_9", "f");
        session.discovered_facts.insert("tool_t_10", "f");
        assert_eq!(session.discovered_facts.len(), 11);
        assert!(synth.should_compress_context(&session));
    }

    #[test]
    fn test_compression_triggered_by_length_and_disabled_by_config() {
        let mut session = Session::new("s1", "q");
        session.discovered_facts.insert("tool_t_0", "y".repeat(1300));
        assert!(synthesizer().should_compress_context(&session));

        let disabled = LayeredContextSynthesizer::new(Arc::new(ReasoningConfig {
            enable_context_compression: false,
            ..ReasoningConfig::default()
        }));
        assert!(!disabled.should_compress_context(&session));
    }

    #[test]
    fn test_compressed_briefing_truncates_each_section() {
        let mut session = Session::new("s1", &"i".repeat(250));
        session.discovered_facts.insert("tool_t_0", "z".repeat(1300));

        let briefing = synthesizer().build_context_briefing(&session, 1);
        let sections: Vec<&str> = briefing.split("\n\n").collect();
        assert_eq!(sections.len(), 2);
        for section in sections {
            assert!(section.ends_with("..."));
            assert_eq!(section.chars().count(), 203);
        }
    }

    #[test]
    fn test_tool_history_summary_window_and_fallback_text() {
        let record = |tool: &str, success: bool| ToolUsageRecord {
            round: 0,
            tool: tool.into(),
            input: input(json!({"query": "q", "course_name": "Go"})),
            success,
            duration: Duration::ZERO,
        };
        let history = vec![record("custom_tool", true)];
        assert_eq!(LayeredContextSynthesizer::summarize_tool_usage(&history), "No recent searches");

        let history = vec![record(SEARCH_COURSE_CONTENT, false), record(GET_COURSE_OUTLINE, true)];
        assert_eq!(
            LayeredContextSynthesizer::summarize_tool_usage(&history),
            "Searches: ✗ searched 'q' in Go. Outlines: ✓ outlined 'Go'"
        );
    }

    #[test]
    fn test_trace_entry_and_summary() {
        let round = Round {
            final_text: Some("a".repeat(120)),
            ..tool_round(1, Vec::new())
        };
        let entry = trace_entry(&round).unwrap();
        assert_eq!(entry, format!("Round 1: {}...", "a".repeat(100)));

        let summary = LayeredContextSynthesizer::summarize_reasoning(&[entry]);
        assert_eq!(summary, format!("{}...", "a".repeat(50)));
    }
}

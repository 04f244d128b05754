//! Response Assembler - Turns a finished session into an answer
//!
//! Provides:
//! - Natural-completion answers taken verbatim from the engine
//! - Reason-specific partial-completion messages
//! - Best-available answer search and synthesis from tool results
//! - Source extraction from search results

use super::text::{cached_regex, ellipsize};
use super::tools::SEARCH_COURSE_CONTENT;
use super::types::{AssembledResponse, Session, Source, TerminationReason};
use crate::config::ReasoningConfig;
use regex_lite::Regex;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// Lowercase substrings marking a final text as an error message
const ERROR_INDICATORS: &[&str] = &[
    "error",
    "failed",
    "couldn't",
    "unable to",
    "technical difficulties",
    "api error",
];

/// Result prefixes that carry no usable content
const EMPTY_RESULT_PREFIXES: &[&str] = &["No", "Error"];

const MEANINGFUL_CONTENT_CHARS: usize = 200;
const RECENT_FINDINGS: usize = 2;

const NO_INFORMATION: &str =
    "I wasn't able to find specific information about your question in the available course materials.";
const NATURAL_WITHOUT_ROUNDS: &str = "I couldn't process your question properly.";

static COURSE_HEADER: OnceLock<Option<Regex>> = OnceLock::new();
static COURSE_LESSON: OnceLock<Option<Regex>> = OnceLock::new();
static COURSE_ONLY: OnceLock<Option<Regex>> = OnceLock::new();

/// Trait for response assembly
pub trait ResponseAssembler: Send + Sync {
    /// Answer text and sources for a finished session
    fn assemble_final_response(&self, session: &Session) -> AssembledResponse;

    /// Answer for a session that stopped before the engine answered directly
    fn handle_partial_completion(&self, session: &Session, reason: TerminationReason) -> AssembledResponse;

    /// De-duplicated citations from successful search results, first-seen order
    fn extract_sources(&self, session: &Session) -> Vec<Source>;
}

pub struct StandardResponseAssembler {
    config: Arc<ReasoningConfig>,
}

impl StandardResponseAssembler {
    pub fn new(config: Arc<ReasoningConfig>) -> Self {
        Self { config }
    }

    fn handle_natural_completion(&self, session: &Session) -> AssembledResponse {
        let Some(last) = session.last_round() else {
            return AssembledResponse::text_only(NATURAL_WITHOUT_ROUNDS);
        };

        let text = match last.final_text.as_deref() {
            Some(text) if !text.is_empty() && !last.is_error() => text.to_string(),
            _ => find_best_response(session).unwrap_or_else(|| synthesize_findings(session)),
        };

        AssembledResponse::new(text, self.extract_sources(session))
    }
}

impl ResponseAssembler for StandardResponseAssembler {
    fn assemble_final_response(&self, session: &Session) -> AssembledResponse {
        match session.termination_reason {
            Some(TerminationReason::NaturalCompletion) => self.handle_natural_completion(session),
            Some(reason) => self.handle_partial_completion(session, reason),
            // Still running: assemble whatever is there
            None => self.handle_partial_completion(session, TerminationReason::UserCancellation),
        }
    }

    fn handle_partial_completion(&self, session: &Session, reason: TerminationReason) -> AssembledResponse {
        if session.rounds.is_empty() || !self.config.enable_partial_responses {
            return AssembledResponse::text_only(no_rounds_message(reason));
        }

        let sources = self.extract_sources(session);

        if let Some(best) = find_best_response(session) {
            return AssembledResponse::new(best, sources);
        }

        debug!(
            session_id = %session.id,
            reason = %reason,
            "No usable final text, synthesizing from tool results"
        );
        let text = format!("{}{}", partial_prefix(reason), synthesize_findings(session));
        AssembledResponse::new(text, sources)
    }

    fn extract_sources(&self, session: &Session) -> Vec<Source> {
        let mut sources = Vec::new();
        let mut seen = HashSet::new();

        for round in &session.rounds {
            for execution in round.successful_executions() {
                if !execution.tool_name.starts_with(SEARCH_COURSE_CONTENT) {
                    continue;
                }
                for source in sources_from_search_result(&execution.result) {
                    if seen.insert(source.dedup_key()) {
                        sources.push(source);
                    }
                }
            }
        }

        sources
    }
}

fn no_rounds_message(reason: TerminationReason) -> &'static str {
    match reason {
        TerminationReason::ContextOverflow => {
            "Your question is quite complex and would require extensive processing. Could you try breaking it down into smaller, more specific questions?"
        }
        TerminationReason::ApiError => {
            "I'm experiencing technical difficulties right now. Please try your question again in a moment."
        }
        TerminationReason::ToolFailure => {
            "I'm having trouble accessing the course materials right now. Please try again later."
        }
        _ => "I couldn't process your question. Please try rephrasing it or ask something more specific.",
    }
}

fn partial_prefix(reason: TerminationReason) -> &'static str {
    match reason {
        TerminationReason::MaxRoundsReached => {
            "I've gathered some information but need more rounds to provide a complete answer. Here's what I found: "
        }
        TerminationReason::ContextOverflow => "The query is quite complex. Based on the information I found: ",
        TerminationReason::ToolFailure => {
            "I encountered some technical difficulties while searching, but here's what I can tell you: "
        }
        TerminationReason::ApiError => {
            "I experienced some technical issues, but I was able to gather some information for you: "
        }
        _ => "I've gathered some information about your question: ",
    }
}

/// Most recent non-empty final text that does not read as an error
fn find_best_response(session: &Session) -> Option<String> {
    session
        .rounds
        .iter()
        .rev()
        .filter_map(|round| round.final_text.as_deref())
        .find(|text| !text.trim().is_empty() && !is_error_response(text))
        .map(str::to_string)
}

fn is_error_response(text: &str) -> bool {
    let lower = text.to_lowercase();
    ERROR_INDICATORS.iter().any(|indicator| lower.contains(indicator))
}

/// The two most recent meaningful fragments of successful tool results
fn synthesize_findings(session: &Session) -> String {
    let findings: Vec<String> = session
        .rounds
        .iter()
        .flat_map(|round| round.successful_executions())
        .map(|execution| extract_meaningful_content(&execution.result))
        .filter(|content| !content.is_empty())
        .collect();

    if findings.is_empty() {
        return NO_INFORMATION.to_string();
    }

    let start = findings.len().saturating_sub(RECENT_FINDINGS);
    findings[start..].join(" ")
}

/// First paragraph of a tool result without its course header, cut at a sentence boundary
fn extract_meaningful_content(result: &str) -> String {
    if result.is_empty() || EMPTY_RESULT_PREFIXES.iter().any(|p| result.starts_with(p)) {
        return String::new();
    }

    let trimmed = result.trim();
    let content = match cached_regex(&COURSE_HEADER, r"^\[.*?\]\s*") {
        Some(re) => re.replace(trimmed, "").into_owned(),
        None => trimmed.to_string(),
    };

    let paragraph = content.split("\n\n").next().unwrap_or_default().trim();
    if paragraph.chars().count() <= MEANINGFUL_CONTENT_CHARS {
        return paragraph.to_string();
    }

    let sentences: Vec<&str> = paragraph.split('.').collect();
    if sentences.len() > 1 {
        let mut fitted = String::new();
        for sentence in sentences {
            if fitted.chars().count() + sentence.chars().count() + 1 > MEANINGFUL_CONTENT_CHARS {
                break;
            }
            fitted.push_str(sentence);
            fitted.push('.');
        }
        let fitted = fitted.trim();
        if !fitted.is_empty() {
            return fitted.to_string();
        }
    }

    ellipsize(paragraph, MEANINGFUL_CONTENT_CHARS)
}

/// Citations in one search result: `[Course - Lesson N]`, else bare `[Course]`
fn sources_from_search_result(result: &str) -> Vec<Source> {
    let mut sources = Vec::new();

    if let Some(re) = cached_regex(&COURSE_LESSON, r"\[(.*?)\s*-\s*Lesson\s+(\d+)\]") {
        for caps in re.captures_iter(result) {
            let course = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
            let lesson = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
            sources.push(Source::new(format!("{} - Lesson {}", course, lesson)));
        }
    }

    if sources.is_empty() {
        if let Some(re) = cached_regex(&COURSE_ONLY, r"\[(.*?)\]") {
            for caps in re.captures_iter(result) {
                let course = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
                if !course.is_empty() {
                    sources.push(Source::new(course));
                }
            }
        }
    }

    sources
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reasoning::testing::input;
    use crate::reasoning::tools::GET_COURSE_OUTLINE;
    use crate::reasoning::types::{EngineResponse, Round, TokenUsage, ToolExecutionResult};
    use serde_json::json;
    use std::time::Duration;

    fn assembler() -> StandardResponseAssembler {
        StandardResponseAssembler::new(Arc::new(ReasoningConfig::default()))
    }

    fn execution(tool: &str, success: bool, result: &str) -> ToolExecutionResult {
        ToolExecutionResult {
            tool_name: tool.into(),
            tool_input: input(json!({"query": "q"})),
            success,
            result: result.into(),
            execution_time: Duration::from_millis(2),
            error: None,
        }
    }

    fn round(number: usize, final_text: Option<&str>, executions: Vec<ToolExecutionResult>) -> Round {
        Round {
            number,
            query: "q".into(),
            response: Some(match final_text {
                Some(text) => EngineResponse::FinalAnswer(text.into()),
                None => EngineResponse::ToolRequests(Vec::new()),
            }),
            tool_executions: executions,
            final_text: final_text.map(str::to_string),
            duration: Duration::from_millis(10),
            token_usage: TokenUsage::new(10, 10),
            error: None,
        }
    }

    fn session(reason: TerminationReason, rounds: Vec<Round>) -> Session {
        let mut session = Session::new("s1", "q");
        session.rounds = rounds;
        session.termination_reason = Some(reason);
        session
    }

    #[test]
    fn test_natural_completion_returns_final_text() {
        let s = session(TerminationReason::NaturalCompletion, vec![round(0, Some("4"), Vec::new())]);
        let response = assembler().assemble_final_response(&s);
        assert_eq!(response.text, "4");
        assert!(response.sources.is_empty());
    }

    #[test]
    fn test_natural_completion_without_rounds() {
        let s = session(TerminationReason::NaturalCompletion, Vec::new());
        assert_eq!(
            assembler().assemble_final_response(&s).text,
            "I couldn't process your question properly."
        );
    }

    #[test]
    fn test_natural_completion_skips_error_round() {
        let first = round(
            0,
            None,
            vec![execution(SEARCH_COURSE_CONTENT, true, "[Rust Basics - Lesson 2] Ownership moves values.")],
        );
        let error = Round::error(1, "q", "provider down", Duration::ZERO);
        let s = session(TerminationReason::NaturalCompletion, vec![first, error]);

        let response = assembler().assemble_final_response(&s);
        assert_eq!(response.text, "Ownership moves values.");
        assert_eq!(response.sources, vec![Source::new("Rust Basics - Lesson 2")]);
    }

    #[test]
    fn test_partial_without_rounds_uses_reason_message() {
        let s = session(TerminationReason::ContextOverflow, Vec::new());
        let response = assembler().handle_partial_completion(&s, TerminationReason::ContextOverflow);
        assert!(response.text.starts_with("Your question is quite complex"));
        assert!(response.sources.is_empty());

        let response = assembler().handle_partial_completion(&s, TerminationReason::ApiError);
        assert!(response.text.starts_with("I'm experiencing technical difficulties"));
        let response = assembler().handle_partial_completion(&s, TerminationReason::ToolFailure);
        assert!(response.text.starts_with("I'm having trouble accessing the course materials"));
        let response = assembler().handle_partial_completion(&s, TerminationReason::UserCancellation);
        assert!(response.text.starts_with("I couldn't process your question."));
    }

    #[test]
    fn test_partial_returns_best_response_unmodified() {
        let s = session(
            TerminationReason::ContextOverflow,
            vec![round(0, Some("Closures capture variables by reference."), Vec::new())],
        );
        let response = assembler().handle_partial_completion(&s, TerminationReason::ContextOverflow);
        assert_eq!(response.text, "Closures capture variables by reference.");
    }

    #[test]
    fn test_partial_skips_error_like_final_text() {
        let s = session(
            TerminationReason::MaxRoundsReached,
            vec![
                round(0, Some("Traits define shared behavior."), Vec::new()),
                round(1, Some("The search failed to return anything."), Vec::new()),
            ],
        );
        let response = assembler().assemble_final_response(&s);
        assert_eq!(response.text, "Traits define shared behavior.");
    }

    #[test]
    fn test_partial_synthesizes_with_reason_prefix() {
        let s = session(
            TerminationReason::MaxRoundsReached,
            vec![
                round(0, None, vec![execution(SEARCH_COURSE_CONTENT, true, "[Go - Lesson 1] Goroutines are cheap.")]),
                round(1, None, vec![execution(GET_COURSE_OUTLINE, true, "Course: Go\n\nLesson 1: Intro")]),
            ],
        );
        let response = assembler().assemble_final_response(&s);
        assert_eq!(
            response.text,
            "I've gathered some information but need more rounds to provide a complete answer. \
             Here's what I found: Goroutines are cheap. Course: Go"
        );
        assert_eq!(response.sources, vec![Source::new("Go - Lesson 1")]);
    }

    #[test]
    fn test_partial_without_findings_reports_no_information() {
        let s = session(
            TerminationReason::ToolFailure,
            vec![round(0, None, vec![execution(SEARCH_COURSE_CONTENT, false, "Error: offline")])],
        );
        let response = assembler().assemble_final_response(&s);
        assert_eq!(
            response.text,
            format!("{}{}", partial_prefix(TerminationReason::ToolFailure), NO_INFORMATION)
        );
    }

    #[test]
    fn test_partial_responses_disabled() {
        let assembler = StandardResponseAssembler::new(Arc::new(ReasoningConfig {
            enable_partial_responses: false,
            ..ReasoningConfig::default()
        }));
        let s = session(
            TerminationReason::MaxRoundsReached,
            vec![round(0, Some("A partial answer."), Vec::new())],
        );
        let response = assembler.assemble_final_response(&s);
        assert_eq!(response.text, no_rounds_message(TerminationReason::MaxRoundsReached));
        assert!(response.sources.is_empty());
    }

    #[test]
    fn test_sources_deduplicated_across_results() {
        let s = session(
            TerminationReason::NaturalCompletion,
            vec![
                round(
                    0,
                    None,
                    vec![execution(SEARCH_COURSE_CONTENT, true, "[Advanced Python - Lesson 3] Decorators.")],
                ),
                round(
                    1,
                    Some("Decorators wrap functions."),
                    vec![execution(SEARCH_COURSE_CONTENT, true, "[Advanced Python - Lesson 3] More on decorators.")],
                ),
            ],
        );
        let sources = assembler().extract_sources(&s);
        assert_eq!(sources, vec![Source::new("Advanced Python - Lesson 3")]);
    }

    #[test]
    fn test_sources_only_from_search_tools() {
        let s = session(
            TerminationReason::NaturalCompletion,
            vec![round(
                0,
                Some("done"),
                vec![
                    execution(GET_COURSE_OUTLINE, true, "[Rust Basics] outline"),
                    execution(SEARCH_COURSE_CONTENT, false, "[Ignored - Lesson 1] failed"),
                    execution("search_course_content (via get_course_outline)", true, "[Rust Basics] outline"),
                ],
            )],
        );
        assert_eq!(assembler().extract_sources(&s), vec![Source::new("Rust Basics")]);
    }

    #[test]
    fn test_lesson_pattern_takes_precedence_over_bare_course() {
        let sources = sources_from_search_result("[Go  - Lesson 4] text [Go - Lesson 5] see [Appendix]");
        assert_eq!(sources, vec![Source::new("Go - Lesson 4"), Source::new("Go - Lesson 5")]);
    }

    #[test]
    fn test_meaningful_content_cut_at_sentence_boundary() {
        let sentence = "This sentence is exactly forty chars ok";
        let long = format!("[C - Lesson 1] {}", [sentence; 8].join("."));
        let content = extract_meaningful_content(&long);
        assert!(content.chars().count() <= 200);
        assert!(content.ends_with('.'));
        assert!(!content.starts_with('['));

        let run_on = "x".repeat(250);
        assert_eq!(extract_meaningful_content(&run_on), format!("{}...", "x".repeat(200)));
        assert_eq!(extract_meaningful_content("No results"), "");
    }
}

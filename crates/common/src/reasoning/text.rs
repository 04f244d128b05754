//! Character-safe string helpers shared by the synthesizer and assembler

use regex_lite::Regex;
use std::sync::OnceLock;

/// Compile `pattern` once into `cell`; `None` if the pattern is invalid.
pub fn cached_regex(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

/// First `max_chars` characters of `text`
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Truncate to `max_chars` characters, appending `...` only when something was cut
pub fn ellipsize(text: &str, max_chars: usize) -> String {
    let head = truncate_chars(text, max_chars);
    if head.len() < text.len() {
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

/// Number of characters (not bytes)
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

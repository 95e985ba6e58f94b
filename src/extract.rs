//! Lenient extraction of JSON records from noisy collaborator text.
//!
//! Strategies run in a fixed order and the first one that yields a value of
//! the requested type wins:
//!
//! 1. `Strict`: the whole (trimmed) text parses.
//! 2. `Fenced`: the body of a ```` ```json ```` (or bare ```` ``` ````) block parses.
//! 3. `Balanced`: a brace/bracket-balanced span, scanned with string and
//!    escape awareness, parses.

use regex::Regex;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::LazyLock;

static FENCED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json|JSON)?[ \t]*\r?\n(.*?)```").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Strict,
    Fenced,
    Balanced,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Strategy::Strict => "strict",
            Strategy::Fenced => "fenced",
            Strategy::Balanced => "balanced",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Extracted<T> {
    Parsed { value: T, strategy: Strategy },
    Unparseable { reason: String },
}

impl<T> Extracted<T> {
    pub fn ok(self) -> Option<T> {
        match self {
            Extracted::Parsed { value, .. } => Some(value),
            Extracted::Unparseable { .. } => None,
        }
    }

    pub fn is_parsed(&self) -> bool {
        matches!(self, Extracted::Parsed { .. })
    }
}

pub fn extract_json<T: DeserializeOwned>(text: &str) -> Extracted<T> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Extracted::Unparseable {
            reason: "empty input".to_string(),
        };
    }

    let strict_error = match serde_json::from_str::<T>(trimmed) {
        Ok(value) => {
            return Extracted::Parsed {
                value,
                strategy: Strategy::Strict,
            };
        }
        Err(e) => e.to_string(),
    };

    for caps in FENCED_BLOCK.captures_iter(text) {
        if let Ok(value) = serde_json::from_str::<T>(caps[1].trim()) {
            return Extracted::Parsed {
                value,
                strategy: Strategy::Fenced,
            };
        }
    }

    for (start, ch) in text.char_indices() {
        if ch != '{' && ch != '[' {
            continue;
        }
        if let Some(span) = balanced_span(&text[start..])
            && let Ok(value) = serde_json::from_str::<T>(span)
        {
            return Extracted::Parsed {
                value,
                strategy: Strategy::Balanced,
            };
        }
    }

    Extracted::Unparseable {
        reason: format!("no strategy produced a value: {}", strict_error),
    }
}

/// The shortest prefix of `text` (which starts at an opener) whose
/// delimiters balance, ignoring delimiters inside string literals.
fn balanced_span(text: &str) -> Option<&str> {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.pop() != Some(ch) {
                    return None;
                }
                if stack.is_empty() {
                    return Some(&text[..i + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

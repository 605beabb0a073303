use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single input line with its position in the overall input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLine {
    pub index: u64,
    pub text: String,
}

/// A log line prepared for matching.
///
/// `content` is the tail extracted by the library's head pattern, or `None`
/// when the head did not match this line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub line_index: u64,
    pub raw: String,
    pub content: Option<String>,
}

impl LogEntry {
    /// Build an entry with no head-extracted content.
    pub const fn new(line_index: u64, raw: String) -> Self {
        Self {
            line_index,
            raw,
            content: None,
        }
    }

    /// The text a template with the given `content_only` flag matches against.
    ///
    /// Content-only templates match the head-extracted tail; when the head
    /// failed for this line the raw text is used instead.
    pub fn target_text(&self, content_only: bool) -> &str {
        if content_only {
            self.content.as_deref().unwrap_or(&self.raw)
        } else {
            &self.raw
        }
    }
}

/// The result of matching one line against a committed template.
///
/// `content` is only set when it differs from `raw`, so reports do not
/// duplicate the full line for libraries without a head pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub line_index: u64,
    pub raw: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub template_id: String,
    pub template_pattern: String,
    pub variables: BTreeMap<String, String>,
}

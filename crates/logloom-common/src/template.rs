use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Provenance and head-pattern annotations carried by a persisted template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateMetadata {
    /// When true the template matches head-extracted content, not the raw line.
    #[serde(default)]
    pub content_only: bool,
    /// The head pattern that was active when the template was learned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head_pattern: Option<String>,
    /// The raw line the template was derived from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_sample: Option<String>,
    /// The head-extracted content of `raw_sample`, when a head was active.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_sample: Option<String>,
    /// Which agent produced the template (`parsing` or `refine`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

/// A committed template as persisted in a library.
///
/// The placeholder template interleaves literal text with `⟪value⟫` spans;
/// `example_values` maps the positional names `v1..vN` to the raw values the
/// placeholders carried when the template was learned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateRecord {
    pub id: String,
    pub placeholder_template: String,
    #[serde(default)]
    pub example_values: BTreeMap<String, String>,
    #[serde(default)]
    pub metadata: TemplateMetadata,
    #[serde(default)]
    pub created_at: String,
}

/// One historical match kept in a library's ring buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedSample {
    pub seq: i64,
    pub template_id: Option<String>,
    pub line_index: u64,
    pub raw: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

impl MatchedSample {
    /// The text the owning template matched, honoring its `content_only` flag.
    ///
    /// Returns `None` for content-only samples whose head content is missing;
    /// such samples cannot participate in conflict checks.
    pub fn target_text(&self, content_only: bool) -> Option<&str> {
        if content_only {
            self.content.as_deref()
        } else {
            Some(&self.raw)
        }
    }
}

/// A consistent in-memory snapshot of one library.
///
/// Templates are ordered by creation time (matching precedence order);
/// samples hold at most the store's ring-buffer budget, newest last.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LibraryView {
    pub id: String,
    pub templates: Vec<TemplateRecord>,
    pub samples: Vec<MatchedSample>,
    pub head_pattern: Option<String>,
}

impl LibraryView {
    /// Look up a live template by id.
    pub fn template(&self, id: &str) -> Option<&TemplateRecord> {
        self.templates.iter().find(|t| t.id == id)
    }
}

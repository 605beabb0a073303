use serde::{Deserialize, Serialize};

/// Pipeline stage a failure or event is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Routing,
    Head,
    Parsing,
    Validation,
    Refine,
    Matching,
    Update,
    Store,
}

impl Stage {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Routing => "routing",
            Self::Head => "head",
            Self::Parsing => "parsing",
            Self::Validation => "validation",
            Self::Refine => "refine",
            Self::Matching => "matching",
            Self::Update => "update",
            Self::Store => "store",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A line-level failure captured during a run.
///
/// Failures never abort the pipeline; they are collected in memory and
/// written to the run's `*-failures.jsonl` report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub line_index: u64,
    pub raw: String,
    pub stage: Stage,
    pub reason: String,
    pub timestamp: String,
    /// Snapshot of the placeholder template involved, when one existed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

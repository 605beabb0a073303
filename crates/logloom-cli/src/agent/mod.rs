//! Typed LM agent facade.
//!
//! Four agents — routing, parsing, refine, head — differ only in prompt and
//! response schema. Everything behind the traits (transport, retries, model
//! selection) stays out of the orchestrator: it consumes the four output
//! shapes and the shared [`AgentOutcome`] envelope, nothing else.

mod client;
mod prompts;

pub use client::{DEFAULT_BASE_URL, DEFAULT_MODEL, LmClient, LmConfig};

use serde::Deserialize;

/// Result envelope shared by every agent call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentOutcome<T> {
    Success(T),
    /// The agent needs data the pipeline did not provide.
    NeedsInput(Vec<String>),
    /// Transient failure (transport, rate limit, schema mismatch after retry).
    Retryable {
        issues: Vec<String>,
        diagnostics: Option<String>,
    },
    /// Unrecoverable failure (bad credentials, unsupported model).
    Fatal(Vec<String>),
}

impl<T> AgentOutcome<T> {
    /// Collapse the envelope into a `Result`, flattening every failure arm
    /// into its issue list joined for display.
    pub fn into_result(self) -> Result<T, String> {
        match self {
            Self::Success(v) => Ok(v),
            Self::NeedsInput(issues) | Self::Fatal(issues) => Err(issues.join("; ")),
            Self::Retryable { issues, diagnostics } => {
                let mut msg = issues.join("; ");
                if let Some(diag) = diagnostics
                    && !diag.is_empty()
                {
                    msg.push_str(" (");
                    msg.push_str(&diag);
                    msg.push(')');
                }
                Err(msg)
            }
        }
    }
}

/// Classification of a batch of sample lines into a log-source type.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RoutingOutput {
    /// Free-form source type, slugified into a library id by the caller.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub evidence: Option<String>,
}

/// An annotated placeholder template for one line.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ParsingOutput {
    pub template: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub example: Option<String>,
}

/// How a conflict between a candidate and an existing template is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefineAction {
    /// Make the candidate stricter so existing matches stay put.
    RefineCandidate,
    /// The candidate generalizes the existing template; adopt it instead.
    AdoptCandidate,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RefineOutput {
    pub action: RefineAction,
    pub template: String,
    #[serde(default)]
    pub explain: Option<String>,
}

/// A head-pattern candidate for a library.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HeadOutput {
    pub pattern: String,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Everything the refine agent needs to arbitrate one conflict.
#[derive(Debug, Clone)]
pub struct RefineRequest<'a> {
    pub candidate_template: &'a str,
    pub candidate_sample: &'a str,
    pub existing_template: &'a str,
    pub existing_samples: &'a [String],
}

pub trait RoutingAgent {
    /// Classify sample lines into a log-source type.
    fn classify(&self, samples: &[String]) -> AgentOutcome<RoutingOutput>;
}

pub trait ParsingAgent {
    /// Derive an annotated template for a single line.
    fn derive_template(&self, line: &str) -> AgentOutcome<ParsingOutput>;
}

pub trait RefineAgent {
    /// Resolve a conflict between a candidate and an existing template.
    fn refine(&self, request: &RefineRequest<'_>) -> AgentOutcome<RefineOutput>;
}

pub trait HeadAgent {
    /// Derive (or refine, when `previous` is set) a head pattern from samples.
    fn derive_head(&self, samples: &[String], previous: Option<&str>) -> AgentOutcome<HeadOutput>;
}

/// The full agent suite the pipeline is driven by.
pub trait AgentSuite: RoutingAgent + ParsingAgent + RefineAgent + HeadAgent {}

impl<T: RoutingAgent + ParsingAgent + RefineAgent + HeadAgent> AgentSuite for T {}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn outcome_success_flattens_to_ok() {
        let outcome: AgentOutcome<u32> = AgentOutcome::Success(7);
        assert_eq!(outcome.into_result(), Ok(7));
    }

    #[test]
    fn outcome_retryable_includes_diagnostics() {
        let outcome: AgentOutcome<u32> = AgentOutcome::Retryable {
            issues: vec!["schema mismatch".to_string()],
            diagnostics: Some("missing field `template`".to_string()),
        };
        let err = outcome.into_result().unwrap_err();
        assert!(err.contains("schema mismatch"));
        assert!(err.contains("missing field"));
    }

    #[test]
    fn refine_action_parses_snake_case() {
        let out: RefineOutput = serde_json::from_str(
            r#"{"action": "adopt_candidate", "template": "User ⟪x⟫ logged in"}"#,
        )
        .unwrap();
        assert_eq!(out.action, RefineAction::AdoptCandidate);
    }

    #[test]
    fn routing_output_reads_type_field() {
        let out: RoutingOutput =
            serde_json::from_str(r#"{"type": "Nginx Access Log", "evidence": "GET /"}"#).unwrap();
        assert_eq!(out.kind, "Nginx Access Log");
    }
}

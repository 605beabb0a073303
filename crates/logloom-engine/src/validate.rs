//! Candidate template validation.
//!
//! A candidate is committed only after (a) it compiles, (b) its anchored
//! regex matches the full target text of the sample it was derived from, and
//! (c) the placeholder round-trip reproduces that text. The codec performs
//! (a) and (c); this module layers target selection and the full-line check.

use logloom_common::entry::LogEntry;
use logloom_common::template::TemplateRecord;

use crate::codec::{self, CodecError, CompiledTemplate};
use crate::head::HeadPattern;

/// Why a candidate template was rejected.
#[derive(Debug)]
pub enum ValidateError {
    /// The template is content-only but the entry has no head-extracted content.
    MissingContent,
    /// Round-trip or compilation failure from the codec.
    Codec(CodecError),
    /// The compiled regex did not cover the full target text.
    NoMatch { target: String },
}

impl std::fmt::Display for ValidateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingContent => write!(f, "entry has no head content for a content-only template"),
            Self::Codec(e) => write!(f, "{e}"),
            Self::NoMatch { target } => {
                write!(f, "compiled template does not match the full line {target:?}")
            }
        }
    }
}

impl std::error::Error for ValidateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Codec(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CodecError> for ValidateError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

/// Annotate a freshly parsed candidate with the head context it was derived
/// under.
///
/// When a head pattern is active and extracted content for the entry, the
/// candidate becomes content-only and records the head pattern plus a
/// raw/content sample pair. The sample pair lets the match engine and the
/// conflict detector pick the correct target text later.
pub fn attach_head_metadata(record: &mut TemplateRecord, entry: &LogEntry, head: Option<&HeadPattern>) {
    record.metadata.raw_sample = Some(entry.raw.clone());
    let Some(head) = head else {
        return;
    };
    if let Some(content) = &entry.content {
        record.metadata.content_only = true;
        record.metadata.head_pattern = Some(head.pattern().to_string());
        record.metadata.content_sample = Some(content.clone());
    }
}

/// Validate a candidate template against the entry it was derived from.
///
/// Returns the compiled template on success; its `placeholder_template` may
/// differ from the record's when duplication repair rewrote a value.
///
/// # Errors
///
/// [`ValidateError::MissingContent`] when a content-only candidate meets an
/// entry without head content, [`ValidateError::Codec`] for round-trip or
/// compile failures, [`ValidateError::NoMatch`] when the anchored regex does
/// not cover the whole target.
pub fn validate(record: &TemplateRecord, entry: &LogEntry) -> Result<CompiledTemplate, ValidateError> {
    let target = if record.metadata.content_only {
        entry.content.as_deref().ok_or(ValidateError::MissingContent)?
    } else {
        &entry.raw
    };

    let compiled = codec::compile(&record.placeholder_template, Some(target))?;
    if !compiled.is_match(target) {
        return Err(ValidateError::NoMatch {
            target: target.to_string(),
        });
    }
    Ok(compiled)
}

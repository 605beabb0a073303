//! Head-pattern evaluation.
//!
//! A head pattern is a regex that matches every line of a library and exposes
//! the per-line variable tail through a `content` group (named `content`, or
//! the first capture group when unnamed). Deriving and refining head patterns
//! is driven elsewhere; this module only compiles and applies them.

use anyhow::Context as _;
use regex::Regex;

/// A compiled head pattern.
#[derive(Debug, Clone)]
pub struct HeadPattern {
    regex: Regex,
    pattern: String,
}

impl HeadPattern {
    /// Compile a head pattern candidate.
    ///
    /// # Errors
    ///
    /// Fails when the pattern is not a valid regex or exposes no capture
    /// group at all — a head without a content group cannot split lines.
    pub fn compile(pattern: &str) -> anyhow::Result<Self> {
        let regex = Regex::new(pattern).with_context(|| format!("invalid head pattern {pattern:?}"))?;
        let has_named = regex.capture_names().flatten().any(|n| n == "content");
        if !has_named && regex.captures_len() < 2 {
            anyhow::bail!("head pattern {pattern:?} exposes no content group");
        }
        Ok(Self {
            regex,
            pattern: pattern.to_string(),
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Apply the head to one line.
    ///
    /// Returns `(matched, content)`. Content is the `content` named group if
    /// present, else capture group 1, else the whole line.
    pub fn extract(&self, raw: &str) -> (bool, Option<String>) {
        let Some(caps) = self.regex.captures(raw) else {
            return (false, None);
        };
        let content = caps
            .name("content")
            .or_else(|| caps.get(1))
            .map_or(raw, |m| m.as_str());
        (true, Some(content.to_string()))
    }

    /// Indices of lines the head fails to match.
    pub fn unmatched_indices<S: AsRef<str>>(&self, lines: &[S]) -> Vec<usize> {
        lines
            .iter()
            .enumerate()
            .filter(|(_, line)| !self.regex.is_match(line.as_ref()))
            .map(|(i, _)| i)
            .collect()
    }
}

//! Placeholder template codec.
//!
//! An annotated template interleaves literal text with `⟪value⟫` placeholder
//! spans (U+27EA / U+27EB). Placeholder content is taken verbatim — there are
//! no escapes, the close marker is the sole terminator. Compiling turns the
//! template into a fully anchored regex with positional named groups
//! `v1..vN`, inferring each group's fragment from the placeholder's example
//! value.

use std::collections::BTreeMap;

use regex::Regex;

use logloom_common::hash::template_hash;

/// Placeholder open marker, fixed across the whole system.
pub const OPEN: &str = "\u{27EA}";
/// Placeholder close marker, fixed across the whole system.
pub const CLOSE: &str = "\u{27EB}";

/// One span of a parsed placeholder template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Placeholder(String),
}

/// Why a placeholder template could not be compiled.
#[derive(Debug)]
pub enum CodecError {
    /// The template string contained no segments at all.
    EmptyTemplate,
    /// Concatenating literals and example values did not reproduce the
    /// sample line, even after duplication repair.
    ReconstructionMismatch { reconstructed: String },
    /// The generated pattern was rejected by the regex engine.
    InvalidRegex(regex::Error),
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyTemplate => write!(f, "template has no content"),
            Self::ReconstructionMismatch { reconstructed } => {
                write!(f, "template does not reconstruct the sample (got {reconstructed:?})")
            }
            Self::InvalidRegex(e) => write!(f, "generated pattern is not a valid regex: {e}"),
        }
    }
}

impl std::error::Error for CodecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidRegex(e) => Some(e),
            _ => None,
        }
    }
}

/// A matcher-ready template: anchored regex plus capture bookkeeping.
///
/// Derived from a placeholder template, never persisted. `placeholder_template`
/// is the effective template after duplication repair, which may differ from
/// the input string.
#[derive(Debug, Clone)]
pub struct CompiledTemplate {
    pub regex: Regex,
    pub pattern: String,
    pub variable_order: Vec<String>,
    pub example_values: BTreeMap<String, String>,
    pub placeholder_template: String,
}

impl CompiledTemplate {
    /// Match the full target text, returning the captured variable map.
    ///
    /// The pattern is anchored, so a match always covers the whole text.
    pub fn capture(&self, target: &str) -> Option<BTreeMap<String, String>> {
        let caps = self.regex.captures(target)?;
        Some(decode(&caps, &self.variable_order))
    }

    /// Whether the template matches the full target text.
    pub fn is_match(&self, target: &str) -> bool {
        self.regex.is_match(target)
    }

    /// Cache key for templates that have no library id yet.
    pub fn content_hash(&self) -> String {
        template_hash(&self.placeholder_template, &self.example_values)
    }
}

/// Split a placeholder template into literal and placeholder segments.
///
/// Scans left to right with an explicit cursor (no recursion). An open marker
/// with no matching close is kept as literal text so no data is lost.
pub fn parse_template(template: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut rest = template;

    while !rest.is_empty() {
        let Some(open_at) = rest.find(OPEN) else {
            segments.push(Segment::Literal(rest.to_string()));
            break;
        };
        let after_open = open_at + OPEN.len();
        let Some(close_rel) = rest[after_open..].find(CLOSE) else {
            // Unterminated placeholder: the whole remainder is literal.
            segments.push(Segment::Literal(rest.to_string()));
            break;
        };
        if open_at > 0 {
            segments.push(Segment::Literal(rest[..open_at].to_string()));
        }
        let value = &rest[after_open..after_open + close_rel];
        segments.push(Segment::Placeholder(value.to_string()));
        rest = &rest[after_open + close_rel + CLOSE.len()..];
    }

    segments
}

/// Reassemble segments into the annotated template string.
fn render_segments(segments: &[Segment]) -> String {
    let mut out = String::new();
    for seg in segments {
        match seg {
            Segment::Literal(text) => out.push_str(text),
            Segment::Placeholder(value) => {
                out.push_str(OPEN);
                out.push_str(value);
                out.push_str(CLOSE);
            }
        }
    }
    out
}

/// Concatenate literals and raw placeholder values.
fn reconstruct(segments: &[Segment]) -> String {
    let mut out = String::new();
    for seg in segments {
        match seg {
            Segment::Literal(text) | Segment::Placeholder(text) => out.push_str(text),
        }
    }
    out
}

/// Compile a placeholder template, optionally verifying it against the sample
/// line that produced it.
///
/// When `sample` is given the reconstruction (literals + example values) must
/// equal it; a mismatch first goes through duplication repair (LMs sometimes
/// return a value doubled, e.g. `10.0.0.110.0.0.1` for `10.0.0.1`) before
/// being rejected.
///
/// # Errors
///
/// [`CodecError::EmptyTemplate`] for a template with no segments,
/// [`CodecError::ReconstructionMismatch`] when the sample check fails after
/// repair, [`CodecError::InvalidRegex`] when the generated pattern does not
/// compile.
pub fn compile(template: &str, sample: Option<&str>) -> Result<CompiledTemplate, CodecError> {
    let mut segments = parse_template(template);
    if segments.is_empty() {
        return Err(CodecError::EmptyTemplate);
    }

    if let Some(sample) = sample {
        let rebuilt = reconstruct(&segments);
        if rebuilt != sample {
            repair_duplicated_values(&mut segments, sample);
            let repaired = reconstruct(&segments);
            if repaired != sample {
                return Err(CodecError::ReconstructionMismatch {
                    reconstructed: repaired,
                });
            }
        }
    }

    let mut pattern = String::from("^");
    let mut variable_order = Vec::new();
    let mut example_values = BTreeMap::new();

    for seg in &segments {
        match seg {
            Segment::Literal(text) => escape_literal(text, &mut pattern),
            Segment::Placeholder(value) => {
                let name = format!("v{}", variable_order.len() + 1);
                pattern.push_str("(?P<");
                pattern.push_str(&name);
                pattern.push('>');
                pattern.push_str(&infer_fragment(value));
                pattern.push(')');
                example_values.insert(name.clone(), value.clone());
                variable_order.push(name);
            }
        }
    }
    pattern.push('$');

    let regex = Regex::new(&pattern).map_err(CodecError::InvalidRegex)?;
    Ok(CompiledTemplate {
        regex,
        pattern,
        variable_order,
        example_values,
        placeholder_template: render_segments(&segments),
    })
}

/// Read captured variables out of a match, by name with positional fallback.
pub fn decode(caps: &regex::Captures<'_>, variable_order: &[String]) -> BTreeMap<String, String> {
    let mut vars = BTreeMap::new();
    for (i, name) in variable_order.iter().enumerate() {
        let value = caps
            .name(name)
            .or_else(|| caps.get(i + 1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        vars.insert(name.clone(), value);
    }
    vars
}

/// Shrink placeholder values that are literal repetitions of a prefix which
/// actually appears in the sample.
///
/// For each value not found in the sample, candidate prefix lengths are tried
/// from `len/2` down to 1; the first prefix that tiles the value exactly and
/// occurs in the sample replaces it.
fn repair_duplicated_values(segments: &mut [Segment], sample: &str) {
    for seg in segments {
        let Segment::Placeholder(value) = seg else {
            continue;
        };
        if value.is_empty() || sample.contains(value.as_str()) {
            continue;
        }
        if let Some(prefix) = shrink_repeated(value, sample) {
            *value = prefix;
        }
    }
}

/// Find the shortest-covering prefix repair candidate for `value`.
fn shrink_repeated(value: &str, sample: &str) -> Option<String> {
    let len = value.len();
    for k in (1..=len / 2).rev() {
        if !value.is_char_boundary(k) || len % k != 0 {
            continue;
        }
        let prefix = &value[..k];
        let tiles = value.as_bytes().chunks(k).all(|c| c == prefix.as_bytes());
        if tiles && sample.contains(prefix) {
            return Some(prefix.to_string());
        }
    }
    None
}

/// Characters that must be escaped when a literal lands in a pattern.
const META: &[char] = &[
    '\\', '.', '+', '*', '?', '(', ')', '|', '[', ']', '{', '}', '^', '$',
];

/// Append a literal text span to the pattern, regex-escaped.
fn escape_literal(text: &str, pattern: &mut String) {
    for c in text.chars() {
        if META.contains(&c) {
            pattern.push('\\');
            pattern.push(c);
        } else if c.is_control() {
            push_codepoint_escape(c, pattern);
        } else {
            pattern.push(c);
        }
    }
}

/// Escape one character as `\xHH` (ASCII) or `\u{…}` (everything else).
fn push_codepoint_escape(c: char, pattern: &mut String) {
    let cp = c as u32;
    if cp <= 0x7F {
        pattern.push_str(&format!("\\x{cp:02X}"));
    } else {
        pattern.push_str(&format!("\\u{{{cp:X}}}"));
    }
}

/// True for characters that collapse into the word-run character class.
fn is_run_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '/' || c == '-'
}

/// Infer a capture fragment from a placeholder's example value.
///
/// Runs of `[A-Za-z0-9_/-]` collapse to one `[A-Za-z0-9_/-]+`, whitespace
/// runs to `\s+`, everything else is escaped per character. An empty value
/// matches any content up to the end of the line.
fn infer_fragment(value: &str) -> String {
    if value.is_empty() {
        return "[^\\r\\n]*".to_string();
    }

    let mut fragment = String::new();
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        if is_run_char(c) {
            while chars.peek().is_some_and(|&n| is_run_char(n)) {
                chars.next();
            }
            fragment.push_str("[A-Za-z0-9_/-]+");
        } else if c.is_whitespace() {
            while chars.peek().is_some_and(|n| n.is_whitespace()) {
                chars.next();
            }
            fragment.push_str("\\s+");
        } else if META.contains(&c) {
            fragment.push('\\');
            fragment.push(c);
        } else if c.is_ascii() && !c.is_control() {
            fragment.push(c);
        } else {
            push_codepoint_escape(c, &mut fragment);
        }
    }
    fragment
}

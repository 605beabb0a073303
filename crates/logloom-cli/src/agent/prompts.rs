//! Prompt construction for the four agents.
//!
//! The STRUCTURE / BUSINESS DATA preamble is part of the agent contract:
//! every prompt embeds it verbatim so model behavior stays consistent across
//! agents and releases. Do not reword it casually.

use super::RefineRequest;

/// Shared knowledge preamble, embedded verbatim in every agent prompt.
pub const KNOWLEDGE: &str = "\
A log line is made of two kinds of text.
STRUCTURE is the constant skeleton that defines what the entry means: fixed \
words, punctuation, field labels. It is identical across all lines produced \
by the same logging statement.
BUSINESS DATA is the dynamic, instance-specific part: timestamps, user names, \
identifiers, addresses, paths, numbers, durations. It changes from line to \
line while the structure stays the same.
A template keeps STRUCTURE as literal text and marks each BUSINESS DATA span \
by wrapping its value in \u{27EA} and \u{27EB}, for example: \
User \u{27EA}alice\u{27EB} logged in at \u{27EA}14:30\u{27EB}. \
Placeholders carry the raw value exactly as it appears in the line, never a \
name or a type.";

/// System prompt for the routing (classification) agent.
pub fn routing_system() -> String {
    format!(
        "{KNOWLEDGE}\n\nYou classify log samples by their source. Respond with a single JSON \
         object: {{\"type\": \"<short source name>\", \"evidence\": \"<optional hint>\"}}."
    )
}

pub fn routing_user(samples: &[String]) -> String {
    let mut out = String::from("Classify the source of these log lines:\n");
    for line in samples {
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// System prompt for the parsing (template derivation) agent.
pub fn parsing_system() -> String {
    format!(
        "{KNOWLEDGE}\n\nYou convert one log line into a template. Copy the line exactly, then \
         wrap every BUSINESS DATA span in \u{27EA} and \u{27EB}, leaving STRUCTURE untouched. \
         The template with markers removed must reproduce the line byte for byte. Respond with \
         a single JSON object: {{\"template\": \"<annotated line>\", \"description\": \
         \"<optional>\", \"example\": \"<optional>\"}}."
    )
}

pub fn parsing_user(line: &str) -> String {
    format!("Annotate this log line:\n{line}")
}

/// System prompt for the refine (conflict resolution) agent.
pub fn refine_system() -> String {
    format!(
        "{KNOWLEDGE}\n\nA candidate template also matches lines that belong to an existing \
         template. Decide between two actions. Use \"refine_candidate\" when the candidate is \
         too loose: return a stricter template for the candidate's line that no longer matches \
         the existing template's lines. Use \"adopt_candidate\" when the existing template is \
         too specific and the candidate is its correct generalization: return the template that \
         should replace it. Respond with a single JSON object: {{\"action\": \
         \"refine_candidate\" | \"adopt_candidate\", \"template\": \"<annotated line>\", \
         \"explain\": \"<optional>\"}}."
    )
}

pub fn refine_user(request: &RefineRequest<'_>) -> String {
    let mut out = format!(
        "Candidate template:\n{}\nCandidate line:\n{}\n\nExisting template:\n{}\nLines matched by the existing template:\n",
        request.candidate_template, request.candidate_sample, request.existing_template
    );
    for line in request.existing_samples {
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// System prompt for the head (line prefix) agent.
pub fn head_system() -> String {
    format!(
        "{KNOWLEDGE}\n\nYou derive one regular expression that matches EVERY line shown, \
         capturing the shared prefix (timestamps, levels, host names) and exposing the \
         remainder in a named group: (?P<content>...). The pattern must start with ^ and \
         match complete lines. Respond with a single JSON object: {{\"pattern\": \"<regex>\", \
         \"notes\": \"<optional>\"}}."
    )
}

pub fn head_user(samples: &[String], previous: Option<&str>) -> String {
    let mut out = String::new();
    if let Some(prev) = previous {
        out.push_str("The previous pattern failed to match some of these lines:\n");
        out.push_str(prev);
        out.push_str("\n\n");
    }
    out.push_str("Lines:\n");
    for line in samples {
        out.push_str(line);
        out.push('\n');
    }
    out
}

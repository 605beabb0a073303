//! Conflict detection against historical matched samples.
//!
//! A candidate conflicts with an existing template when it also matches raw
//! samples attributed to that template — the candidate is less specific than
//! (or overlaps) something already in the library. Committing it would break
//! the library's post-commit mutual exclusion, so the orchestrator must
//! resolve the overlap first.

use std::collections::BTreeMap;

use logloom_common::template::LibraryView;

use crate::codec::CompiledTemplate;

/// Map of existing-template id → raw samples the candidate would steal.
pub type ConflictMap = BTreeMap<String, Vec<String>>;

/// Test a compiled candidate against every sample in the library's ring
/// buffer.
///
/// Only samples owned by a template that still exists count (orphans are
/// ignored); content-only samples with missing head content are skipped. The
/// candidate's `content_only` flag decides which sample text it is run
/// against.
pub fn find_conflicts(
    candidate: &CompiledTemplate,
    candidate_content_only: bool,
    library: &LibraryView,
) -> ConflictMap {
    let mut conflicts = ConflictMap::new();

    for sample in &library.samples {
        let Some(owner_id) = sample.template_id.as_deref() else {
            continue;
        };
        if library.template(owner_id).is_none() {
            continue;
        }
        let Some(target) = sample.target_text(candidate_content_only) else {
            continue;
        };
        if candidate.is_match(target) {
            let raws = conflicts.entry(owner_id.to_string()).or_default();
            if !raws.contains(&sample.raw) {
                raws.push(sample.raw.clone());
            }
        }
    }

    conflicts
}

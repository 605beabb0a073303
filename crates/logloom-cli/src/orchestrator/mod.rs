//! The per-batch learning pipeline.
//!
//! Drives routing → head derivation → initial match → the per-line loop
//! (parse, validate, conflict check, refine, commit) → batch summary. The
//! orchestrator is single-writer: agent calls and store writes happen
//! sequentially, and the outcome for line *i* is fully applied before line
//! *i+1* starts. Only the match engine fans out internally.
//!
//! Line-level problems never abort a batch; they become failure records and
//! the line lands in the unresolved list. Only routing failure and store
//! errors propagate as `Err`.

use std::collections::{HashSet, VecDeque};

use logloom_common::entry::{LogEntry, MatchRecord, RawLine};
use logloom_common::failure::{FailureRecord, Stage};
use logloom_common::slug::slugify;
use logloom_common::template::{LibraryView, TemplateRecord};
use logloom_engine::codec::CompiledTemplate;
use logloom_engine::conflict::{self, ConflictMap};
use logloom_engine::head::HeadPattern;
use logloom_engine::matcher::{self, TemplateCache};
use logloom_engine::validate;

use serde::Serialize;

use crate::agent::{AgentOutcome, AgentSuite, RefineAction, RefineRequest};
use crate::head_manager;
use crate::observer::{Change, Observer, StageEvent};
use crate::store::Store;

/// Refinement iteration budget per conflicted line.
pub const MAX_REFINE_ITERATIONS: usize = 5;
/// Lines sliced off the front of a batch for routing classification.
const ROUTING_SAMPLE_LINES: usize = 10;

/// Tunables threaded in from the runner.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    /// Pre-resolved library id (`--library`), bypassing routing entirely.
    pub library: Option<String>,
    /// Classification hint (`--source-hint`), slugified into the library id.
    pub source_hint: Option<String>,
    /// Stop spending LM calls once this few pending lines remain.
    pub skip_threshold: usize,
    /// Match-engine worker threads.
    pub workers: usize,
}

/// A line whose conflicts could not be cleared within the budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictReport {
    pub line_index: u64,
    pub raw: String,
    pub candidate_template: String,
    pub conflicting_templates: Vec<String>,
}

/// What one batch did.
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub library: String,
    pub total_lines: usize,
    pub matched: Vec<MatchRecord>,
    pub new_templates: Vec<String>,
    pub unresolved: Vec<RawLine>,
    pub conflicts: Vec<ConflictReport>,
    pub failures: Vec<FailureRecord>,
}

/// How the per-line loop disposed of one pending entry.
enum LineOutcome {
    Resolved,
    Unresolved,
}

pub struct Orchestrator<'a, A: AgentSuite + ?Sized> {
    store: &'a Store,
    agents: Option<&'a A>,
    observer: &'a dyn Observer,
    cache: TemplateCache,
    config: PipelineConfig,
}

impl<'a, A: AgentSuite + ?Sized> Orchestrator<'a, A> {
    pub fn new(
        store: &'a Store,
        agents: Option<&'a A>,
        observer: &'a dyn Observer,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            agents,
            observer,
            cache: TemplateCache::new(),
            config,
        }
    }

    /// Run the full pipeline over one batch of raw lines.
    ///
    /// # Errors
    ///
    /// Fails when no library id can be resolved (classification failed and no
    /// hint was given) or on store I/O errors. Line-level failures are
    /// captured in the summary instead.
    pub fn process_batch(&self, lines: &[RawLine]) -> anyhow::Result<BatchSummary> {
        let mut summary = BatchSummary {
            total_lines: lines.len(),
            ..BatchSummary::default()
        };

        let library = self.route(lines)?;
        self.observer.event(&StageEvent::Routing {
            library: library.clone(),
        });
        summary.library.clone_from(&library);

        let mut view = self.store.load_library(&library)?;

        let raw_texts: Vec<String> = lines.iter().map(|l| l.text.clone()).collect();
        let head = head_manager::ensure_head(
            self.store,
            &library,
            view.head_pattern.as_deref(),
            &raw_texts,
            self.agents,
            self.observer,
        )?;

        let entries: Vec<LogEntry> = lines
            .iter()
            .map(|line| {
                let content = head.as_ref().and_then(|h| h.extract(&line.text).1);
                LogEntry {
                    line_index: line.index,
                    raw: line.text.clone(),
                    content,
                }
            })
            .collect();

        // Initial pass against everything already in the library.
        let outcome =
            matcher::match_entries(&entries, &view.templates, &self.cache, self.config.workers)?;
        self.observer.event(&StageEvent::Matching {
            matched: outcome.matched.len(),
            unmatched: outcome.unmatched.len(),
        });
        self.store.record_matches(&library, &outcome.matched)?;
        view = self.store.load_library(&library)?;

        let mut matched_keys: HashSet<(u64, String)> = outcome
            .matched
            .iter()
            .map(|m| (m.line_index, m.raw.clone()))
            .collect();
        summary.matched.extend(outcome.matched);
        let mut pending: VecDeque<LogEntry> = outcome.unmatched.into();

        while let Some(entry) = pending.pop_front() {
            if self.config.skip_threshold > 0 && pending.len() + 1 <= self.config.skip_threshold {
                // Tail short-circuit: not worth more LM spend.
                summary.unresolved.push(raw_line(&entry));
                summary
                    .unresolved
                    .extend(pending.drain(..).map(|e| raw_line(&e)));
                break;
            }

            let disposition = self.learn_line(
                &library,
                &entry,
                head.as_ref(),
                &mut view,
                &mut pending,
                &mut matched_keys,
                &mut summary,
            )?;
            if matches!(disposition, LineOutcome::Unresolved) {
                summary.unresolved.push(raw_line(&entry));
            }
            self.observer.event(&StageEvent::BatchProgress {
                resolved: summary.matched.len(),
                pending: pending.len(),
            });
        }

        if !summary.unresolved.is_empty() {
            self.observer.event(&StageEvent::Unmatched {
                count: summary.unresolved.len(),
            });
        }
        Ok(summary)
    }

    /// Resolve the library id for this batch.
    fn route(&self, lines: &[RawLine]) -> anyhow::Result<String> {
        if let Some(library) = &self.config.library {
            return Ok(slugify(library));
        }
        if let Some(hint) = &self.config.source_hint {
            return Ok(slugify(hint));
        }
        let Some(agents) = self.agents else {
            anyhow::bail!("no library id: pass --library or --source-hint, or configure an LM");
        };
        let samples: Vec<String> = lines
            .iter()
            .take(ROUTING_SAMPLE_LINES)
            .map(|l| l.text.clone())
            .collect();
        match agents.classify(&samples) {
            AgentOutcome::Success(output) => Ok(slugify(&output.kind)),
            other => {
                let reason = other.into_result().err().unwrap_or_default();
                anyhow::bail!("log source classification failed: {reason}")
            }
        }
    }

    /// The per-line loop body: parse → validate → de-conflict → commit.
    #[allow(clippy::too_many_arguments)]
    fn learn_line(
        &self,
        library: &str,
        entry: &LogEntry,
        head: Option<&HeadPattern>,
        view: &mut LibraryView,
        pending: &mut VecDeque<LogEntry>,
        matched_keys: &mut HashSet<(u64, String)>,
        summary: &mut BatchSummary,
    ) -> anyhow::Result<LineOutcome> {
        let Some(agents) = self.agents else {
            summary.failures.push(failure_record(
                entry,
                Stage::Parsing,
                "no LM configured for template learning",
                None,
            ));
            return Ok(LineOutcome::Unresolved);
        };

        if head.is_some() && entry.content.is_none() {
            // The library has a head but it never matched this line; learning
            // from the raw text would split the library across two shapes.
            self.record_failure(
                summary,
                entry,
                Stage::Parsing,
                "head pattern did not match the line",
                None,
            );
            return Ok(LineOutcome::Unresolved);
        }

        self.observer.event(&StageEvent::Parsing {
            line_index: entry.line_index,
        });
        let parsed = match agents.derive_template(entry.target_text(true)).into_result() {
            Ok(output) => output,
            Err(reason) => {
                self.record_failure(summary, entry, Stage::Parsing, &reason, None);
                return Ok(LineOutcome::Unresolved);
            }
        };

        let mut candidate = new_candidate(&parsed.template, "parsing");
        validate::attach_head_metadata(&mut candidate, entry, head);

        let compiled = match self.validate_candidate(&mut candidate, entry, summary) {
            Some(ct) => ct,
            None => return Ok(LineOutcome::Unresolved),
        };

        let conflicts = conflict::find_conflicts(&compiled, candidate.metadata.content_only, view);
        if conflicts.is_empty() {
            self.finalize_template(
                library,
                candidate,
                entry,
                view,
                pending,
                matched_keys,
                summary,
            )?;
            return Ok(LineOutcome::Resolved);
        }

        self.resolve_conflicts(
            library,
            entry,
            head,
            candidate,
            conflicts,
            view,
            pending,
            matched_keys,
            summary,
        )
    }

    /// Validate a candidate, folding repair results back into the record.
    fn validate_candidate(
        &self,
        candidate: &mut TemplateRecord,
        entry: &LogEntry,
        summary: &mut BatchSummary,
    ) -> Option<CompiledTemplate> {
        match validate::validate(candidate, entry) {
            Ok(ct) => {
                self.observer.event(&StageEvent::Validation {
                    line_index: entry.line_index,
                    ok: true,
                });
                // Duplication repair may have rewritten placeholder values.
                candidate.placeholder_template.clone_from(&ct.placeholder_template);
                candidate.example_values.clone_from(&ct.example_values);
                Some(ct)
            }
            Err(e) => {
                self.observer.event(&StageEvent::Validation {
                    line_index: entry.line_index,
                    ok: false,
                });
                self.record_failure(
                    summary,
                    entry,
                    Stage::Validation,
                    &e.to_string(),
                    Some(candidate.placeholder_template.clone()),
                );
                None
            }
        }
    }

    /// The bounded refinement loop for a conflicted candidate.
    ///
    /// `refine_candidate` tightens the candidate and leaves the library
    /// untouched; `adopt_candidate` deletes the conflicting templates (the
    /// only place live templates are removed) and re-queues their orphaned
    /// samples at the end of pending once the replacement commits.
    #[allow(clippy::too_many_arguments, clippy::too_many_lines)]
    fn resolve_conflicts(
        &self,
        library: &str,
        entry: &LogEntry,
        head: Option<&HeadPattern>,
        mut candidate: TemplateRecord,
        mut conflicts: ConflictMap,
        view: &mut LibraryView,
        pending: &mut VecDeque<LogEntry>,
        matched_keys: &mut HashSet<(u64, String)>,
        summary: &mut BatchSummary,
    ) -> anyhow::Result<LineOutcome> {
        let Some(agents) = self.agents else {
            return Ok(LineOutcome::Unresolved);
        };
        let mut orphaned: Vec<LogEntry> = Vec::new();

        for iteration in 1..=MAX_REFINE_ITERATIONS {
            let Some((existing_id, offending)) = conflicts.iter().next() else {
                break;
            };
            let existing_id = existing_id.clone();
            let offending = offending.clone();
            let Some(existing) = view.template(&existing_id).cloned() else {
                conflicts.remove(&existing_id);
                continue;
            };

            let request = RefineRequest {
                candidate_template: &candidate.placeholder_template,
                candidate_sample: entry.target_text(candidate.metadata.content_only),
                existing_template: &existing.placeholder_template,
                existing_samples: &offending,
            };
            let refined = match agents.refine(&request).into_result() {
                Ok(output) => output,
                Err(reason) => {
                    self.record_failure(
                        summary,
                        entry,
                        Stage::Refine,
                        &reason,
                        Some(candidate.placeholder_template.clone()),
                    );
                    pending.extend(orphaned);
                    return Ok(LineOutcome::Unresolved);
                }
            };
            self.observer.event(&StageEvent::Refine {
                line_index: entry.line_index,
                iteration,
                action: match refined.action {
                    RefineAction::RefineCandidate => "refine_candidate".to_string(),
                    RefineAction::AdoptCandidate => "adopt_candidate".to_string(),
                },
            });

            if refined.action == RefineAction::AdoptCandidate {
                // The candidate generalizes what we have: remove the losers
                // and remember their history for re-matching.
                for id in conflicts.keys() {
                    let samples = self.store.delete_template(library, id)?;
                    self.cache.invalidate(id);
                    self.observer.event(&StageEvent::Update {
                        template_id: id.clone(),
                        change: Change::Deleted,
                    });
                    orphaned.extend(samples.into_iter().map(|s| LogEntry {
                        line_index: s.line_index,
                        raw: s.raw,
                        content: s.content,
                    }));
                }
                *view = self.store.load_library(library)?;
            }

            candidate = new_candidate(&refined.template, "refine");
            validate::attach_head_metadata(&mut candidate, entry, head);

            let Some(compiled) = self.validate_candidate(&mut candidate, entry, summary) else {
                pending.extend(orphaned);
                return Ok(LineOutcome::Unresolved);
            };

            conflicts = conflict::find_conflicts(&compiled, candidate.metadata.content_only, view);
            if conflicts.is_empty() {
                // Orphans re-queue behind genuinely new lines.
                pending.extend(orphaned);
                self.finalize_template(
                    library,
                    candidate,
                    entry,
                    view,
                    pending,
                    matched_keys,
                    summary,
                )?;
                return Ok(LineOutcome::Resolved);
            }
        }

        summary.conflicts.push(ConflictReport {
            line_index: entry.line_index,
            raw: entry.raw.clone(),
            candidate_template: candidate.placeholder_template.clone(),
            conflicting_templates: conflicts.keys().cloned().collect(),
        });
        self.record_failure(
            summary,
            entry,
            Stage::Refine,
            "conflict budget exhausted",
            Some(candidate.placeholder_template),
        );
        pending.extend(orphaned);
        Ok(LineOutcome::Unresolved)
    }

    /// Persist a de-conflicted template, then sweep it over the sample line
    /// and everything still pending.
    #[allow(clippy::too_many_arguments)]
    fn finalize_template(
        &self,
        library: &str,
        mut candidate: TemplateRecord,
        entry: &LogEntry,
        view: &mut LibraryView,
        pending: &mut VecDeque<LogEntry>,
        matched_keys: &mut HashSet<(u64, String)>,
        summary: &mut BatchSummary,
    ) -> anyhow::Result<()> {
        self.store.save_template(library, &mut candidate)?;
        self.observer.event(&StageEvent::Update {
            template_id: candidate.id.clone(),
            change: Change::Committed,
        });
        summary.new_templates.push(candidate.id.clone());

        let mut sweep: Vec<LogEntry> = Vec::with_capacity(pending.len() + 1);
        sweep.push(entry.clone());
        sweep.extend(pending.drain(..));

        let outcome = matcher::match_entries(
            &sweep,
            std::slice::from_ref(&candidate),
            &self.cache,
            self.config.workers,
        )?;

        let mut fresh = Vec::new();
        for record in outcome.matched {
            if matched_keys.insert((record.line_index, record.raw.clone())) {
                fresh.push(record);
            }
        }
        self.store.record_matches(library, &fresh)?;
        summary.matched.extend(fresh);
        pending.extend(outcome.unmatched);

        *view = self.store.load_library(library)?;
        Ok(())
    }

    fn record_failure(
        &self,
        summary: &mut BatchSummary,
        entry: &LogEntry,
        stage: Stage,
        reason: &str,
        template: Option<String>,
    ) {
        self.observer.event(&StageEvent::Failure {
            stage,
            line_index: entry.line_index,
            reason: reason.to_string(),
        });
        let mut record = failure_record(entry, stage, reason, template);
        record.details = entry
            .content
            .as_ref()
            .map(|c| serde_json::json!({ "content": c }));
        summary.failures.push(record);
    }
}

fn new_candidate(template: &str, origin: &str) -> TemplateRecord {
    let mut record = TemplateRecord {
        id: String::new(),
        placeholder_template: template.to_string(),
        example_values: std::collections::BTreeMap::new(),
        metadata: logloom_common::template::TemplateMetadata::default(),
        created_at: String::new(),
    };
    record.metadata.origin = Some(origin.to_string());
    record
}

fn raw_line(entry: &LogEntry) -> RawLine {
    RawLine {
        index: entry.line_index,
        text: entry.raw.clone(),
    }
}

fn failure_record(
    entry: &LogEntry,
    stage: Stage,
    reason: &str,
    template: Option<String>,
) -> FailureRecord {
    FailureRecord {
        line_index: entry.line_index,
        raw: entry.raw.clone(),
        stage,
        reason: reason.to_string(),
        timestamp: chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        template,
        details: None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests;

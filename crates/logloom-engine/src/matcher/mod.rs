//! Match engine: apply committed templates to log entries.
//!
//! First template in library order wins. Compiled regexes are cached by
//! template id (content hash for id-less candidates) so a batch costs
//! O(templates) compilations, not O(templates × lines). Entries fan out
//! across scoped worker threads; workers share only the immutable compiled
//! view and return independent result lists that are merged in chunk order.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use logloom_common::entry::{LogEntry, MatchRecord};
use logloom_common::hash::template_hash;
use logloom_common::template::TemplateRecord;

use crate::codec::{self, CodecError, CompiledTemplate};

/// Process-local cache of compiled templates.
///
/// Content-addressed and safe to share read-only across workers; writers go
/// through the lock. Entries must be invalidated when the backing template is
/// updated or deleted.
#[derive(Debug, Default)]
pub struct TemplateCache {
    inner: RwLock<HashMap<String, Arc<CompiledTemplate>>>,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache key for a template record: its id, or a content hash before an
    /// id has been assigned.
    fn key(record: &TemplateRecord) -> String {
        if record.id.is_empty() {
            template_hash(&record.placeholder_template, &record.example_values)
        } else {
            record.id.clone()
        }
    }

    /// Fetch the compiled form of `record`, compiling on first use.
    ///
    /// # Errors
    ///
    /// Propagates [`CodecError`] when the stored template no longer compiles.
    pub fn get_or_compile(&self, record: &TemplateRecord) -> Result<Arc<CompiledTemplate>, CodecError> {
        let key = Self::key(record);
        if let Ok(map) = self.inner.read()
            && let Some(ct) = map.get(&key)
        {
            return Ok(Arc::clone(ct));
        }
        let ct = Arc::new(codec::compile(&record.placeholder_template, None)?);
        if let Ok(mut map) = self.inner.write() {
            map.insert(key, Arc::clone(&ct));
        }
        Ok(ct)
    }

    /// Drop the cached entry for a template id (update/delete invalidation).
    pub fn invalidate(&self, id: &str) {
        if let Ok(mut map) = self.inner.write() {
            map.remove(id);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.read().map(|m| m.len()).unwrap_or(0)
    }
}

/// A template ready for the match loop.
struct CompiledView {
    id: String,
    placeholder_template: String,
    content_only: bool,
    compiled: Arc<CompiledTemplate>,
}

/// Partition of a batch into matched records and untouched entries.
#[derive(Debug, Default)]
pub struct MatchOutcome {
    pub matched: Vec<MatchRecord>,
    pub unmatched: Vec<LogEntry>,
}

/// Match `entries` against `templates` in library order, fanning out across
/// at most `workers` threads.
///
/// Output preserves input order (entries are chunked contiguously and chunks
/// are merged in order). Templates that fail to compile are skipped — a
/// committed template is validated before commit, so this only guards against
/// a store edited out-of-band.
///
/// # Errors
///
/// Returns an error if a worker thread panics.
pub fn match_entries(
    entries: &[LogEntry],
    templates: &[TemplateRecord],
    cache: &TemplateCache,
    workers: usize,
) -> anyhow::Result<MatchOutcome> {
    let views: Vec<CompiledView> = templates
        .iter()
        .filter_map(|record| {
            let compiled = cache.get_or_compile(record).ok()?;
            Some(CompiledView {
                id: record.id.clone(),
                placeholder_template: record.placeholder_template.clone(),
                content_only: record.metadata.content_only,
                compiled,
            })
        })
        .collect();

    if entries.is_empty() || views.is_empty() {
        return Ok(MatchOutcome {
            matched: Vec::new(),
            unmatched: entries.to_vec(),
        });
    }

    let workers = workers.clamp(1, entries.len());
    if workers == 1 {
        return Ok(match_chunk(entries, &views));
    }

    let chunk_size = entries.len().div_ceil(workers);
    let views_ref = &views;
    let chunk_outcomes: anyhow::Result<Vec<MatchOutcome>> = std::thread::scope(|scope| {
        let handles: Vec<_> = entries
            .chunks(chunk_size)
            .map(|chunk| scope.spawn(move || match_chunk(chunk, views_ref)))
            .collect();
        handles
            .into_iter()
            .map(|h| {
                h.join()
                    .map_err(|_| anyhow::anyhow!("match worker thread panicked"))
            })
            .collect()
    });

    let mut outcome = MatchOutcome::default();
    for chunk in chunk_outcomes? {
        outcome.matched.extend(chunk.matched);
        outcome.unmatched.extend(chunk.unmatched);
    }
    Ok(outcome)
}

/// Sequential first-match-wins loop over one chunk.
fn match_chunk(entries: &[LogEntry], views: &[CompiledView]) -> MatchOutcome {
    let mut outcome = MatchOutcome::default();
    for entry in entries {
        match match_one(entry, views) {
            Some(record) => outcome.matched.push(record),
            None => outcome.unmatched.push(entry.clone()),
        }
    }
    outcome
}

fn match_one(entry: &LogEntry, views: &[CompiledView]) -> Option<MatchRecord> {
    for view in views {
        let target = entry.target_text(view.content_only);
        if let Some(variables) = view.compiled.capture(target) {
            return Some(MatchRecord {
                line_index: entry.line_index,
                raw: entry.raw.clone(),
                content: entry.content.clone().filter(|c| c != &entry.raw),
                template_id: view.id.clone(),
                template_pattern: view.placeholder_template.clone(),
                variables,
            });
        }
    }
    None
}

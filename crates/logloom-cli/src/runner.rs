//! Batch run driver.
//!
//! Streams the input in bounded batches through the orchestrator (strictly
//! serial, no queue between batches), then re-reads the whole input for the
//! authoritative replay pass against the finalized library. Reports are
//! written from the replay, not from the per-batch summaries, so a re-run in
//! match-only mode reproduces the exact same CSV.

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context as _;

use logloom_common::entry::{LogEntry, MatchRecord, RawLine};
use logloom_common::failure::FailureRecord;
use logloom_common::slug::slugify;
use logloom_engine::head::HeadPattern;
use logloom_engine::matcher::{self, TemplateCache};

use crate::agent::AgentSuite;
use crate::observer::{Observer, StageEvent};
use crate::orchestrator::{ConflictReport, Orchestrator, PipelineConfig};
use crate::report;
use crate::store::Store;
use crate::{config, paths};

/// Everything a run needs, resolved from flags + config file.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub input: PathBuf,
    pub output: PathBuf,
    pub batch_size: usize,
    pub limit: Option<usize>,
    pub match_only: bool,
    pub library: Option<String>,
    pub source_hint: Option<String>,
    pub skip_threshold: usize,
    pub workers: usize,
    pub max_samples: usize,
}

impl RunOptions {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            batch_size: config::DEFAULT_BATCH_SIZE,
            limit: None,
            match_only: false,
            library: None,
            source_hint: None,
            skip_threshold: config::DEFAULT_SKIP_THRESHOLD,
            workers: 0,
            max_samples: config::DEFAULT_MAX_SAMPLES,
        }
    }
}

/// Totals reported back to the CLI after a run.
#[derive(Debug)]
pub struct RunSummary {
    pub run_id: String,
    pub library: String,
    pub total_lines: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub new_templates: usize,
    pub failures: usize,
    pub matches_csv: PathBuf,
}

/// Resolve 0 (auto) worker counts to the machine's parallelism, capped.
fn effective_workers(requested: usize) -> usize {
    if requested > 0 {
        return requested;
    }
    std::thread::available_parallelism().map_or(1, |n| n.get()).min(8)
}

/// Execute a full run: learn (unless match-only), replay, write reports.
///
/// Cancellation is cooperative: when `cancel` flips true the learning loop
/// stops at the next batch boundary; templates committed so far stay, and the
/// replay still runs so the report reflects the library actually persisted.
///
/// # Errors
///
/// Fails on empty input, on a missing library id in match-only mode, on
/// routing failure, and on store or report I/O errors.
pub fn run<A: AgentSuite + ?Sized>(
    opts: &RunOptions,
    agents: Option<&A>,
    observer: &dyn Observer,
    cancel: Option<&AtomicBool>,
) -> anyhow::Result<RunSummary> {
    let store = Store::open(paths::library_root(Some(&opts.output))?, opts.max_samples)?;
    let run_id = uuid::Uuid::new_v4().to_string();
    let workers = effective_workers(opts.workers);

    let mut library = opts.library.as_deref().map(slugify);
    if opts.match_only && library.is_none() {
        anyhow::bail!("--match-only requires --library");
    }

    let mut total_lines = 0usize;
    let mut new_templates = 0usize;
    let mut failures: Vec<FailureRecord> = Vec::new();
    let mut conflicts: Vec<ConflictReport> = Vec::new();

    if opts.match_only {
        total_lines = count_lines(&opts.input, opts.limit)?;
        if total_lines == 0 {
            anyhow::bail!("no lines read from {}", opts.input.display());
        }
    } else {
        let pipeline_config = PipelineConfig {
            library: library.clone(),
            source_hint: opts.source_hint.clone(),
            skip_threshold: opts.skip_threshold,
            workers,
        };
        let orchestrator = Orchestrator::new(&store, agents, observer, pipeline_config);

        let mut reader = open_input(&opts.input)?;
        let mut next_index = 0u64;
        let mut remaining = opts.limit;
        loop {
            if cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
                break;
            }
            let batch = read_batch(&mut reader, opts.batch_size, &mut next_index, &mut remaining)?;
            if batch.is_empty() {
                break;
            }
            total_lines += batch.len();
            let summary = orchestrator.process_batch(&batch)?;
            if library.is_none() {
                library = Some(summary.library.clone());
            }
            new_templates += summary.new_templates.len();
            failures.extend(summary.failures);
            conflicts.extend(summary.conflicts);
        }
        if total_lines == 0 {
            anyhow::bail!("no lines read from {}", opts.input.display());
        }
    }

    let Some(library) = library else {
        anyhow::bail!("no library id resolved for replay");
    };

    let (matched, unmatched) = replay(&store, &library, opts, workers)?;
    observer.event(&StageEvent::Matching {
        matched: matched.len(),
        unmatched,
    });

    let reports = paths::reports_dir(&opts.output);
    let matches_csv = report::write_matches_csv(&reports, &run_id, &matched)?;
    report::write_conflicts_json(&reports, &run_id, &conflicts)?;
    report::write_failures_jsonl(&reports, &run_id, &failures)?;

    Ok(RunSummary {
        run_id,
        library,
        total_lines,
        matched: matched.len(),
        unmatched,
        new_templates,
        failures: failures.len(),
        matches_csv,
    })
}

/// The authoritative match pass: every input line against the finalized
/// library, in input order.
fn replay(
    store: &Store,
    library: &str,
    opts: &RunOptions,
    workers: usize,
) -> anyhow::Result<(Vec<MatchRecord>, usize)> {
    let view = store.load_library(library)?;
    let head = view
        .head_pattern
        .as_deref()
        .and_then(|p| HeadPattern::compile(p).ok());
    let cache = TemplateCache::new();

    let mut reader = open_input(&opts.input)?;
    let mut next_index = 0u64;
    let mut remaining = opts.limit;
    let mut matched: Vec<MatchRecord> = Vec::new();
    let mut unmatched = 0usize;

    loop {
        let batch = read_batch(&mut reader, opts.batch_size, &mut next_index, &mut remaining)?;
        if batch.is_empty() {
            break;
        }
        let entries: Vec<LogEntry> = batch
            .into_iter()
            .map(|line| {
                let content = head.as_ref().and_then(|h| h.extract(&line.text).1);
                LogEntry {
                    line_index: line.index,
                    raw: line.text,
                    content,
                }
            })
            .collect();
        let outcome = matcher::match_entries(&entries, &view.templates, &cache, workers)?;
        matched.extend(outcome.matched);
        unmatched += outcome.unmatched.len();
    }

    matched.sort_by_key(|m| m.line_index);
    Ok((matched, unmatched))
}

fn open_input(path: &Path) -> anyhow::Result<BufReader<std::fs::File>> {
    let file =
        std::fs::File::open(path).with_context(|| format!("open input {}", path.display()))?;
    Ok(BufReader::new(file))
}

/// Read up to `batch_size` lines, honoring the global `--limit` budget.
fn read_batch(
    reader: &mut impl BufRead,
    batch_size: usize,
    next_index: &mut u64,
    remaining: &mut Option<usize>,
) -> anyhow::Result<Vec<RawLine>> {
    let mut batch = Vec::new();
    let mut line = String::new();
    while batch.len() < batch_size {
        if remaining.is_some_and(|r| r == 0) {
            break;
        }
        line.clear();
        let read = reader.read_line(&mut line).context("read input line")?;
        if read == 0 {
            break;
        }
        let text = line.trim_end_matches(['\r', '\n']);
        if text.is_empty() {
            *next_index += 1;
            continue;
        }
        batch.push(RawLine {
            index: *next_index,
            text: text.to_string(),
        });
        *next_index += 1;
        if let Some(r) = remaining.as_mut() {
            *r -= 1;
        }
    }
    Ok(batch)
}

fn count_lines(path: &Path, limit: Option<usize>) -> anyhow::Result<usize> {
    let mut reader = open_input(path)?;
    let mut next_index = 0u64;
    let mut remaining = limit;
    let mut total = 0usize;
    loop {
        let batch = read_batch(&mut reader, 8192, &mut next_index, &mut remaining)?;
        if batch.is_empty() {
            break;
        }
        total += batch.len();
    }
    Ok(total)
}

//! Stage event observation.
//!
//! The orchestrator emits fire-and-forget events at every pipeline
//! transition. Observers are passed in by the caller; events never influence
//! control flow, and the core mandates no logging framework.

use logloom_common::failure::Stage;

/// A strongly typed pipeline event.
#[derive(Debug, Clone)]
pub enum StageEvent {
    /// A batch was routed to a library.
    Routing { library: String },
    /// A head pattern was derived, refined, or skipped.
    Head {
        pattern: Option<String>,
        unmatched: usize,
    },
    /// The parsing agent was asked to annotate a line.
    Parsing { line_index: u64 },
    /// A candidate passed or failed validation.
    Validation { line_index: u64, ok: bool },
    /// One refinement iteration ran.
    Refine {
        line_index: u64,
        iteration: usize,
        action: String,
    },
    /// A match pass finished.
    Matching { matched: usize, unmatched: usize },
    /// A template was committed or deleted.
    Update { template_id: String, change: Change },
    /// Progress through the current batch's pending queue.
    BatchProgress { resolved: usize, pending: usize },
    /// A line-level failure was recorded.
    Failure {
        stage: Stage,
        line_index: u64,
        reason: String,
    },
    /// Lines left unresolved at the end of a batch.
    Unmatched { count: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Committed,
    Deleted,
}

pub trait Observer {
    fn event(&self, event: &StageEvent);
}

/// Discards every event.
pub struct NullObserver;

impl Observer for NullObserver {
    fn event(&self, _event: &StageEvent) {}
}

/// Prints events to stderr; enabled by `--verbose`.
pub struct ConsoleObserver;

impl Observer for ConsoleObserver {
    fn event(&self, event: &StageEvent) {
        match event {
            StageEvent::Routing { library } => {
                eprintln!("[logloom] routing: library {library}");
            }
            StageEvent::Head { pattern, unmatched } => match pattern {
                Some(p) => eprintln!("[logloom] head: {p} ({unmatched} unmatched)"),
                None => eprintln!("[logloom] head: skipped (no agent)"),
            },
            StageEvent::Parsing { line_index } => {
                eprintln!("[logloom] parsing: line {line_index}");
            }
            StageEvent::Validation { line_index, ok } => {
                let verdict = if *ok { "ok" } else { "rejected" };
                eprintln!("[logloom] validation: line {line_index} {verdict}");
            }
            StageEvent::Refine {
                line_index,
                iteration,
                action,
            } => {
                eprintln!("[logloom] refine: line {line_index} iteration {iteration} → {action}");
            }
            StageEvent::Matching { matched, unmatched } => {
                eprintln!("[logloom] matching: {matched} matched, {unmatched} unmatched");
            }
            StageEvent::Update { template_id, change } => {
                let verb = match change {
                    Change::Committed => "committed",
                    Change::Deleted => "deleted",
                };
                eprintln!("[logloom] update: {verb} {template_id}");
            }
            StageEvent::BatchProgress { resolved, pending } => {
                eprintln!("[logloom] progress: {resolved} resolved, {pending} pending");
            }
            StageEvent::Failure {
                stage,
                line_index,
                reason,
            } => {
                eprintln!("[logloom] failure: line {line_index} at {stage}: {reason}");
            }
            StageEvent::Unmatched { count } => {
                eprintln!("[logloom] unmatched: {count} lines unresolved");
            }
        }
    }
}

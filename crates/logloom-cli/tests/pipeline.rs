#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

//! End-to-end runner tests with a scripted agent suite: learn from a file,
//! write reports, then prove the replay is the authority (match-only re-runs
//! reproduce the CSV byte for byte).

use std::cell::RefCell;
use std::path::Path;

use logloom::agent::{
    AgentOutcome, HeadAgent, HeadOutput, ParsingAgent, ParsingOutput, RefineAgent, RefineOutput,
    RefineRequest, RoutingAgent, RoutingOutput,
};
use logloom::observer::NullObserver;
use logloom::runner::{self, RunOptions};

/// Minimal scripted suite: fixed routing, a queue of parsing templates, no
/// head, no refine.
struct SuiteStub {
    parsing: RefCell<Vec<String>>,
}

impl SuiteStub {
    fn new(templates: &[&str]) -> Self {
        Self {
            parsing: RefCell::new(templates.iter().map(ToString::to_string).collect()),
        }
    }
}

fn unavailable<T>() -> AgentOutcome<T> {
    AgentOutcome::Retryable {
        issues: vec!["not scripted".to_string()],
        diagnostics: None,
    }
}

impl RoutingAgent for SuiteStub {
    fn classify(&self, _samples: &[String]) -> AgentOutcome<RoutingOutput> {
        AgentOutcome::Success(RoutingOutput {
            kind: "Test Source".to_string(),
            evidence: None,
        })
    }
}

impl ParsingAgent for SuiteStub {
    fn derive_template(&self, _line: &str) -> AgentOutcome<ParsingOutput> {
        let mut q = self.parsing.borrow_mut();
        if q.is_empty() {
            unavailable()
        } else {
            AgentOutcome::Success(ParsingOutput {
                template: q.remove(0),
                description: None,
                example: None,
            })
        }
    }
}

impl RefineAgent for SuiteStub {
    fn refine(&self, _request: &RefineRequest<'_>) -> AgentOutcome<RefineOutput> {
        unavailable()
    }
}

impl HeadAgent for SuiteStub {
    fn derive_head(&self, _samples: &[String], _previous: Option<&str>) -> AgentOutcome<HeadOutput> {
        unavailable()
    }
}

fn write_input(dir: &Path, lines: &[&str]) -> std::path::PathBuf {
    let path = dir.join("input.log");
    std::fs::write(&path, lines.join("\n")).unwrap();
    path
}

fn options(input: &Path, output: &Path) -> RunOptions {
    let mut opts = RunOptions::new(input, output);
    opts.workers = 1;
    opts
}

#[test]
fn full_run_learns_templates_and_writes_the_report() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(
        dir.path(),
        &[
            "User alice logged in",
            "User bob logged in",
            "disk /dev/sda1 is full",
            "User alice logged in",
        ],
    );
    let output = dir.path().join("out");
    let suite = SuiteStub::new(&["User ⟪alice⟫ logged in", "disk ⟪/dev/sda1⟫ is full"]);

    let summary = runner::run(&options(&input, &output), Some(&suite), &NullObserver, None).unwrap();

    assert_eq!(summary.library, "test-source");
    assert_eq!(summary.total_lines, 4);
    assert_eq!(summary.matched, 4);
    assert_eq!(summary.unmatched, 0);
    assert_eq!(summary.new_templates, 2);
    assert_eq!(summary.failures, 0);

    let csv = std::fs::read_to_string(&summary.matches_csv).unwrap();
    let rows: Vec<&str> = csv.lines().collect();
    assert_eq!(rows.len(), 5); // header + 4 lines
    assert_eq!(rows[0], "raw_log,template_id,template_pattern,variables");
    assert!(rows[1].starts_with("User alice logged in,test-source#1,"));
    assert!(rows[3].starts_with("disk /dev/sda1 is full,test-source#2,"));
}

#[test]
fn replay_is_idempotent_and_authoritative() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(
        dir.path(),
        &["User alice logged in", "User bob logged in", "User carol logged in"],
    );
    let output = dir.path().join("out");
    let suite = SuiteStub::new(&["User ⟪alice⟫ logged in"]);

    let learned =
        runner::run(&options(&input, &output), Some(&suite), &NullObserver, None).unwrap();
    let first_csv = std::fs::read_to_string(&learned.matches_csv).unwrap();

    // Re-run twice in match-only mode: no LM, library fixed, same input.
    let mut replay_opts = options(&input, &output);
    replay_opts.match_only = true;
    replay_opts.library = Some(learned.library.clone());

    let replay_a =
        runner::run::<SuiteStub>(&replay_opts, None, &NullObserver, None).unwrap();
    let replay_b =
        runner::run::<SuiteStub>(&replay_opts, None, &NullObserver, None).unwrap();

    let csv_a = std::fs::read_to_string(&replay_a.matches_csv).unwrap();
    let csv_b = std::fs::read_to_string(&replay_b.matches_csv).unwrap();
    assert_eq!(csv_a, csv_b, "match-only replays must be byte-identical");
    assert_eq!(csv_a, first_csv, "the learning run's report is the same replay");
    assert_eq!(replay_a.matched, 3);
    assert_eq!(replay_a.new_templates, 0);
}

#[test]
fn empty_input_is_a_fatal_error_and_writes_no_report() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("empty.log");
    std::fs::write(&input, "").unwrap();
    let output = dir.path().join("out");
    let suite = SuiteStub::new(&[]);

    let result = runner::run(&options(&input, &output), Some(&suite), &NullObserver, None);
    assert!(result.is_err());
    assert!(!output.join("reports").exists());
}

#[test]
fn limit_caps_the_lines_processed() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), &["a 1", "a 2", "a 3", "a 4"]);
    let output = dir.path().join("out");
    let suite = SuiteStub::new(&["a ⟪1⟫"]);

    let mut opts = options(&input, &output);
    opts.limit = Some(2);
    let summary = runner::run(&opts, Some(&suite), &NullObserver, None).unwrap();
    assert_eq!(summary.total_lines, 2);
    assert_eq!(summary.matched, 2);
}

#[test]
fn failures_jsonl_written_when_lines_stay_unresolved() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), &["User alice logged in", "???unparseable???"]);
    let output = dir.path().join("out");
    // Only one template scripted: the second line fails parsing.
    let suite = SuiteStub::new(&["User ⟪alice⟫ logged in"]);

    let summary = runner::run(&options(&input, &output), Some(&suite), &NullObserver, None).unwrap();
    assert_eq!(summary.matched, 1);
    assert_eq!(summary.unmatched, 1);
    assert_eq!(summary.failures, 1);

    let failures_path = output
        .join("reports")
        .join(format!("{}-failures.jsonl", summary.run_id));
    let text = std::fs::read_to_string(failures_path).unwrap();
    assert!(text.contains("???unparseable???"));
    assert!(text.contains("\"parsing\""));
}

use std::cell::RefCell;

use super::*;
use crate::agent::{HeadOutput, ParsingOutput, RefineOutput, RoutingOutput};
use crate::agent::{HeadAgent, ParsingAgent, RefineAgent, RoutingAgent};
use crate::observer::NullObserver;

/// Scripted agent suite: each agent replays a queue of outcomes and counts
/// calls. An exhausted queue answers with a retryable failure.
#[derive(Default)]
struct MockAgents {
    routing: RefCell<Vec<AgentOutcome<RoutingOutput>>>,
    parsing: RefCell<Vec<AgentOutcome<ParsingOutput>>>,
    refine: RefCell<Vec<AgentOutcome<RefineOutput>>>,
    head: RefCell<Vec<AgentOutcome<HeadOutput>>>,
    parsing_calls: RefCell<usize>,
    refine_calls: RefCell<usize>,
}

fn exhausted<T>() -> AgentOutcome<T> {
    AgentOutcome::Retryable {
        issues: vec!["script exhausted".to_string()],
        diagnostics: None,
    }
}

fn pop<T>(queue: &RefCell<Vec<AgentOutcome<T>>>) -> AgentOutcome<T> {
    let mut q = queue.borrow_mut();
    if q.is_empty() { exhausted() } else { q.remove(0) }
}

impl MockAgents {
    fn route(self, kind: &str) -> Self {
        self.routing.borrow_mut().push(AgentOutcome::Success(RoutingOutput {
            kind: kind.to_string(),
            evidence: None,
        }));
        self
    }

    fn parse(self, template: &str) -> Self {
        self.parsing.borrow_mut().push(AgentOutcome::Success(ParsingOutput {
            template: template.to_string(),
            description: None,
            example: None,
        }));
        self
    }

    fn parse_failure(self) -> Self {
        self.parsing.borrow_mut().push(exhausted());
        self
    }

    fn refine_with(self, action: RefineAction, template: &str) -> Self {
        self.refine.borrow_mut().push(AgentOutcome::Success(RefineOutput {
            action,
            template: template.to_string(),
            explain: None,
        }));
        self
    }

    fn head_pattern(self, pattern: &str) -> Self {
        self.head.borrow_mut().push(AgentOutcome::Success(HeadOutput {
            pattern: pattern.to_string(),
            notes: None,
        }));
        self
    }
}

impl RoutingAgent for MockAgents {
    fn classify(&self, _samples: &[String]) -> AgentOutcome<RoutingOutput> {
        pop(&self.routing)
    }
}

impl ParsingAgent for MockAgents {
    fn derive_template(&self, _line: &str) -> AgentOutcome<ParsingOutput> {
        *self.parsing_calls.borrow_mut() += 1;
        pop(&self.parsing)
    }
}

impl RefineAgent for MockAgents {
    fn refine(&self, _request: &RefineRequest<'_>) -> AgentOutcome<RefineOutput> {
        *self.refine_calls.borrow_mut() += 1;
        pop(&self.refine)
    }
}

impl HeadAgent for MockAgents {
    fn derive_head(&self, _samples: &[String], _previous: Option<&str>) -> AgentOutcome<HeadOutput> {
        pop(&self.head)
    }
}

fn temp_store() -> (tempfile::TempDir, Store) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path().join("libraries"), 100).unwrap();
    (dir, store)
}

fn raw_lines(texts: &[&str]) -> Vec<RawLine> {
    texts
        .iter()
        .enumerate()
        .map(|(i, t)| RawLine {
            index: i as u64,
            text: (*t).to_string(),
        })
        .collect()
}

fn library_config() -> PipelineConfig {
    PipelineConfig {
        library: Some("auth".to_string()),
        workers: 1,
        ..PipelineConfig::default()
    }
}

fn run_batch(store: &Store, agents: &MockAgents, config: PipelineConfig, lines: &[RawLine]) -> BatchSummary {
    let orchestrator = Orchestrator::new(store, Some(agents), &NullObserver, config);
    orchestrator.process_batch(lines).unwrap()
}

/// Seed the store with a committed template plus its matched samples.
fn seed_template(store: &Store, library: &str, pt: &str, samples: &[&str]) -> String {
    let mut record = new_candidate(pt, "parsing");
    store.save_template(library, &mut record).unwrap();
    let records: Vec<MatchRecord> = samples
        .iter()
        .enumerate()
        .map(|(i, raw)| MatchRecord {
            line_index: i as u64,
            raw: (*raw).to_string(),
            content: None,
            template_id: record.id.clone(),
            template_pattern: pt.to_string(),
            variables: std::collections::BTreeMap::new(),
        })
        .collect();
    store.record_matches(library, &records).unwrap();
    record.id
}

// --- fresh library ---

#[test]
fn fresh_library_learns_one_template_for_repeated_shape() {
    let (_dir, store) = temp_store();
    let agents = MockAgents::default().parse("User ⟪alice⟫ logged in");
    let lines = raw_lines(&[
        "User alice logged in",
        "User alice logged in",
        "User bob logged in",
        "User alice logged in",
        "User bob logged in",
    ]);
    let summary = run_batch(&store, &agents, library_config(), &lines);

    assert_eq!(summary.new_templates, vec!["auth#1"]);
    assert_eq!(summary.matched.len(), 5);
    assert!(summary.unresolved.is_empty());
    assert!(summary.failures.is_empty());
    // One LM parse covers all five lines.
    assert_eq!(*agents.parsing_calls.borrow(), 1);

    let view = store.load_library("auth").unwrap();
    assert_eq!(view.templates.len(), 1);
    assert_eq!(view.samples.len(), 5);
}

#[test]
fn second_batch_reuses_committed_templates() {
    let (_dir, store) = temp_store();
    let agents = MockAgents::default().parse("User ⟪alice⟫ logged in");
    run_batch(&store, &agents, library_config(), &raw_lines(&["User alice logged in"]));

    // No parsing scripted: the second batch must match without the LM.
    let agents2 = MockAgents::default();
    let summary = run_batch(&store, &agents2, library_config(), &raw_lines(&["User carol logged in"]));
    assert_eq!(summary.matched.len(), 1);
    assert!(summary.new_templates.is_empty());
    assert_eq!(*agents2.parsing_calls.borrow(), 0);
}

// --- routing ---

#[test]
fn routing_output_is_slugified_into_library_id() {
    let (_dir, store) = temp_store();
    let agents = MockAgents::default()
        .route("Nginx Access Log")
        .parse("GET ⟪/index.html⟫");
    let config = PipelineConfig {
        workers: 1,
        ..PipelineConfig::default()
    };
    let summary = run_batch(&store, &agents, config, &raw_lines(&["GET /index.html"]));
    assert_eq!(summary.library, "nginx-access-log");
    assert_eq!(store.list_libraries().unwrap(), vec!["nginx-access-log"]);
}

#[test]
fn source_hint_bypasses_the_routing_agent() {
    let (_dir, store) = temp_store();
    let agents = MockAgents::default().parse("x ⟪1⟫");
    let config = PipelineConfig {
        source_hint: Some("My Service".to_string()),
        workers: 1,
        ..PipelineConfig::default()
    };
    let summary = run_batch(&store, &agents, config, &raw_lines(&["x 1"]));
    assert_eq!(summary.library, "my-service");
}

#[test]
fn routing_failure_without_hint_is_fatal() {
    let (_dir, store) = temp_store();
    let agents = MockAgents::default(); // routing script empty → retryable
    let config = PipelineConfig {
        workers: 1,
        ..PipelineConfig::default()
    };
    let orchestrator = Orchestrator::new(&store, Some(&agents), &NullObserver, config);
    assert!(orchestrator.process_batch(&raw_lines(&["a"])).is_err());
}

// --- line-level failures ---

#[test]
fn parsing_failure_records_and_moves_on() {
    let (_dir, store) = temp_store();
    let agents = MockAgents::default().parse_failure().parse("ok ⟪2⟫");
    let lines = raw_lines(&["bad line", "ok 2"]);
    let summary = run_batch(&store, &agents, library_config(), &lines);

    assert_eq!(summary.unresolved, vec![lines[0].clone()]);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].stage, Stage::Parsing);
    assert_eq!(summary.matched.len(), 1);
}

#[test]
fn round_trip_violation_is_a_validation_failure() {
    let (_dir, store) = temp_store();
    // Template reconstructs to a different line than the sample.
    let agents = MockAgents::default().parse("User ⟪bob⟫ logged in");
    let lines = raw_lines(&["User alice logged in"]);
    let summary = run_batch(&store, &agents, library_config(), &lines);

    assert_eq!(summary.unresolved.len(), 1);
    assert_eq!(summary.failures[0].stage, Stage::Validation);
    assert!(summary.new_templates.is_empty());
}

#[test]
fn skip_threshold_short_circuits_the_tail() {
    let (_dir, store) = temp_store();
    let agents = MockAgents::default();
    let config = PipelineConfig {
        library: Some("auth".to_string()),
        skip_threshold: 3,
        workers: 1,
        ..PipelineConfig::default()
    };
    let lines = raw_lines(&["a 1", "b 2", "c 3"]);
    let summary = run_batch(&store, &agents, config, &lines);

    assert_eq!(summary.unresolved.len(), 3);
    assert_eq!(*agents.parsing_calls.borrow(), 0);
    assert!(summary.failures.is_empty());
}

// --- head induction ---

#[test]
fn head_induction_learns_content_only_templates() {
    let (_dir, store) = temp_store();
    let agents = MockAgents::default()
        .head_pattern(r"^\[(?P<ts>[^\]]+)\] (?P<content>.*)$")
        .parse("auth: user=⟪alice⟫");
    let lines = raw_lines(&[
        "[2024-01-01 10:00:00] auth: user=alice",
        "[2024-02-02 12:34:56] auth: user=bob",
    ]);
    let summary = run_batch(&store, &agents, library_config(), &lines);

    assert_eq!(summary.matched.len(), 2);
    assert_eq!(*agents.parsing_calls.borrow(), 1);

    let view = store.load_library("auth").unwrap();
    assert_eq!(view.head_pattern.as_deref(), Some(r"^\[(?P<ts>[^\]]+)\] (?P<content>.*)$"));
    let template = &view.templates[0];
    assert!(template.metadata.content_only);
    assert_eq!(
        template.metadata.raw_sample.as_deref(),
        Some("[2024-01-01 10:00:00] auth: user=alice")
    );
    assert_eq!(template.metadata.content_sample.as_deref(), Some("auth: user=alice"));

    // Variables come from the content, and stored samples carry both texts.
    assert_eq!(
        summary.matched[1].variables.get("v1").map(String::as_str),
        Some("bob")
    );
    assert_eq!(view.samples[1].content.as_deref(), Some("auth: user=bob"));
}

#[test]
fn line_uncovered_by_head_fails_parsing() {
    let (_dir, store) = temp_store();
    let agents = MockAgents::default()
        .head_pattern(r"^\[(?P<ts>[^\]]+)\] (?P<content>.*)$")
        .parse("auth: user=⟪alice⟫");
    let lines = raw_lines(&["[t1] auth: user=alice", "no brackets at all"]);
    let summary = run_batch(&store, &agents, library_config(), &lines);

    assert_eq!(summary.matched.len(), 1);
    assert_eq!(summary.unresolved.len(), 1);
    assert_eq!(summary.unresolved[0].text, "no brackets at all");
    assert!(summary.failures.iter().any(|f| {
        f.stage == Stage::Parsing && f.reason.contains("head pattern")
    }));
    // The LM was only consulted for the covered line.
    assert_eq!(*agents.parsing_calls.borrow(), 1);
}

// --- conflicts ---

#[test]
fn refine_candidate_keeps_the_existing_template() {
    let (_dir, store) = temp_store();
    let existing_id = seed_template(
        &store,
        "auth",
        "User ⟪alice⟫ logged in",
        &["User alice logged in", "User bob logged in"],
    );

    // The loose candidate also matches the historical samples; the refine
    // agent tightens it.
    let agents = MockAgents::default()
        .parse("User ⟪bob⟫ ⟪logged out⟫")
        .refine_with(RefineAction::RefineCandidate, "User ⟪bob⟫ logged out");
    let lines = raw_lines(&["User bob logged out"]);
    let summary = run_batch(&store, &agents, library_config(), &lines);

    assert_eq!(summary.matched.len(), 1);
    assert_eq!(*agents.refine_calls.borrow(), 1);
    assert_eq!(summary.new_templates, vec!["auth#2"]);

    let view = store.load_library("auth").unwrap();
    assert_eq!(view.templates.len(), 2);
    // Old template survives and its samples stay attributed to it.
    assert!(view.template(&existing_id).is_some());
    let old_samples: Vec<&str> = view
        .samples
        .iter()
        .filter(|s| s.template_id.as_deref() == Some(existing_id.as_str()))
        .map(|s| s.raw.as_str())
        .collect();
    assert_eq!(old_samples, vec!["User alice logged in", "User bob logged in"]);
}

#[test]
fn adopt_candidate_replaces_and_requeues_orphans() {
    let (_dir, store) = temp_store();
    // Over-specific literal template.
    let existing_id = seed_template(&store, "auth", "User alice logged in", &["User alice logged in"]);

    let agents = MockAgents::default()
        .parse("User ⟪bob⟫ logged in")
        .refine_with(RefineAction::AdoptCandidate, "User ⟪bob⟫ logged in");
    let lines = raw_lines(&[("User bob logged in")]);
    let summary = run_batch(&store, &agents, library_config(), &lines);

    let view = store.load_library("auth").unwrap();
    assert!(view.template(&existing_id).is_none());
    assert_eq!(view.templates.len(), 1);
    let new_id = &view.templates[0].id;
    assert_eq!(summary.new_templates, vec![new_id.clone()]);

    // The orphaned alice sample was re-queued and re-matched under the new id.
    let raws: Vec<&str> = summary.matched.iter().map(|m| m.raw.as_str()).collect();
    assert!(raws.contains(&"User bob logged in"));
    assert!(raws.contains(&"User alice logged in"));
    assert!(summary.matched.iter().all(|m| &m.template_id == new_id));
    assert!(summary.unresolved.is_empty());
}

#[test]
fn conflict_budget_exhaustion_reports_and_unresolves() {
    let (_dir, store) = temp_store();
    seed_template(&store, "auth", "User ⟪alice⟫ logged in", &["User alice logged in"]);

    // The refine agent never converges: it keeps answering with the same
    // loose template that still conflicts.
    let mut agents = MockAgents::default().parse("User ⟪bob⟫ ⟪logged out⟫");
    for _ in 0..MAX_REFINE_ITERATIONS {
        agents = agents.refine_with(RefineAction::RefineCandidate, "User ⟪bob⟫ ⟪logged out⟫");
    }
    let lines = raw_lines(&["User bob logged out"]);
    let summary = run_batch(&store, &agents, library_config(), &lines);

    assert_eq!(*agents.refine_calls.borrow(), MAX_REFINE_ITERATIONS);
    assert_eq!(summary.unresolved.len(), 1);
    assert_eq!(summary.conflicts.len(), 1);
    assert_eq!(summary.conflicts[0].raw, "User bob logged out");
    assert!(summary.failures.iter().any(|f| f.reason.contains("budget")));

    // Library untouched: the loose candidate never landed.
    let view = store.load_library("auth").unwrap();
    assert_eq!(view.templates.len(), 1);
}

#[test]
fn refine_agent_failure_unresolves_the_line() {
    let (_dir, store) = temp_store();
    seed_template(&store, "auth", "User ⟪alice⟫ logged in", &["User alice logged in"]);
    let agents = MockAgents::default().parse("User ⟪bob⟫ ⟪logged out⟫"); // refine script empty
    let lines = raw_lines(&["User bob logged out"]);
    let summary = run_batch(&store, &agents, library_config(), &lines);

    assert_eq!(summary.unresolved.len(), 1);
    assert!(summary.failures.iter().any(|f| f.stage == Stage::Refine));
}

// --- mutual exclusion after commit ---

#[test]
fn committed_library_is_mutually_exclusive_over_samples() {
    let (_dir, store) = temp_store();
    let agents = MockAgents::default()
        .parse("User ⟪alice⟫ logged in")
        .parse("disk ⟪/dev/sda1⟫ is full");
    let lines = raw_lines(&["User alice logged in", "disk /dev/sda1 is full"]);
    run_batch(&store, &agents, library_config(), &lines);

    let view = store.load_library("auth").unwrap();
    let cache = TemplateCache::new();
    for sample in &view.samples {
        let owners: Vec<&str> = view
            .templates
            .iter()
            .filter(|t| {
                let ct = cache.get_or_compile(t).unwrap();
                let target = if t.metadata.content_only {
                    sample.content.as_deref().unwrap_or(&sample.raw)
                } else {
                    &sample.raw
                };
                ct.is_match(target)
            })
            .map(|t| t.id.as_str())
            .collect();
        assert_eq!(owners.len(), 1, "sample {:?} matched {owners:?}", sample.raw);
        assert_eq!(Some(owners[0]), sample.template_id.as_deref());
    }
}

//! Head-pattern derivation and refinement.
//!
//! Ensures a library has a regex matching every line and exposing a
//! `content` group before per-line template learning starts. Derivation is
//! lazy (first batch for a library); refinement keeps feeding the head agent
//! diverse unmatched lines until coverage is total, the agent stalls, or the
//! round budget runs out. A candidate is only adopted when its unmatched
//! count does not exceed the current best — coverage never regresses.

use std::collections::HashSet;

use logloom_engine::head::HeadPattern;
use logloom_engine::sample;

use crate::agent::{AgentOutcome, HeadAgent};
use crate::observer::{Observer, StageEvent};
use crate::store::Store;

/// Diverse samples handed to the agent on first derivation.
pub const SEED_K: usize = 10;
/// New unmatched lines accumulated per refinement round.
pub const PICKS_PER_ROUND: usize = 3;
/// Refinement round budget.
pub const MAX_ROUNDS: usize = 10;

/// Ensure a head pattern for `library`, deriving and refining via the agent.
///
/// Returns `None` when no agent is available and no stored head exists, or
/// when derivation fails — downstream treats affected lines as having no
/// extractable content.
///
/// # Errors
///
/// Only store persistence failures propagate; agent failures degrade to the
/// best pattern seen so far.
pub fn ensure_head<A: HeadAgent + ?Sized>(
    store: &Store,
    library: &str,
    stored_pattern: Option<&str>,
    lines: &[String],
    agent: Option<&A>,
    observer: &dyn Observer,
) -> anyhow::Result<Option<HeadPattern>> {
    let mut best = stored_pattern.and_then(|p| HeadPattern::compile(p).ok());

    if best.is_none() {
        let Some(agent) = agent else {
            observer.event(&StageEvent::Head {
                pattern: None,
                unmatched: lines.len(),
            });
            return Ok(None);
        };
        let seed = sample::diverse(lines, SEED_K);
        match derive_candidate(agent, &seed, None) {
            Some(head) => {
                store.save_head_pattern(library, head.pattern())?;
                best = Some(head);
            }
            None => {
                observer.event(&StageEvent::Head {
                    pattern: None,
                    unmatched: lines.len(),
                });
                return Ok(None);
            }
        }
    }

    let Some(mut head) = best else {
        return Ok(None);
    };

    if let Some(agent) = agent {
        head = refine(store, library, head, lines, agent)?;
    }

    observer.event(&StageEvent::Head {
        pattern: Some(head.pattern().to_string()),
        unmatched: head.unmatched_indices(lines).len(),
    });
    Ok(Some(head))
}

/// One agent call plus compile check.
fn derive_candidate<A: HeadAgent + ?Sized>(
    agent: &A,
    samples: &[String],
    previous: Option<&str>,
) -> Option<HeadPattern> {
    match agent.derive_head(samples, previous) {
        AgentOutcome::Success(output) => HeadPattern::compile(&output.pattern).ok(),
        _ => None,
    }
}

/// The bounded refinement loop.
fn refine<A: HeadAgent + ?Sized>(
    store: &Store,
    library: &str,
    mut best: HeadPattern,
    lines: &[String],
    agent: &A,
) -> anyhow::Result<HeadPattern> {
    let mut accumulator: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for _round in 0..MAX_ROUNDS {
        let unmatched = best.unmatched_indices(lines);
        if unmatched.is_empty() {
            break;
        }

        let fresh: Vec<String> = unmatched
            .iter()
            .map(|&i| lines[i].clone())
            .filter(|l| !seen.contains(l))
            .collect();
        let picks = sample::diverse(&fresh, PICKS_PER_ROUND);
        let grew = !picks.is_empty();
        for pick in picks {
            seen.insert(pick.clone());
            accumulator.push(pick);
        }

        let Some(candidate) = derive_candidate(agent, &accumulator, Some(best.pattern())) else {
            break;
        };

        // Non-strict comparison: ties are adopted so new generalizations can
        // land even when the count stands still.
        let candidate_unmatched = candidate.unmatched_indices(lines).len();
        if candidate_unmatched <= unmatched.len() {
            store.save_head_pattern(library, candidate.pattern())?;
            best = candidate;
        } else if !grew {
            // Nothing new to show the agent and the candidate regressed.
            break;
        }
    }

    Ok(best)
}

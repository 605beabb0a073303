//! Diverse line sampling for LM prompts.
//!
//! A k-center heuristic over Jaccard distance of lowercase alphanumeric token
//! sets. Deterministic: ties break by input order, so the same pool always
//! yields the same picks.

use std::collections::HashSet;

/// Pool cap applied before the quadratic selection loop.
const MAX_POOL: usize = 200;

/// Pick up to `k` maximally different lines from `lines`.
///
/// Duplicates are removed first (keeping first occurrences), the pool is
/// uniformly thinned to 200 entries, then lines are greedily selected by
/// maximum minimum-Jaccard-distance to the already-selected set, seeded with
/// the first pool entry. Returns fewer than `k` items when the pool is small.
pub fn diverse<S: AsRef<str>>(lines: &[S], k: usize) -> Vec<String> {
    if k == 0 {
        return Vec::new();
    }

    let mut seen = HashSet::new();
    let unique: Vec<&str> = lines
        .iter()
        .map(AsRef::as_ref)
        .filter(|line| seen.insert(*line))
        .collect();

    let pool = thin(&unique, MAX_POOL);
    if pool.len() <= k {
        return pool.iter().map(|s| (*s).to_string()).collect();
    }

    let tokens: Vec<HashSet<String>> = pool.iter().map(|line| tokenize(line)).collect();

    let mut selected = vec![0usize];
    // min_dist[i] tracks each candidate's distance to its closest selected line.
    let mut min_dist: Vec<f64> = tokens.iter().map(|t| jaccard_distance(t, &tokens[0])).collect();

    while selected.len() < k {
        let mut best: Option<(usize, f64)> = None;
        for (i, &d) in min_dist.iter().enumerate() {
            if selected.contains(&i) {
                continue;
            }
            let better = best.is_none_or(|(_, bd)| d > bd);
            if better {
                best = Some((i, d));
            }
        }
        let Some((next, _)) = best else { break };
        selected.push(next);
        for (i, dist) in min_dist.iter_mut().enumerate() {
            let d = jaccard_distance(&tokens[i], &tokens[next]);
            if d < *dist {
                *dist = d;
            }
        }
    }

    selected.sort_unstable();
    selected.iter().map(|&i| pool[i].to_string()).collect()
}

/// Uniformly thin a slice to at most `limit` entries, preserving order.
fn thin<'a>(lines: &[&'a str], limit: usize) -> Vec<&'a str> {
    if lines.len() <= limit {
        return lines.to_vec();
    }
    (0..limit)
        .map(|i| lines[i * lines.len() / limit])
        .collect()
}

/// Lowercase alphanumeric token set of a line.
fn tokenize(line: &str) -> HashSet<String> {
    line.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// 1 − |A∩B| / |A∪B|; identical (or both empty) sets have distance 0.
fn jaccard_distance(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    let inter = a.intersection(b).count();
    #[allow(clippy::cast_precision_loss)]
    {
        1.0 - inter as f64 / union as f64
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn returns_all_when_pool_is_small() {
        let lines = ["a b", "c d"];
        assert_eq!(diverse(&lines, 5), vec!["a b", "c d"]);
    }

    #[test]
    fn duplicates_are_removed() {
        let lines = ["same line", "same line", "same line"];
        assert_eq!(diverse(&lines, 3), vec!["same line"]);
    }

    #[test]
    fn picks_are_maximally_different() {
        let lines = [
            "user alice logged in",
            "user bob logged in",
            "disk /dev/sda1 is full",
            "user carol logged in",
        ];
        let picked = diverse(&lines, 2);
        assert_eq!(picked.len(), 2);
        assert!(picked.contains(&"user alice logged in".to_string()));
        assert!(picked.contains(&"disk /dev/sda1 is full".to_string()));
    }

    #[test]
    fn zero_k_yields_nothing() {
        let lines = ["a"];
        assert!(diverse(&lines, 0).is_empty());
    }

    #[test]
    fn selection_is_deterministic() {
        let lines: Vec<String> = (0..50)
            .map(|i| format!("evt {} code {}", i % 7, i % 3))
            .collect();
        assert_eq!(diverse(&lines, 4), diverse(&lines, 4));
    }

    #[test]
    fn thin_preserves_order_and_bounds() {
        let lines: Vec<String> = (0..1000).map(|i| format!("line {i}")).collect();
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let thinned = thin(&refs, 200);
        assert_eq!(thinned.len(), 200);
        assert_eq!(thinned[0], "line 0");
        let positions: Vec<usize> = thinned
            .iter()
            .map(|l| l.trim_start_matches("line ").parse().unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }
}

//! Run report writers.
//!
//! Per run: `<runId>-matches.csv` always (the authoritative replay output),
//! `<runId>-conflicts.json` and `<runId>-failures.jsonl` only when non-empty.
//! Writes go to a temp file first and rename into place so a crash never
//! leaves a partial report behind.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Context as _;

use logloom_common::entry::MatchRecord;
use logloom_common::failure::FailureRecord;

use crate::orchestrator::ConflictReport;

/// Quote a CSV field per RFC 4180 when it contains separators or quotes.
fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn atomic_write(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes).with_context(|| format!("write {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("rename into {}", path.display()))?;
    Ok(())
}

/// Write the match report CSV: `raw_log, template_id, template_pattern,
/// variables` with the variable map JSON-encoded.
///
/// Records must already be sorted by line index; this function writes them in
/// the order given.
///
/// # Errors
///
/// Returns an error on serialization or filesystem failure.
pub fn write_matches_csv(dir: &Path, run_id: &str, records: &[MatchRecord]) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let path = dir.join(format!("{run_id}-matches.csv"));

    let mut out = Vec::new();
    writeln!(out, "raw_log,template_id,template_pattern,variables")?;
    for record in records {
        let variables = serde_json::to_string(&record.variables).context("encode variables")?;
        writeln!(
            out,
            "{},{},{},{}",
            csv_field(&record.raw),
            csv_field(&record.template_id),
            csv_field(&record.template_pattern),
            csv_field(&variables),
        )?;
    }
    atomic_write(&path, &out)?;
    Ok(path)
}

/// Write unresolved-conflict reports as pretty JSON. Skipped when empty.
///
/// # Errors
///
/// Returns an error on serialization or filesystem failure.
pub fn write_conflicts_json(
    dir: &Path,
    run_id: &str,
    conflicts: &[ConflictReport],
) -> anyhow::Result<Option<PathBuf>> {
    if conflicts.is_empty() {
        return Ok(None);
    }
    std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let path = dir.join(format!("{run_id}-conflicts.json"));
    let json = serde_json::to_vec_pretty(conflicts).context("encode conflicts")?;
    atomic_write(&path, &json)?;
    Ok(Some(path))
}

/// Write failure records as line-delimited JSON. Skipped when empty.
///
/// # Errors
///
/// Returns an error on serialization or filesystem failure.
pub fn write_failures_jsonl(
    dir: &Path,
    run_id: &str,
    failures: &[FailureRecord],
) -> anyhow::Result<Option<PathBuf>> {
    if failures.is_empty() {
        return Ok(None);
    }
    std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let path = dir.join(format!("{run_id}-failures.jsonl"));
    let mut out = Vec::new();
    for failure in failures {
        serde_json::to_writer(&mut out, failure).context("encode failure record")?;
        out.push(b'\n');
    }
    atomic_write(&path, &out)?;
    Ok(Some(path))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn record(raw: &str) -> MatchRecord {
        MatchRecord {
            line_index: 0,
            raw: raw.to_string(),
            content: None,
            template_id: "lib#1".to_string(),
            template_pattern: "x ⟪1⟫".to_string(),
            variables: BTreeMap::from([("v1".to_string(), "1".to_string())]),
        }
    }

    #[test]
    fn csv_has_header_and_quoted_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_matches_csv(dir.path(), "run1", &[record("x 1")]).unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("raw_log,template_id,template_pattern,variables"));
        let row = lines.next().unwrap();
        assert!(row.starts_with("x 1,lib#1,"));
        // The JSON map contains commas and quotes, so it must be quoted.
        assert!(row.contains("\"{\"\"v1\"\":\"\"1\"\"}\""));
    }

    #[test]
    fn csv_escapes_commas_and_quotes_in_raw() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_matches_csv(dir.path(), "run1", &[record("a,b \"c\"")]).unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("\"a,b \"\"c\"\"\""));
    }

    #[test]
    fn empty_conflicts_and_failures_write_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(write_conflicts_json(dir.path(), "run1", &[]).unwrap(), None);
        assert_eq!(write_failures_jsonl(dir.path(), "run1", &[]).unwrap(), None);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn failures_are_line_delimited() {
        use logloom_common::failure::Stage;
        let dir = tempfile::tempdir().unwrap();
        let failures = vec![
            FailureRecord {
                line_index: 1,
                raw: "a".to_string(),
                stage: Stage::Parsing,
                reason: "r1".to_string(),
                timestamp: "t".to_string(),
                template: None,
                details: None,
            },
            FailureRecord {
                line_index: 2,
                raw: "b".to_string(),
                stage: Stage::Validation,
                reason: "r2".to_string(),
                timestamp: "t".to_string(),
                template: None,
                details: None,
            },
        ];
        let path = write_failures_jsonl(dir.path(), "run1", &failures)
            .unwrap()
            .unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        let rows: Vec<&str> = text.lines().collect();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].contains("\"parsing\""));
        assert!(rows[1].contains("\"validation\""));
    }
}

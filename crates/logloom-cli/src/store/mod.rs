//! SQLite-backed template library store.
//!
//! One database file per library, named by the percent-encoded library id.
//! Three tables: a single-row `library` metadata table carrying the template
//! counter and head pattern, `templates`, and the `matched_samples` ring.
//! Every mutation runs in its own transaction; mutations on one library are
//! serialized behind a per-library connection mutex.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Context as _;
use rusqlite::Connection;

use logloom_common::entry::MatchRecord;
use logloom_common::slug::{percent_decode, percent_encode};
use logloom_common::template::{LibraryView, MatchedSample, TemplateRecord};

/// Handle to the library root directory.
pub struct Store {
    root: PathBuf,
    max_samples: usize,
    connections: Mutex<HashMap<String, Arc<Mutex<Connection>>>>,
}

impl Store {
    /// Open (creating if needed) a store rooted at `root`.
    ///
    /// `max_samples` bounds each library's matched-sample ring buffer.
    ///
    /// # Errors
    ///
    /// Returns an error when the root directory cannot be created.
    pub fn open(root: impl Into<PathBuf>, max_samples: usize) -> anyhow::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("create library root {}", root.display()))?;
        Ok(Self {
            root,
            max_samples,
            connections: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// On-disk path for a library id.
    pub fn library_path(&self, library: &str) -> PathBuf {
        self.root.join(format!("{}.db", percent_encode(library)))
    }

    /// Get or open the serialized connection for one library.
    fn connection(&self, library: &str) -> anyhow::Result<Arc<Mutex<Connection>>> {
        let mut map = self
            .connections
            .lock()
            .map_err(|_| anyhow::anyhow!("store connection map poisoned"))?;
        if let Some(conn) = map.get(library) {
            return Ok(Arc::clone(conn));
        }
        let path = self.library_path(library);
        let conn = open_db(&path)?;
        let conn = Arc::new(Mutex::new(conn));
        map.insert(library.to_string(), Arc::clone(&conn));
        Ok(conn)
    }

    fn lock<'a>(conn: &'a Arc<Mutex<Connection>>) -> anyhow::Result<MutexGuard<'a, Connection>> {
        conn.lock()
            .map_err(|_| anyhow::anyhow!("library connection poisoned"))
    }

    /// Enumerate library ids present on disk.
    ///
    /// # Errors
    ///
    /// Returns an error when the root directory cannot be read.
    pub fn list_libraries(&self) -> anyhow::Result<Vec<String>> {
        let mut ids = Vec::new();
        let entries = std::fs::read_dir(&self.root)
            .with_context(|| format!("read library root {}", self.root.display()))?;
        for entry in entries {
            let entry = entry.context("read library root entry")?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(stem) = name.strip_suffix(".db") {
                ids.push(percent_decode(stem));
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Load a consistent snapshot of one library.
    ///
    /// Templates come back in creation order (the match precedence order);
    /// samples oldest-first, bounded by the ring-buffer budget.
    ///
    /// # Errors
    ///
    /// Returns an error on any query failure.
    pub fn load_library(&self, library: &str) -> anyhow::Result<LibraryView> {
        let conn = self.connection(library)?;
        let mut guard = Self::lock(&conn)?;
        let tx = guard.transaction().context("begin load transaction")?;

        let head_pattern = tx
            .query_row("SELECT head_pattern FROM library LIMIT 1", [], |row| {
                row.get::<_, Option<String>>(0)
            })
            .ok()
            .flatten();

        let templates = {
            let mut stmt = tx.prepare(
                "SELECT id, placeholder_template, example_values, metadata, created_at
                 FROM templates
                 ORDER BY seq ASC",
            )?;
            let rows = stmt.query_map([], map_template_row)?;
            let mut templates = Vec::new();
            for row in rows {
                templates.push(row.context("read template row")?);
            }
            templates
        };

        let samples = {
            #[allow(clippy::cast_possible_wrap)]
            let limit = self.max_samples as i64;
            let mut stmt = tx.prepare(
                "SELECT seq, template_id, line_index, raw, content, variables
                 FROM matched_samples
                 ORDER BY seq DESC
                 LIMIT ?1",
            )?;
            let rows = stmt.query_map([limit], map_sample_row)?;
            let mut samples = Vec::new();
            for row in rows {
                samples.push(row.context("read sample row")?);
            }
            samples.reverse();
            samples
        };

        tx.commit().context("commit load transaction")?;
        Ok(LibraryView {
            id: library.to_string(),
            templates,
            samples,
            head_pattern,
        })
    }

    /// Upsert a template.
    ///
    /// A record with an empty id is assigned `<library>#<n>` from the
    /// library's monotonic counter (incremented in the same transaction) and
    /// the record is updated in place. Existing ids replace the stored
    /// template but keep its creation slot.
    ///
    /// # Errors
    ///
    /// Returns an error on any statement failure; the transaction rolls back.
    pub fn save_template(&self, library: &str, record: &mut TemplateRecord) -> anyhow::Result<()> {
        let conn = self.connection(library)?;
        let mut guard = Self::lock(&conn)?;
        let tx = guard.transaction().context("begin save transaction")?;

        let example_values =
            serde_json::to_string(&record.example_values).context("serialize example values")?;
        let metadata = serde_json::to_string(&record.metadata).context("serialize metadata")?;

        if record.id.is_empty() {
            let number: i64 = tx
                .query_row("SELECT next_template_number FROM library LIMIT 1", [], |row| {
                    row.get(0)
                })
                .context("read template counter")?;
            tx.execute(
                "UPDATE library SET next_template_number = next_template_number + 1",
                [],
            )
            .context("advance template counter")?;
            record.id = format!("{library}#{number}");
            tx.execute(
                "INSERT INTO templates
                    (id, placeholder_template, example_values, metadata, created_at, seq)
                 VALUES
                    (?1, ?2, ?3, ?4, strftime('%Y-%m-%dT%H:%M:%SZ','now'), ?5)",
                rusqlite::params![
                    record.id,
                    record.placeholder_template,
                    example_values,
                    metadata,
                    number
                ],
            )
            .context("insert template")?;
        } else {
            tx.execute(
                "UPDATE templates
                 SET placeholder_template = ?2, example_values = ?3, metadata = ?4
                 WHERE id = ?1",
                rusqlite::params![record.id, record.placeholder_template, example_values, metadata],
            )
            .context("update template")?;
        }

        tx.commit().context("commit template")?;
        Ok(())
    }

    /// Delete a template, returning the matched samples that were attributed
    /// to it (they are removed alongside it).
    ///
    /// # Errors
    ///
    /// Returns an error on any statement failure; the transaction rolls back.
    pub fn delete_template(
        &self,
        library: &str,
        template_id: &str,
    ) -> anyhow::Result<Vec<MatchedSample>> {
        let conn = self.connection(library)?;
        let mut guard = Self::lock(&conn)?;
        let tx = guard.transaction().context("begin delete transaction")?;

        let orphaned = {
            let mut stmt = tx.prepare(
                "SELECT seq, template_id, line_index, raw, content, variables
                 FROM matched_samples
                 WHERE template_id = ?1
                 ORDER BY seq ASC",
            )?;
            let rows = stmt.query_map([template_id], map_sample_row)?;
            let mut orphaned = Vec::new();
            for row in rows {
                orphaned.push(row.context("read orphaned sample")?);
            }
            orphaned
        };

        tx.execute("DELETE FROM templates WHERE id = ?1", [template_id])
            .context("delete template")?;
        tx.execute(
            "DELETE FROM matched_samples WHERE template_id = ?1",
            [template_id],
        )
        .context("delete orphaned samples")?;

        tx.commit().context("commit delete")?;
        Ok(orphaned)
    }

    /// Append match records to the ring buffer, evicting oldest entries once
    /// the budget is exceeded.
    ///
    /// # Errors
    ///
    /// Returns an error on any statement failure; the transaction rolls back.
    pub fn record_matches(&self, library: &str, records: &[MatchRecord]) -> anyhow::Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let conn = self.connection(library)?;
        let mut guard = Self::lock(&conn)?;
        let tx = guard.transaction().context("begin record transaction")?;

        for record in records {
            let variables =
                serde_json::to_string(&record.variables).context("serialize variables")?;
            #[allow(clippy::cast_possible_wrap)]
            let line_index = record.line_index as i64;
            tx.execute(
                "INSERT INTO matched_samples
                    (template_id, line_index, raw, content, variables, created_at)
                 VALUES
                    (?1, ?2, ?3, ?4, ?5, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
                rusqlite::params![
                    record.template_id,
                    line_index,
                    record.raw,
                    record.content,
                    variables
                ],
            )
            .context("insert matched sample")?;
        }

        // FIFO eviction keeps only the newest max_samples rows.
        #[allow(clippy::cast_possible_wrap)]
        let limit = self.max_samples as i64;
        tx.execute(
            "DELETE FROM matched_samples
             WHERE seq NOT IN (
                 SELECT seq FROM matched_samples
                 ORDER BY seq DESC
                 LIMIT ?1
             )",
            [limit],
        )
        .context("enforce sample retention")?;

        tx.commit().context("commit matches")?;
        Ok(())
    }

    /// Overwrite the library's head pattern.
    ///
    /// # Errors
    ///
    /// Returns an error when the update fails.
    pub fn save_head_pattern(&self, library: &str, head: &str) -> anyhow::Result<()> {
        let conn = self.connection(library)?;
        let guard = Self::lock(&conn)?;
        guard
            .execute("UPDATE library SET head_pattern = ?1", [head])
            .context("save head pattern")?;
        Ok(())
    }
}

/// Open a library database and ensure its schema exists.
///
/// # Errors
///
/// Returns an error if the DB cannot be opened or the schema cannot be
/// created.
fn open_db(path: &Path) -> anyhow::Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("open library db {}", path.display()))?;
    init_schema(&conn)?;
    Ok(conn)
}

/// Initialize the three logical tables and the singleton metadata row.
fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS library (
            id                   INTEGER PRIMARY KEY CHECK (id = 1),
            next_template_number INTEGER NOT NULL DEFAULT 1,
            head_pattern         TEXT
        );
        INSERT OR IGNORE INTO library (id) VALUES (1);
        CREATE TABLE IF NOT EXISTS templates (
            id                   TEXT PRIMARY KEY,
            placeholder_template TEXT NOT NULL,
            example_values       TEXT NOT NULL,
            metadata             TEXT NOT NULL,
            created_at           TEXT NOT NULL,
            seq                  INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_templates_seq ON templates(seq);
        CREATE TABLE IF NOT EXISTS matched_samples (
            seq         INTEGER PRIMARY KEY AUTOINCREMENT,
            template_id TEXT,
            line_index  INTEGER NOT NULL,
            raw         TEXT NOT NULL,
            content     TEXT,
            variables   TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_samples_template ON matched_samples(template_id);",
    )
    .context("create library schema")?;
    Ok(())
}

fn map_template_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TemplateRecord> {
    let example_values: String = row.get(2)?;
    let metadata: String = row.get(3)?;
    Ok(TemplateRecord {
        id: row.get(0)?,
        placeholder_template: row.get(1)?,
        example_values: serde_json::from_str(&example_values).unwrap_or_default(),
        metadata: serde_json::from_str(&metadata).unwrap_or_default(),
        created_at: row.get(4)?,
    })
}

fn map_sample_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MatchedSample> {
    let variables: String = row.get(5)?;
    let line_index: i64 = row.get(2)?;
    Ok(MatchedSample {
        seq: row.get(0)?,
        template_id: row.get(1)?,
        line_index: u64::try_from(line_index).unwrap_or(0),
        raw: row.get(3)?,
        content: row.get(4)?,
        variables: serde_json::from_str::<BTreeMap<String, String>>(&variables).unwrap_or_default(),
    })
}

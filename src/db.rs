use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, params};

use crate::errors::WorkflowError;
use crate::models::{PhaseDefinition, PhaseInstance, PhaseReview, PhaseStatus, ReviewOutcome};
use crate::templates::TemplateSet;

/// Current UTC time as an RFC 3339 string, the format used for every
/// engine-written timestamp column.
pub(crate) fn now_utc() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Async-safe handle to the workflow database.
///
/// Wraps `WorkflowDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, preventing synchronous SQLite
/// I/O from tying up async worker threads. The mutex also serializes all
/// writers within this process; cross-process correctness comes from the
/// status-guarded conditional updates in the transition controller.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<WorkflowDb>>,
}

impl DbHandle {
    pub fn new(db: WorkflowDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R, WorkflowError>
    where
        F: FnOnce(&WorkflowDb) -> Result<R, WorkflowError> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| WorkflowError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .map_err(|e| WorkflowError::Other(anyhow::anyhow!("DB task panicked: {}", e)))?
    }
}

pub struct WorkflowDb {
    pub(crate) conn: Connection,
}

impl WorkflowDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> anyhow::Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> anyhow::Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> anyhow::Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS phase_definitions (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    sort_order INTEGER NOT NULL UNIQUE,
                    entry_criteria TEXT NOT NULL DEFAULT '',
                    exit_criteria TEXT NOT NULL DEFAULT '',
                    deliverables TEXT NOT NULL DEFAULT '[]'
                );

                CREATE TABLE IF NOT EXISTS phase_instances (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    project_id INTEGER NOT NULL,
                    phase_definition_id INTEGER NOT NULL REFERENCES phase_definitions(id),
                    status TEXT NOT NULL DEFAULT 'not_started',
                    started_at TEXT,
                    completed_at TEXT,
                    review_id INTEGER,
                    UNIQUE(project_id, phase_definition_id)
                );

                CREATE TABLE IF NOT EXISTS phase_reviews (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    phase_instance_id INTEGER NOT NULL REFERENCES phase_instances(id),
                    review_title TEXT NOT NULL,
                    scope TEXT NOT NULL DEFAULT '',
                    reviewer_ids TEXT NOT NULL DEFAULT '[]',
                    outcome TEXT NOT NULL DEFAULT 'pending',
                    comments TEXT,
                    action_items TEXT NOT NULL DEFAULT '[]',
                    signature_hash TEXT,
                    signed_at TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS audit_entries (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    phase_instance_id INTEGER NOT NULL REFERENCES phase_instances(id),
                    action TEXT NOT NULL,
                    from_status TEXT,
                    to_status TEXT,
                    performed_by TEXT NOT NULL,
                    reason_code TEXT,
                    comments TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE INDEX IF NOT EXISTS idx_instances_project ON phase_instances(project_id);
                CREATE INDEX IF NOT EXISTS idx_reviews_instance ON phase_reviews(phase_instance_id);
                CREATE INDEX IF NOT EXISTS idx_audit_instance ON audit_entries(phase_instance_id);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    /// Seed the phase template catalog.
    ///
    /// On an empty registry the catalog is published as-is. On a populated
    /// registry the stored catalog must match the provided one — published
    /// templates are immutable, so a mismatch is a configuration error, not
    /// a silent rewrite.
    pub fn seed_templates(&self, set: &TemplateSet) -> Result<(), WorkflowError> {
        set.validate()?;

        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM phase_definitions", [], |row| {
                    row.get(0)
                })?;

        if count == 0 {
            let tx = self.conn.unchecked_transaction()?;
            for t in set.ordered() {
                let deliverables = serde_json::to_string(&t.deliverables)
                    .map_err(|e| WorkflowError::Configuration(e.to_string()))?;
                tx.execute(
                    "INSERT INTO phase_definitions (name, sort_order, entry_criteria, exit_criteria, deliverables)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![t.name, t.sort_order, t.entry_criteria, t.exit_criteria, deliverables],
                )?;
            }
            tx.commit()?;
            return Ok(());
        }

        let stored = self.list_definitions()?;
        if stored.len() != set.templates.len() {
            return Err(WorkflowError::Configuration(format!(
                "published template catalog has {} phases but the configured catalog has {}; \
                 published templates are immutable",
                stored.len(),
                set.templates.len()
            )));
        }
        for (def, t) in stored.iter().zip(set.ordered()) {
            if def.name != t.name || def.sort_order != t.sort_order {
                return Err(WorkflowError::Configuration(format!(
                    "published template '{}' (order {}) does not match configured '{}' (order {})",
                    def.name, def.sort_order, t.name, t.sort_order
                )));
            }
        }
        Ok(())
    }

    // ── Row lookups ───────────────────────────────────────────────────

    /// The template catalog in lifecycle order.
    pub fn list_definitions(&self) -> Result<Vec<PhaseDefinition>, WorkflowError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, sort_order, entry_criteria, exit_criteria, deliverables
             FROM phase_definitions ORDER BY sort_order",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;
        let mut defs = Vec::new();
        for row in rows {
            let (id, name, sort_order, entry_criteria, exit_criteria, deliverables) = row?;
            defs.push(PhaseDefinition {
                id,
                name,
                sort_order,
                entry_criteria,
                exit_criteria,
                deliverables: parse_json_list(&deliverables)?,
            });
        }
        Ok(defs)
    }

    pub fn get_instance(&self, id: i64) -> Result<Option<PhaseInstance>, WorkflowError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, project_id, phase_definition_id, status, started_at, completed_at, review_id
             FROM phase_instances WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], map_instance_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?.into_instance()?)),
            None => Ok(None),
        }
    }

    /// A phase instance, failing with `InstanceNotFound` when absent.
    pub fn require_instance(&self, id: i64) -> Result<PhaseInstance, WorkflowError> {
        self.get_instance(id)?
            .ok_or(WorkflowError::InstanceNotFound { id })
    }

    /// All instances for a project joined with their definitions, in
    /// lifecycle order.
    pub fn list_instances(
        &self,
        project_id: i64,
    ) -> Result<Vec<(PhaseInstance, String, i64)>, WorkflowError> {
        let mut stmt = self.conn.prepare(
            "SELECT i.id, i.project_id, i.phase_definition_id, i.status,
                    i.started_at, i.completed_at, i.review_id, d.name, d.sort_order
             FROM phase_instances i
             JOIN phase_definitions d ON d.id = i.phase_definition_id
             WHERE i.project_id = ?1
             ORDER BY d.sort_order",
        )?;
        let rows = stmt.query_map(params![project_id], |row| {
            Ok((
                map_instance_row(row)?,
                row.get::<_, String>(7)?,
                row.get::<_, i64>(8)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (raw, name, sort_order) = row?;
            out.push((raw.into_instance()?, name, sort_order));
        }
        Ok(out)
    }

    pub fn get_review(&self, id: i64) -> Result<Option<PhaseReview>, WorkflowError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, phase_instance_id, review_title, scope, reviewer_ids, outcome,
                    comments, action_items, signature_hash, signed_at, created_at
             FROM phase_reviews WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], |row| {
            Ok(ReviewRow {
                id: row.get(0)?,
                phase_instance_id: row.get(1)?,
                review_title: row.get(2)?,
                scope: row.get(3)?,
                reviewer_ids: row.get(4)?,
                outcome: row.get(5)?,
                comments: row.get(6)?,
                action_items: row.get(7)?,
                signature_hash: row.get(8)?,
                signed_at: row.get(9)?,
                created_at: row.get(10)?,
            })
        })?;
        match rows.next() {
            Some(row) => Ok(Some(row?.into_review()?)),
            None => Ok(None),
        }
    }

    /// A review, failing with `ReviewNotFound` when absent.
    pub fn require_review(&self, id: i64) -> Result<PhaseReview, WorkflowError> {
        self.get_review(id)?
            .ok_or(WorkflowError::ReviewNotFound { id })
    }
}

// ── Raw rows ──────────────────────────────────────────────────────────

/// Instance columns as stored, before enum parsing.
pub(crate) struct InstanceRow {
    pub id: i64,
    pub project_id: i64,
    pub phase_definition_id: i64,
    pub status: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub review_id: Option<i64>,
}

impl InstanceRow {
    pub fn into_instance(self) -> Result<PhaseInstance, WorkflowError> {
        let status = PhaseStatus::from_str(&self.status)
            .map_err(|e| WorkflowError::Other(anyhow::anyhow!(e)))?;
        Ok(PhaseInstance {
            id: self.id,
            project_id: self.project_id,
            phase_definition_id: self.phase_definition_id,
            status,
            started_at: self.started_at,
            completed_at: self.completed_at,
            review_id: self.review_id,
        })
    }
}

pub(crate) fn map_instance_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<InstanceRow> {
    Ok(InstanceRow {
        id: row.get(0)?,
        project_id: row.get(1)?,
        phase_definition_id: row.get(2)?,
        status: row.get(3)?,
        started_at: row.get(4)?,
        completed_at: row.get(5)?,
        review_id: row.get(6)?,
    })
}

struct ReviewRow {
    id: i64,
    phase_instance_id: i64,
    review_title: String,
    scope: String,
    reviewer_ids: String,
    outcome: String,
    comments: Option<String>,
    action_items: String,
    signature_hash: Option<String>,
    signed_at: Option<String>,
    created_at: String,
}

impl ReviewRow {
    fn into_review(self) -> Result<PhaseReview, WorkflowError> {
        let outcome = ReviewOutcome::from_str(&self.outcome)
            .map_err(|e| WorkflowError::Other(anyhow::anyhow!(e)))?;
        Ok(PhaseReview {
            id: self.id,
            phase_instance_id: self.phase_instance_id,
            review_title: self.review_title,
            scope: self.scope,
            reviewer_ids: parse_json_list(&self.reviewer_ids)?,
            outcome,
            comments: self.comments,
            action_items: parse_json_list(&self.action_items)?,
            signature_hash: self.signature_hash,
            signed_at: self.signed_at,
            created_at: self.created_at,
        })
    }
}

pub(crate) fn parse_json_list(raw: &str) -> Result<Vec<String>, WorkflowError> {
    serde_json::from_str(raw)
        .map_err(|e| WorkflowError::Other(anyhow::anyhow!("corrupt JSON list column: {}", e)))
}

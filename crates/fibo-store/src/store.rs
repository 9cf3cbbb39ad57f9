use chrono::{DateTime, SecondsFormat, Utc};
use futures::future::BoxFuture;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

use fibo_core::error::{FiboError, Result};
use fibo_core::run::{RunStatus, WorkflowRun};
use fibo_core::traits::{RunStore, WorkflowStore};
use fibo_core::workflow::Workflow;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS workflows (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        name TEXT NOT NULL,
        description TEXT,
        definition TEXT NOT NULL,
        version INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_workflows_user ON workflows(user_id, created_at);

    CREATE TABLE IF NOT EXISTS workflow_runs (
        id TEXT PRIMARY KEY,
        workflow_id TEXT NOT NULL REFERENCES workflows(id) ON DELETE CASCADE,
        user_id TEXT NOT NULL,
        status TEXT NOT NULL,
        snapshot TEXT NOT NULL,
        version INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        completed_at TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_runs_user ON workflow_runs(user_id, created_at);
    CREATE INDEX IF NOT EXISTS idx_runs_workflow ON workflow_runs(workflow_id);";

/// SQLite-backed store for workflows and runs.
///
/// Run snapshots are stored as JSON next to their status, and every save is
/// a compare-and-swap on the `version` column.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn db_err(e: impl std::fmt::Display) -> FiboError {
    FiboError::Database(e.to_string())
}

impl SqliteStore {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                FiboError::Database(format!("Failed to create db directory: {}", e))
            })?;
        }

        let conn = Connection::open(path).map_err(db_err)?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;

        let store = Self::init(conn)?;
        debug!(path = %path.display(), "SQLite store opened");
        Ok(store)
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory().map_err(db_err)?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;").map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(db_err)
    }
}

/// Fixed-width so that text ordering matches time ordering.
fn stamp(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| FiboError::Database(format!("Invalid timestamp '{raw}': {e}")))
}

type WorkflowRow = (String, String, String, Option<String>, String, i64, String, String);

fn workflow_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<WorkflowRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn decode_workflow(row: WorkflowRow) -> Result<Workflow> {
    let (id, user_id, name, description, definition, version, created_at, updated_at) = row;
    Ok(Workflow {
        id,
        user_id,
        name,
        description,
        definition: serde_json::from_str(&definition)?,
        version: version as u32,
        created_at: parse_time(&created_at)?,
        updated_at: parse_time(&updated_at)?,
    })
}

type RunRow = (String, String, String, String, String, i64, String, Option<String>);

fn run_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn decode_run(row: RunRow) -> Result<WorkflowRun> {
    let (id, workflow_id, user_id, status, snapshot, version, created_at, completed_at) = row;
    let status = RunStatus::parse(&status)
        .ok_or_else(|| FiboError::Database(format!("Unknown run status '{status}'")))?;
    Ok(WorkflowRun {
        id,
        workflow_id,
        user_id,
        status,
        snapshot: serde_json::from_str(&snapshot)?,
        created_at: parse_time(&created_at)?,
        completed_at: completed_at.as_deref().map(parse_time).transpose()?,
        version: version as u64,
    })
}

const WORKFLOW_COLUMNS: &str =
    "id, user_id, name, description, definition, version, created_at, updated_at";
const RUN_COLUMNS: &str =
    "id, workflow_id, user_id, status, snapshot, version, created_at, completed_at";

impl WorkflowStore for SqliteStore {
    fn insert_workflow(&self, workflow: &Workflow) -> BoxFuture<'_, Result<()>> {
        let workflow = workflow.clone();
        Box::pin(async move {
            let definition = serde_json::to_string(&workflow.definition)?;
            let conn = self.lock()?;
            conn.execute(
                "INSERT INTO workflows (id, user_id, name, description, definition, version, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    workflow.id,
                    workflow.user_id,
                    workflow.name,
                    workflow.description,
                    definition,
                    workflow.version as i64,
                    stamp(&workflow.created_at),
                    stamp(&workflow.updated_at),
                ],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }

    fn get_workflow(&self, id: &str, user_id: &str) -> BoxFuture<'_, Result<Option<Workflow>>> {
        let id = id.to_string();
        let user_id = user_id.to_string();
        Box::pin(async move {
            let conn = self.lock()?;
            let row = conn
                .query_row(
                    &format!("SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE id = ?1 AND user_id = ?2"),
                    params![id, user_id],
                    workflow_from_row,
                )
                .optional()
                .map_err(db_err)?;
            row.map(decode_workflow).transpose()
        })
    }

    fn list_workflows(
        &self,
        user_id: &str,
        skip: usize,
        limit: usize,
    ) -> BoxFuture<'_, Result<(Vec<Workflow>, usize)>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            let conn = self.lock()?;
            let total: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM workflows WHERE user_id = ?1",
                    params![user_id],
                    |row| row.get(0),
                )
                .map_err(db_err)?;

            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {WORKFLOW_COLUMNS} FROM workflows
                     WHERE user_id = ?1
                     ORDER BY created_at DESC, rowid DESC
                     LIMIT ?2 OFFSET ?3"
                ))
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![user_id, limit as i64, skip as i64], workflow_from_row)
                .map_err(db_err)?;

            let mut workflows = Vec::new();
            for row in rows {
                workflows.push(decode_workflow(row.map_err(db_err)?)?);
            }
            Ok((workflows, total as usize))
        })
    }

    fn update_workflow(&self, workflow: &Workflow) -> BoxFuture<'_, Result<bool>> {
        let workflow = workflow.clone();
        Box::pin(async move {
            let definition = serde_json::to_string(&workflow.definition)?;
            let conn = self.lock()?;
            let changed = conn
                .execute(
                    "UPDATE workflows
                     SET name = ?1, description = ?2, definition = ?3, version = ?4, updated_at = ?5
                     WHERE id = ?6 AND user_id = ?7",
                    params![
                        workflow.name,
                        workflow.description,
                        definition,
                        workflow.version as i64,
                        stamp(&workflow.updated_at),
                        workflow.id,
                        workflow.user_id,
                    ],
                )
                .map_err(db_err)?;
            Ok(changed > 0)
        })
    }

    fn delete_workflow(&self, id: &str, user_id: &str) -> BoxFuture<'_, Result<bool>> {
        let id = id.to_string();
        let user_id = user_id.to_string();
        Box::pin(async move {
            let conn = self.lock()?;
            let changed = conn
                .execute(
                    "DELETE FROM workflows WHERE id = ?1 AND user_id = ?2",
                    params![id, user_id],
                )
                .map_err(db_err)?;
            if changed > 0 {
                debug!(workflow_id = %id, "Workflow deleted with its runs");
            }
            Ok(changed > 0)
        })
    }
}

impl RunStore for SqliteStore {
    fn insert_run(&self, run: &WorkflowRun) -> BoxFuture<'_, Result<()>> {
        let run = run.clone();
        Box::pin(async move {
            let snapshot = serde_json::to_string(&run.snapshot)?;
            let conn = self.lock()?;
            conn.execute(
                "INSERT INTO workflow_runs (id, workflow_id, user_id, status, snapshot, version, created_at, completed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    run.id,
                    run.workflow_id,
                    run.user_id,
                    run.status.as_str(),
                    snapshot,
                    run.version as i64,
                    stamp(&run.created_at),
                    run.completed_at.as_ref().map(stamp),
                ],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }

    fn load_run(&self, run_id: &str) -> BoxFuture<'_, Result<Option<WorkflowRun>>> {
        let run_id = run_id.to_string();
        Box::pin(async move {
            let conn = self.lock()?;
            let row = conn
                .query_row(
                    &format!("SELECT {RUN_COLUMNS} FROM workflow_runs WHERE id = ?1"),
                    params![run_id],
                    run_from_row,
                )
                .optional()
                .map_err(db_err)?;
            row.map(decode_run).transpose()
        })
    }

    fn save_run(&self, run: &WorkflowRun) -> BoxFuture<'_, Result<u64>> {
        let run = run.clone();
        Box::pin(async move {
            let snapshot = serde_json::to_string(&run.snapshot)?;
            let conn = self.lock()?;
            let changed = conn
                .execute(
                    "UPDATE workflow_runs
                     SET status = ?1, snapshot = ?2, completed_at = ?3, version = version + 1
                     WHERE id = ?4 AND version = ?5",
                    params![
                        run.status.as_str(),
                        snapshot,
                        run.completed_at.as_ref().map(stamp),
                        run.id,
                        run.version as i64,
                    ],
                )
                .map_err(db_err)?;

            if changed == 0 {
                let exists = conn
                    .query_row(
                        "SELECT 1 FROM workflow_runs WHERE id = ?1",
                        params![run.id],
                        |_| Ok(()),
                    )
                    .optional()
                    .map_err(db_err)?
                    .is_some();
                return Err(if exists {
                    FiboError::Conflict(format!(
                        "Run {} was modified concurrently (expected version {})",
                        run.id, run.version
                    ))
                } else {
                    FiboError::RunNotFound(run.id.clone())
                });
            }
            Ok(run.version + 1)
        })
    }

    fn list_runs(
        &self,
        user_id: &str,
        skip: usize,
        limit: usize,
    ) -> BoxFuture<'_, Result<(Vec<WorkflowRun>, usize)>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            let conn = self.lock()?;
            let total: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM workflow_runs WHERE user_id = ?1",
                    params![user_id],
                    |row| row.get(0),
                )
                .map_err(db_err)?;

            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {RUN_COLUMNS} FROM workflow_runs
                     WHERE user_id = ?1
                     ORDER BY created_at DESC, rowid DESC
                     LIMIT ?2 OFFSET ?3"
                ))
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![user_id, limit as i64, skip as i64], run_from_row)
                .map_err(db_err)?;

            let mut runs = Vec::new();
            for row in rows {
                runs.push(decode_run(row.map_err(db_err)?)?);
            }
            Ok((runs, total as usize))
        })
    }
}

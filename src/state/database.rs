//! Run Store
//!
//! SQLite-backed persistence for pipeline runs. Each run keeps its goal and
//! terminal status in `runs`, the full transcript in `run_messages`, and
//! per-stage summaries in `run_scratch`, so finished runs can be inspected
//! without replaying anything.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

use crate::graph::{RunReport, RunStatus};
use crate::types::ChatMessage;

use super::schema::{CREATE_TABLES, SCHEMA_VERSION};

/// Summary row for one run.
#[derive(Clone, Debug)]
pub struct RunRecord {
    pub id: String,
    pub goal: String,
    /// `None` while the run is still in flight.
    pub status: Option<RunStatus>,
    pub caveats: Vec<String>,
    pub started_at: String,
    pub finished_at: Option<String>,
}

pub struct RunStore {
    conn: Connection,
}

impl RunStore {
    /// Open (or create) the run store at `db_path` and apply the schema.
    pub fn open(db_path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create db directory: {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("failed to open run store: {db_path}"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Self::init(conn)
    }

    /// Open an in-memory store (useful for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(CREATE_TABLES)
            .context("failed to create tables")?;
        conn.execute(
            "INSERT OR REPLACE INTO schema_version (version, applied_at) VALUES (?1, datetime('now'))",
            params![SCHEMA_VERSION],
        )
        .context("failed to update schema version")?;
        Ok(Self { conn })
    }

    // ─── Runs ────────────────────────────────────────────────────

    pub fn insert_run(&self, id: &str, goal: &str, started_at: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO runs (id, goal, status, started_at) VALUES (?1, ?2, 'running', ?3)",
            params![id, goal, started_at],
        )?;
        Ok(())
    }

    /// Record a finished run: terminal status, caveats, transcript, and
    /// stage summaries, all in one transaction.
    pub fn finish_run(&mut self, id: &str, report: &RunReport, finished_at: &str) -> Result<()> {
        let status = serde_json::to_string(&report.status)?;
        let caveats = serde_json::to_string(&report.caveats)?;

        let tx = self.conn.transaction()?;
        tx.execute(
            "UPDATE runs SET status = ?2, caveats = ?3, finished_at = ?4 WHERE id = ?1",
            params![id, status, caveats, finished_at],
        )?;
        for (seq, message) in report.state.messages().iter().enumerate() {
            let role = serde_json::to_string(&message.role)?;
            let tool_calls = message
                .tool_calls
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            tx.execute(
                "INSERT INTO run_messages (run_id, seq, role, content, name, tool_call_id, tool_calls)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    id,
                    seq as i64,
                    role.trim_matches('"'),
                    message.content,
                    message.name,
                    message.tool_call_id,
                    tool_calls,
                ],
            )?;
        }
        for (stage, content) in report.state.scratch_entries() {
            tx.execute(
                "INSERT OR REPLACE INTO run_scratch (run_id, stage, content) VALUES (?1, ?2, ?3)",
                params![id, stage, content],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Close out a run that aborted before producing a report, so it does
    /// not linger as 'running'.
    pub fn fail_run(&self, id: &str, message: &str, finished_at: &str) -> Result<()> {
        let status = serde_json::to_string(&RunStatus::Failed {
            message: message.to_string(),
        })?;
        self.conn.execute(
            "UPDATE runs SET status = ?2, finished_at = ?3 WHERE id = ?1",
            params![id, status, finished_at],
        )?;
        Ok(())
    }

    pub fn get_run(&self, id: &str) -> Result<Option<RunRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT id, goal, status, caveats, started_at, finished_at FROM runs WHERE id = ?1",
                params![id],
                Self::row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    pub fn list_runs(&self, limit: i64) -> Result<Vec<RunRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, goal, status, caveats, started_at, finished_at
             FROM runs ORDER BY started_at DESC LIMIT ?1",
        )?;
        let records = stmt
            .query_map(params![limit], Self::row_to_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunRecord> {
        let status_raw: String = row.get(2)?;
        let caveats_raw: String = row.get(3)?;
        Ok(RunRecord {
            id: row.get(0)?,
            goal: row.get(1)?,
            // still-running rows carry the sentinel 'running'
            status: serde_json::from_str(&status_raw).ok(),
            caveats: serde_json::from_str(&caveats_raw).unwrap_or_default(),
            started_at: row.get(4)?,
            finished_at: row.get(5)?,
        })
    }

    // ─── Transcript ──────────────────────────────────────────────

    pub fn get_messages(&self, run_id: &str) -> Result<Vec<ChatMessage>> {
        let mut stmt = self.conn.prepare(
            "SELECT role, content, name, tool_call_id, tool_calls
             FROM run_messages WHERE run_id = ?1 ORDER BY seq",
        )?;
        let messages = stmt
            .query_map(params![run_id], |row| {
                let role_raw: String = row.get(0)?;
                let tool_calls_raw: Option<String> = row.get(4)?;
                Ok((
                    role_raw,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    tool_calls_raw,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        messages
            .into_iter()
            .map(|(role_raw, content, name, tool_call_id, tool_calls_raw)| {
                let role = serde_json::from_str(&format!("\"{role_raw}\""))
                    .with_context(|| format!("unknown role in run store: {role_raw}"))?;
                let tool_calls = tool_calls_raw
                    .map(|raw| serde_json::from_str(&raw))
                    .transpose()
                    .context("malformed tool_calls in run store")?;
                Ok(ChatMessage {
                    role,
                    content,
                    name,
                    tool_calls,
                    tool_call_id,
                })
            })
            .collect()
    }

    pub fn get_scratch(&self, run_id: &str, stage: &str) -> Result<Option<String>> {
        let content = self
            .conn
            .query_row(
                "SELECT content FROM run_scratch WHERE run_id = ?1 AND stage = ?2",
                params![run_id, stage],
                |row| row.get(0),
            )
            .optional()?;
        Ok(content)
    }
}

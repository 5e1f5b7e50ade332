//! SQLite-backed persistence for the task mirror and schedule entries.
//! Entries are the audit trail - they are created, updated, never deleted.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use tokio::sync::Mutex;

use autolt_core::error::{AutoLtError, Result};
use autolt_core::types::{EntryStatus, PipelineKind, ScheduleEntry, TrackedTask};

/// Handle shared between the allocator and the spawned pipeline workers.
/// The mutex serializes writes; distinct entries never contend for long
/// because every store operation is a single short statement.
pub type SharedDb = Arc<Mutex<SchedulerDb>>;

/// Per-status entry counts for the status command.
#[derive(Debug, Default, serde::Serialize)]
pub struct StatusCounts {
    pub open_tasks: i64,
    pub ready: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
}

/// Which phase-boundary column a stamp lands in.
#[derive(Debug, Clone, Copy)]
pub enum PhaseStamp {
    BeforeStart,
    BeforeEnd,
    DeployStart,
    DeployEnd,
    AfterStart,
    AfterEnd,
}

impl PhaseStamp {
    fn column(&self) -> &'static str {
        match self {
            PhaseStamp::BeforeStart => "before_start",
            PhaseStamp::BeforeEnd => "before_end",
            PhaseStamp::DeployStart => "deploy_start",
            PhaseStamp::DeployEnd => "deploy_end",
            PhaseStamp::AfterStart => "after_start",
            PhaseStamp::AfterEnd => "after_end",
        }
    }
}

/// SQLite store for tracked tasks and schedule entries.
pub struct SchedulerDb {
    conn: rusqlite::Connection,
}

impl SchedulerDb {
    /// Open or create the database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = rusqlite::Connection::open(path)
            .map_err(|e| AutoLtError::Store(format!("DB open: {e}")))?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Wrap in the shared handle the engine components expect.
    pub fn into_shared(self) -> SharedDb {
        Arc::new(Mutex::new(self))
    }

    fn migrate(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
            -- Local mirror of tracker issues
            CREATE TABLE IF NOT EXISTS tracked_tasks (
                key TEXT PRIMARY KEY,
                summary TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'Open',
                pipeline TEXT NOT NULL,
                planned_start TEXT,
                last_synced TEXT NOT NULL
            );

            -- One row per assigned execution window (audit trail, never deleted)
            CREATE TABLE IF NOT EXISTS schedule_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_key TEXT NOT NULL,
                pipeline TEXT NOT NULL,
                planned_start TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'ready',
                before_start TEXT,
                before_end TEXT,
                deploy_start TEXT,
                deploy_end TEXT,
                after_start TEXT,
                after_end TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_entries_status_start
                ON schedule_entries(status, planned_start);
            CREATE INDEX IF NOT EXISTS idx_entries_task
                ON schedule_entries(task_key);
         ",
            )
            .map_err(|e| AutoLtError::Store(format!("Migration: {e}")))?;
        Ok(())
    }

    // ─── Tracked tasks ──────────────────────────────────────

    /// Insert or refresh one mirror row from a tracker search result.
    pub fn upsert_task(&self, task: &TrackedTask) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO tracked_tasks (key, summary, status, pipeline, planned_start, last_synced)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(key) DO UPDATE SET
                    summary = excluded.summary,
                    status = excluded.status,
                    pipeline = excluded.pipeline,
                    planned_start = COALESCE(excluded.planned_start, planned_start),
                    last_synced = excluded.last_synced",
                rusqlite::params![
                    task.key,
                    task.summary,
                    task.status,
                    task.pipeline.as_str(),
                    task.planned_start.map(fmt_ts),
                    fmt_ts(task.last_synced),
                ],
            )
            .map_err(|e| AutoLtError::Store(format!("Upsert task {}: {e}", task.key)))?;
        Ok(())
    }

    /// Pending tasks in the caller-visible priority order: earliest
    /// requested start first, undated tasks last.
    pub fn pending_tasks(&self) -> Result<Vec<TrackedTask>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT key, summary, status, pipeline, planned_start, last_synced
                 FROM tracked_tasks WHERE status = 'Open'
                 ORDER BY planned_start IS NULL, planned_start ASC, key ASC",
            )
            .map_err(|e| AutoLtError::Store(format!("Pending tasks: {e}")))?;
        let rows = stmt
            .query_map([], row_to_task)
            .map_err(|e| AutoLtError::Store(format!("Pending tasks: {e}")))?;
        collect_rows(rows)
    }

    // ─── Schedule entries ──────────────────────────────────────

    /// Unit of work for one allocation: create the Ready entry and move the
    /// mirror row out of the pending pool together. The tracker has already
    /// been updated by the time this runs; a store failure here therefore
    /// leaves no partial entry behind.
    pub fn record_allocation(
        &mut self,
        task_key: &str,
        pipeline: PipelineKind,
        planned_start: DateTime<Utc>,
    ) -> Result<i64> {
        let tx = self
            .conn
            .transaction()
            .map_err(|e| AutoLtError::Store(format!("Allocation tx: {e}")))?;
        tx.execute(
            "INSERT INTO schedule_entries (task_key, pipeline, planned_start, status)
             VALUES (?1, ?2, ?3, 'ready')",
            rusqlite::params![task_key, pipeline.as_str(), fmt_ts(planned_start)],
        )
        .map_err(|e| AutoLtError::Store(format!("Insert entry for {task_key}: {e}")))?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "UPDATE tracked_tasks SET status = 'In Progress', planned_start = ?1 WHERE key = ?2",
            rusqlite::params![fmt_ts(planned_start), task_key],
        )
        .map_err(|e| AutoLtError::Store(format!("Mark {task_key} scheduled: {e}")))?;
        tx.commit()
            .map_err(|e| AutoLtError::Store(format!("Allocation commit: {e}")))?;
        Ok(id)
    }

    /// Entries in status set {ready, running} whose `[start, start+window)`
    /// interval intersects `[cand_start, cand_end)`.
    pub fn entries_overlapping(
        &self,
        cand_start: DateTime<Utc>,
        cand_end: DateTime<Utc>,
        window: chrono::Duration,
    ) -> Result<Vec<ScheduleEntry>> {
        let active = self.entries_in_status(&[EntryStatus::Ready, EntryStatus::Running])?;
        Ok(active
            .into_iter()
            .filter(|e| {
                let end = e.planned_start + window;
                e.planned_start < cand_end && end > cand_start
            })
            .collect())
    }

    /// Ready entries whose planned start falls in `[bucket_start, bucket_end)`.
    pub fn due_entries(
        &self,
        bucket_start: DateTime<Utc>,
        bucket_end: DateTime<Utc>,
    ) -> Result<Vec<ScheduleEntry>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, task_key, pipeline, planned_start, status,
                        before_start, before_end, deploy_start, deploy_end, after_start, after_end
                 FROM schedule_entries
                 WHERE status = 'ready' AND planned_start >= ?1 AND planned_start < ?2
                 ORDER BY planned_start, id",
            )
            .map_err(|e| AutoLtError::Store(format!("Due entries: {e}")))?;
        let rows = stmt
            .query_map(
                rusqlite::params![fmt_ts(bucket_start), fmt_ts(bucket_end)],
                row_to_entry,
            )
            .map_err(|e| AutoLtError::Store(format!("Due entries: {e}")))?;
        collect_rows(rows)
    }

    /// All entries currently in one of the given states.
    pub fn entries_in_status(&self, statuses: &[EntryStatus]) -> Result<Vec<ScheduleEntry>> {
        let labels: Vec<String> = statuses.iter().map(|s| format!("'{}'", s.as_str())).collect();
        let sql = format!(
            "SELECT id, task_key, pipeline, planned_start, status,
                    before_start, before_end, deploy_start, deploy_end, after_start, after_end
             FROM schedule_entries WHERE status IN ({}) ORDER BY planned_start, id",
            labels.join(",")
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| AutoLtError::Store(format!("Entries by status: {e}")))?;
        let rows = stmt
            .query_map([], row_to_entry)
            .map_err(|e| AutoLtError::Store(format!("Entries by status: {e}")))?;
        collect_rows(rows)
    }

    /// Load a single entry.
    pub fn entry(&self, id: i64) -> Result<ScheduleEntry> {
        self.conn
            .query_row(
                "SELECT id, task_key, pipeline, planned_start, status,
                        before_start, before_end, deploy_start, deploy_end, after_start, after_end
                 FROM schedule_entries WHERE id = ?1",
                [id],
                row_to_entry,
            )
            .map_err(|e| AutoLtError::Store(format!("Entry {id}: {e}")))
    }

    /// Advance an entry through the state machine. The transition table is
    /// the single gate: an illegal move is an error, and terminal entries
    /// never change again.
    pub fn transition_entry(&self, id: i64, next: EntryStatus) -> Result<()> {
        let current = self.entry(id)?.status;
        if !current.can_transition_to(next) {
            return Err(AutoLtError::InvalidTransition {
                from: current.to_string(),
                to: next.to_string(),
            });
        }
        self.conn
            .execute(
                "UPDATE schedule_entries SET status = ?1 WHERE id = ?2",
                rusqlite::params![next.as_str(), id],
            )
            .map_err(|e| AutoLtError::Store(format!("Transition entry {id}: {e}")))?;
        tracing::debug!("🔀 Entry {} {} → {}", id, current, next);
        Ok(())
    }

    /// Record a phase-boundary timestamp.
    pub fn stamp_phase(&self, id: i64, stamp: PhaseStamp, at: DateTime<Utc>) -> Result<()> {
        let sql = format!(
            "UPDATE schedule_entries SET {} = ?1 WHERE id = ?2",
            stamp.column()
        );
        self.conn
            .execute(&sql, rusqlite::params![at.to_rfc3339(), id])
            .map_err(|e| AutoLtError::Store(format!("Stamp entry {id}: {e}")))?;
        Ok(())
    }

    /// Counts for the status summary.
    pub fn status_counts(&self) -> Result<StatusCounts> {
        let count = |sql: &str| -> Result<i64> {
            self.conn
                .query_row(sql, [], |row| row.get(0))
                .map_err(|e| AutoLtError::Store(format!("Count: {e}")))
        };
        Ok(StatusCounts {
            open_tasks: count("SELECT COUNT(*) FROM tracked_tasks WHERE status = 'Open'")?,
            ready: count("SELECT COUNT(*) FROM schedule_entries WHERE status = 'ready'")?,
            running: count(
                "SELECT COUNT(*) FROM schedule_entries WHERE status NOT IN ('ready','completed','FAIL')",
            )?,
            completed: count("SELECT COUNT(*) FROM schedule_entries WHERE status = 'completed'")?,
            failed: count("SELECT COUNT(*) FROM schedule_entries WHERE status = 'FAIL'")?,
        })
    }
}

/// Whole-second RFC3339 - keeps lexicographic TEXT comparison aligned with
/// chronological order for the range queries above.
fn fmt_ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<TrackedTask> {
    let pipeline_str: String = row.get(3)?;
    let planned_start: Option<String> = row.get(4)?;
    let last_synced: String = row.get(5)?;
    Ok(TrackedTask {
        key: row.get(0)?,
        summary: row.get(1)?,
        status: row.get(2)?,
        pipeline: PipelineKind::from_str(&pipeline_str).map_err(|_| {
            rusqlite::Error::InvalidColumnType(3, pipeline_str, rusqlite::types::Type::Text)
        })?,
        planned_start: planned_start.as_deref().and_then(parse_ts),
        last_synced: parse_ts(&last_synced).unwrap_or_else(Utc::now),
    })
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduleEntry> {
    let pipeline_str: String = row.get(2)?;
    let planned_start: String = row.get(3)?;
    let status_str: String = row.get(4)?;
    let opt_ts = |idx: usize| -> rusqlite::Result<Option<DateTime<Utc>>> {
        let raw: Option<String> = row.get(idx)?;
        Ok(raw.as_deref().and_then(parse_ts))
    };
    Ok(ScheduleEntry {
        id: row.get(0)?,
        task_key: row.get(1)?,
        pipeline: PipelineKind::from_str(&pipeline_str).map_err(|_| {
            rusqlite::Error::InvalidColumnType(2, pipeline_str, rusqlite::types::Type::Text)
        })?,
        planned_start: parse_ts(&planned_start).unwrap_or_else(Utc::now),
        status: EntryStatus::from_str(&status_str).map_err(|_| {
            rusqlite::Error::InvalidColumnType(4, status_str, rusqlite::types::Type::Text)
        })?,
        before_start: opt_ts(5)?,
        before_end: opt_ts(6)?,
        deploy_start: opt_ts(7)?,
        deploy_end: opt_ts(8)?,
        after_start: opt_ts(9)?,
        after_end: opt_ts(10)?,
    })
}

/// Rows that no longer decode (e.g. a hand-edited status label) are skipped
/// with a warning rather than failing the whole selection.
fn collect_rows<T>(rows: impl Iterator<Item = rusqlite::Result<T>>) -> Result<Vec<T>> {
    Ok(rows
        .filter_map(|r| match r {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!("⚠️ Skipping undecodable row: {e}");
                None
            }
        })
        .collect())
}

//! SQLite-backed job store.
//!
//! The store owns every job record; transitions are enforced by guarded
//! UPDATE statements so illegal moves never reach disk. All operations are
//! async-compatible through blocking task spawning, and connections use WAL
//! with a busy timeout for server workloads.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use refinery::embed_migrations;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use serde_json::Value;
use tokio::task;

use crate::errors::{ErrorKind, ForgeError};
use crate::jobs::{JobRecord, JobStatus};

// Embedded migrations from `migrations/sqlite/`.
embed_migrations!("migrations/sqlite");

/// SQLite handle for job persistence.
#[derive(Clone, Debug)]
pub struct JobStore {
    db_path: PathBuf,
}

fn db_error(context: &str, e: impl std::fmt::Display) -> ForgeError {
    ForgeError::internal(format!("job store: {}: {}", context, e))
}

fn now_text(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

fn parse_ts(text: &str) -> Result<DateTime<Utc>, ForgeError> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| db_error("timestamp parse", e))
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRecord> {
    Ok(RawRecord {
        job_id: row.get(0)?,
        pipeline_id: row.get(1)?,
        tool_name: row.get(2)?,
        input_ref: row.get(3)?,
        status: row.get(4)?,
        progress: row.get(5)?,
        current_frame: row.get(6)?,
        total_frames: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
        completed_at: row.get(10)?,
        result_json: row.get(11)?,
        error: row.get(12)?,
    })
}

const SELECT_COLUMNS: &str = "job_id, pipeline_id, tool_name, input_ref, status, progress, \
     current_frame, total_frames, created_at, updated_at, completed_at, result_json, error";

/// Row image before type conversion.
struct RawRecord {
    job_id: String,
    pipeline_id: String,
    tool_name: Option<String>,
    input_ref: String,
    status: String,
    progress: i64,
    current_frame: i64,
    total_frames: i64,
    created_at: String,
    updated_at: String,
    completed_at: Option<String>,
    result_json: Option<String>,
    error: Option<String>,
}

impl RawRecord {
    fn into_record(self) -> Result<JobRecord, ForgeError> {
        let status = JobStatus::parse(&self.status)
            .ok_or_else(|| db_error("status decode", format!("unknown status '{}'", self.status)))?;
        let result = match self.result_json {
            Some(text) => {
                Some(serde_json::from_str::<Value>(&text).map_err(|e| db_error("result decode", e))?)
            }
            None => None,
        };
        Ok(JobRecord {
            job_id: self.job_id,
            pipeline_id: self.pipeline_id,
            tool_name: self.tool_name,
            input_ref: self.input_ref,
            status,
            progress: self.progress.clamp(0, 100) as u8,
            current_frame: self.current_frame.max(0) as u64,
            total_frames: self.total_frames.max(0) as u64,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
            completed_at: self.completed_at.as_deref().map(parse_ts).transpose()?,
            result,
            error: self.error,
        })
    }
}

impl JobStore {
    /// Create a store at the given database path, applying migrations.
    pub fn with_path<P: AsRef<Path>>(path: P) -> Result<Self, ForgeError> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| db_error("create data dir", e))?;
            }
        }
        let store = Self { db_path };
        let mut conn = store.open()?;
        migrations::runner()
            .run(&mut conn)
            .map_err(|e| db_error("apply migrations", e))?;
        tracing::debug!("Job store ready at {}", store.db_path.display());
        Ok(store)
    }

    /// Open a connection with server-workload defaults.
    fn open(&self) -> Result<Connection, ForgeError> {
        let conn = Connection::open(&self.db_path).map_err(|e| db_error("open database", e))?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.pragma_update(None, "busy_timeout", 5000i64).ok(); // 5s
        Ok(conn)
    }

    async fn with_conn<T, F>(&self, context: &'static str, f: F) -> Result<T, ForgeError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, ForgeError> + Send + 'static,
    {
        let store = self.clone();
        task::spawn_blocking(move || {
            let mut conn = store.open()?;
            f(&mut conn)
        })
        .await
        .map_err(|e| db_error(context, e))?
    }

    /// Insert a freshly submitted job in `queued` state.
    pub async fn insert(&self, record: JobRecord) -> Result<(), ForgeError> {
        self.with_conn("insert", move |conn| {
            conn.execute(
                "INSERT INTO jobs (job_id, pipeline_id, tool_name, input_ref, status, progress, \
                 current_frame, total_frames, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    record.job_id,
                    record.pipeline_id,
                    record.tool_name,
                    record.input_ref,
                    record.status.as_str(),
                    record.progress as i64,
                    record.current_frame as i64,
                    record.total_frames as i64,
                    now_text(record.created_at),
                    now_text(record.updated_at),
                ],
            )
            .map_err(|e| db_error("insert", e))?;
            Ok(())
        })
        .await
    }

    /// Snapshot of one job.
    pub async fn get(&self, job_id: &str) -> Result<Option<JobRecord>, ForgeError> {
        let job_id = job_id.to_string();
        self.with_conn("get", move |conn| {
            let raw = conn
                .query_row(
                    &format!("SELECT {} FROM jobs WHERE job_id = ?1", SELECT_COLUMNS),
                    params![job_id],
                    row_to_record,
                )
                .optional()
                .map_err(|e| db_error("get", e))?;
            raw.map(RawRecord::into_record).transpose()
        })
        .await
    }

    /// Jobs ordered by `created_at` descending, optionally filtered by
    /// status.
    pub async fn list(
        &self,
        status: Option<JobStatus>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<JobRecord>, ForgeError> {
        self.with_conn("list", move |conn| {
            let sql = match status {
                Some(_) => format!(
                    "SELECT {} FROM jobs WHERE status = ?1 \
                     ORDER BY created_at DESC, job_id DESC LIMIT ?2 OFFSET ?3",
                    SELECT_COLUMNS
                ),
                None => format!(
                    "SELECT {} FROM jobs \
                     ORDER BY created_at DESC, job_id DESC LIMIT ?1 OFFSET ?2",
                    SELECT_COLUMNS
                ),
            };
            let mut stmt = conn.prepare(&sql).map_err(|e| db_error("list", e))?;
            let rows = match status {
                Some(s) => stmt
                    .query_map(params![s.as_str(), limit, offset], row_to_record)
                    .map_err(|e| db_error("list", e))?
                    .collect::<rusqlite::Result<Vec<_>>>(),
                None => stmt
                    .query_map(params![limit, offset], row_to_record)
                    .map_err(|e| db_error("list", e))?
                    .collect::<rusqlite::Result<Vec<_>>>(),
            }
            .map_err(|e| db_error("list", e))?;
            rows.into_iter().map(RawRecord::into_record).collect()
        })
        .await
    }

    /// Atomically claim the oldest queued job, transitioning it to
    /// `running`. The IMMEDIATE transaction keeps concurrent claimers from
    /// double-owning a job.
    pub async fn claim_next_queued(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Option<JobRecord>, ForgeError> {
        self.with_conn("claim", move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(|e| db_error("claim txn", e))?;
            let candidate: Option<String> = tx
                .query_row(
                    "SELECT job_id FROM jobs WHERE status = 'queued' \
                     ORDER BY created_at ASC, job_id ASC LIMIT 1",
                    [],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| db_error("claim select", e))?;
            let Some(job_id) = candidate else {
                return Ok(None);
            };
            tx.execute(
                "UPDATE jobs SET status = 'running', updated_at = ?2 WHERE job_id = ?1",
                params![job_id, now_text(now)],
            )
            .map_err(|e| db_error("claim update", e))?;
            let raw = tx
                .query_row(
                    &format!("SELECT {} FROM jobs WHERE job_id = ?1", SELECT_COLUMNS),
                    params![job_id],
                    row_to_record,
                )
                .map_err(|e| db_error("claim readback", e))?;
            tx.commit().map_err(|e| db_error("claim commit", e))?;
            raw.into_record().map(Some)
        })
        .await
    }

    /// Persist progress for a running job. Monotonic guards keep
    /// `progress`/`current_frame` from regressing; returns whether a row was
    /// updated.
    pub async fn update_progress(
        &self,
        job_id: &str,
        current_frame: u64,
        total_frames: u64,
        percent: u8,
        now: DateTime<Utc>,
    ) -> Result<bool, ForgeError> {
        let job_id = job_id.to_string();
        self.with_conn("progress", move |conn| {
            let n = conn
                .execute(
                    "UPDATE jobs SET current_frame = ?2, total_frames = ?3, progress = ?4, \
                     updated_at = ?5 \
                     WHERE job_id = ?1 AND status = 'running' \
                     AND current_frame <= ?2 AND progress <= ?4",
                    params![
                        job_id,
                        current_frame as i64,
                        total_frames as i64,
                        percent as i64,
                        now_text(now)
                    ],
                )
                .map_err(|e| db_error("progress", e))?;
            Ok(n > 0)
        })
        .await
    }

    fn transition_error(
        conn: &Connection,
        job_id: &str,
        target: JobStatus,
    ) -> ForgeError {
        let current: Option<String> = conn
            .query_row(
                "SELECT status FROM jobs WHERE job_id = ?1",
                params![job_id],
                |row| row.get(0),
            )
            .optional()
            .unwrap_or(None);
        match current {
            None => ForgeError::job_not_found(job_id),
            Some(status) => ForgeError::new(
                ErrorKind::JobTerminal,
                format!(
                    "job '{}' cannot move from '{}' to '{}'",
                    job_id, status, target
                ),
            ),
        }
    }

    /// `running → completed`, storing sanitized results.
    pub async fn complete(
        &self,
        job_id: &str,
        result: Value,
        now: DateTime<Utc>,
    ) -> Result<(), ForgeError> {
        let job_id = job_id.to_string();
        let result_text =
            serde_json::to_string(&result).map_err(|e| db_error("result encode", e))?;
        self.with_conn("complete", move |conn| {
            let ts = now_text(now);
            let n = conn
                .execute(
                    "UPDATE jobs SET status = 'completed', progress = 100, result_json = ?2, \
                     completed_at = ?3, updated_at = ?3 \
                     WHERE job_id = ?1 AND status = 'running'",
                    params![job_id, result_text, ts],
                )
                .map_err(|e| db_error("complete", e))?;
            if n == 0 {
                return Err(Self::transition_error(conn, &job_id, JobStatus::Completed));
            }
            Ok(())
        })
        .await
    }

    /// `running → failed`, recording the error message.
    pub async fn fail(
        &self,
        job_id: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ForgeError> {
        let job_id = job_id.to_string();
        let error = error.to_string();
        self.with_conn("fail", move |conn| {
            let ts = now_text(now);
            let n = conn
                .execute(
                    "UPDATE jobs SET status = 'failed', error = ?2, completed_at = ?3, \
                     updated_at = ?3 \
                     WHERE job_id = ?1 AND status = 'running'",
                    params![job_id, error, ts],
                )
                .map_err(|e| db_error("fail", e))?;
            if n == 0 {
                return Err(Self::transition_error(conn, &job_id, JobStatus::Failed));
            }
            Ok(())
        })
        .await
    }

    /// `queued|running → cancelled`.
    pub async fn cancel(&self, job_id: &str, now: DateTime<Utc>) -> Result<(), ForgeError> {
        let job_id = job_id.to_string();
        self.with_conn("cancel", move |conn| {
            let ts = now_text(now);
            let n = conn
                .execute(
                    "UPDATE jobs SET status = 'cancelled', completed_at = ?2, updated_at = ?2 \
                     WHERE job_id = ?1 AND status IN ('queued', 'running')",
                    params![job_id, ts],
                )
                .map_err(|e| db_error("cancel", e))?;
            if n == 0 {
                return Err(Self::transition_error(conn, &job_id, JobStatus::Cancelled));
            }
            Ok(())
        })
        .await
    }

    /// Crash recovery: any job left in `running` by a previous process is
    /// marked failed. Returns the number of recovered jobs.
    pub async fn recover_interrupted(&self, now: DateTime<Utc>) -> Result<usize, ForgeError> {
        self.with_conn("recover", move |conn| {
            let ts = now_text(now);
            let n = conn
                .execute(
                    "UPDATE jobs SET status = 'failed', error = 'worker_interrupted', \
                     completed_at = ?1, updated_at = ?1 WHERE status = 'running'",
                    params![ts],
                )
                .map_err(|e| db_error("recover", e))?;
            Ok(n)
        })
        .await
    }

    /// Evict the oldest terminal jobs until the table fits `capacity`.
    /// Non-terminal jobs are never evicted. Returns the number deleted.
    pub async fn cleanup(&self, capacity: usize) -> Result<usize, ForgeError> {
        self.with_conn("cleanup", move |conn| {
            let total: i64 = conn
                .query_row("SELECT COUNT(*) FROM jobs", [], |row| row.get(0))
                .map_err(|e| db_error("cleanup count", e))?;
            let excess = (total as usize).saturating_sub(capacity);
            if excess == 0 {
                return Ok(0);
            }
            let n = conn
                .execute(
                    "DELETE FROM jobs WHERE job_id IN ( \
                     SELECT job_id FROM jobs \
                     WHERE status IN ('completed', 'failed', 'cancelled') \
                     ORDER BY created_at ASC, job_id ASC LIMIT ?1)",
                    params![excess as i64],
                )
                .map_err(|e| db_error("cleanup delete", e))?;
            Ok(n)
        })
        .await
    }
}

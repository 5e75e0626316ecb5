//! SQLite-backed durable job store.
//!
//! One table, one connection behind a mutex. The claim is a SELECT + UPDATE
//! inside a single transaction, so the single-owner lease holds even with
//! several worker threads sharing the store.

use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{info, warn};

use super::job::{Job, JobId, JobKind, JobPayload, JobState};
use super::store::{purge_cutoff, JobCounts, JobStore, QueueError};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS jobs (
    id         TEXT PRIMARY KEY,
    kind       TEXT NOT NULL,
    payload    TEXT NOT NULL,
    state      TEXT NOT NULL,
    attempts   INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_jobs_claim ON jobs (kind, state, created_at);
";

/// Durable job store on a local SQLite database.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    /// Open (or create) the queue database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, QueueError> {
        let conn = Connection::open(&path).map_err(db_unavailable)?;
        conn.execute_batch(SCHEMA).map_err(db_unavailable)?;
        info!(path = %path.as_ref().display(), "opened job queue database");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Ephemeral store for tests.
    pub fn open_in_memory() -> Result<Self, QueueError> {
        let conn = Connection::open_in_memory().map_err(db_unavailable)?;
        conn.execute_batch(SCHEMA).map_err(db_unavailable)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn db_unavailable(e: rusqlite::Error) -> QueueError {
    QueueError::Unavailable(e.to_string())
}

fn job_from_row(row: &Row<'_>) -> Result<Job, QueueError> {
    let id: String = row.get(0).map_err(db_unavailable)?;
    let payload: String = row.get(1).map_err(db_unavailable)?;
    let state: String = row.get(2).map_err(db_unavailable)?;
    let attempts: u32 = row.get(3).map_err(db_unavailable)?;
    let last_error: Option<String> = row.get(4).map_err(db_unavailable)?;
    let created_at: i64 = row.get(5).map_err(db_unavailable)?;
    let updated_at: i64 = row.get(6).map_err(db_unavailable)?;

    Ok(Job {
        id: JobId::from_uuid(
            uuid::Uuid::parse_str(&id).map_err(|e| QueueError::Corrupt(e.to_string()))?,
        ),
        payload: serde_json::from_str::<JobPayload>(&payload)
            .map_err(|e| QueueError::Corrupt(e.to_string()))?,
        state: JobState::from_str(&state).map_err(|e| QueueError::Corrupt(e.to_string()))?,
        attempts,
        last_error,
        created_at: millis_to_utc(created_at)?,
        updated_at: millis_to_utc(updated_at)?,
    })
}

fn millis_to_utc(millis: i64) -> Result<DateTime<Utc>, QueueError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| QueueError::Corrupt(format!("timestamp out of range: {millis}")))
}

const JOB_COLUMNS: &str = "id, payload, state, attempts, last_error, created_at, updated_at";

impl SqliteJobStore {
    /// Guarded transition used by complete/fail/requeue: the UPDATE only
    /// matches the expected current state, so stale callers get
    /// `InvalidTransition` instead of silently rewriting history.
    fn guarded_update(
        &self,
        job_id: JobId,
        expected: JobState,
        sql: &str,
        error: Option<&str>,
    ) -> Result<(), QueueError> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().timestamp_millis();
        let changed = conn
            .execute(sql, params![job_id.to_string(), error, now, expected.as_str()])
            .map_err(db_unavailable)?;
        if changed == 1 {
            return Ok(());
        }

        // Nothing matched: distinguish "gone" from "wrong state".
        let state: Option<String> = conn
            .query_row(
                "SELECT state FROM jobs WHERE id = ?1",
                params![job_id.to_string()],
                |r| r.get(0),
            )
            .optional()
            .map_err(db_unavailable)?;
        match state {
            None => Err(QueueError::NotFound(job_id)),
            Some(s) => Err(QueueError::InvalidTransition {
                job: job_id,
                from: JobState::from_str(&s).map_err(|e| QueueError::Corrupt(e.to_string()))?,
            }),
        }
    }
}

impl JobStore for SqliteJobStore {
    fn enqueue(&self, job: Job) -> Result<JobId, QueueError> {
        let payload = serde_json::to_string(&job.payload)
            .map_err(|e| QueueError::Corrupt(e.to_string()))?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO jobs (id, kind, payload, state, attempts, last_error, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                job.id.to_string(),
                job.kind().as_str(),
                payload,
                job.state.as_str(),
                job.attempts,
                job.last_error,
                job.created_at.timestamp_millis(),
                job.updated_at.timestamp_millis(),
            ],
        )
        .map_err(db_unavailable)?;
        Ok(job.id)
    }

    fn get(&self, job_id: JobId) -> Result<Option<Job>, QueueError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
            params![job_id.to_string()],
            |row| Ok(job_from_row(row)),
        )
        .optional()
        .map_err(db_unavailable)?
        .transpose()
    }

    fn claim_next(&self, kind: JobKind) -> Result<Option<Job>, QueueError> {
        let mut conn = self.conn.lock().unwrap();
        loop {
            let tx = conn.transaction().map_err(db_unavailable)?;

            let row = tx
                .query_row(
                    &format!(
                        "SELECT {JOB_COLUMNS} FROM jobs
                         WHERE kind = ?1 AND state = 'waiting'
                         ORDER BY created_at ASC, id ASC
                         LIMIT 1"
                    ),
                    params![kind.as_str()],
                    |row| Ok((row.get::<_, String>(0)?, job_from_row(row))),
                )
                .optional()
                .map_err(db_unavailable)?;

            let Some((raw_id, decoded)) = row else {
                return Ok(None);
            };

            let mut job = match decoded {
                Ok(job) => job,
                Err(e) => {
                    // A row that no longer decodes must not wedge the kind's
                    // FIFO; quarantine it as failed and move on to the next.
                    warn!(job_id = %raw_id, error = %e, "dropping undecodable waiting job");
                    tx.execute(
                        "UPDATE jobs SET state = 'failed', last_error = ?2, updated_at = ?3
                         WHERE id = ?1",
                        params![raw_id, e.to_string(), Utc::now().timestamp_millis()],
                    )
                    .map_err(db_unavailable)?;
                    tx.commit().map_err(db_unavailable)?;
                    continue;
                }
            };

            job.mark_active();
            tx.execute(
                "UPDATE jobs SET state = 'active', updated_at = ?2 WHERE id = ?1",
                params![job.id.to_string(), job.updated_at.timestamp_millis()],
            )
            .map_err(db_unavailable)?;
            tx.commit().map_err(db_unavailable)?;
            return Ok(Some(job));
        }
    }

    fn complete(&self, job_id: JobId) -> Result<(), QueueError> {
        self.guarded_update(
            job_id,
            JobState::Active,
            "UPDATE jobs SET state = 'completed', updated_at = ?3 WHERE id = ?1 AND state = ?4",
            None,
        )
    }

    fn fail(&self, job_id: JobId, error: &str) -> Result<(), QueueError> {
        self.guarded_update(
            job_id,
            JobState::Active,
            "UPDATE jobs SET state = 'failed', attempts = attempts + 1, last_error = ?2, updated_at = ?3
             WHERE id = ?1 AND state = ?4",
            Some(error),
        )
    }

    fn requeue(&self, job_id: JobId) -> Result<Job, QueueError> {
        self.guarded_update(
            job_id,
            JobState::Failed,
            "UPDATE jobs SET state = 'waiting', last_error = NULL, updated_at = ?3
             WHERE id = ?1 AND state = ?4",
            None,
        )?;
        self.get(job_id)?.ok_or(QueueError::NotFound(job_id))
    }

    fn counts(&self, kind: JobKind) -> Result<JobCounts, QueueError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT state, COUNT(*) FROM jobs WHERE kind = ?1 GROUP BY state")
            .map_err(db_unavailable)?;
        let rows = stmt
            .query_map(params![kind.as_str()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, usize>(1)?))
            })
            .map_err(db_unavailable)?;

        let mut counts = JobCounts::default();
        for row in rows {
            let (state, n) = row.map_err(db_unavailable)?;
            match JobState::from_str(&state).map_err(|e| QueueError::Corrupt(e.to_string()))? {
                JobState::Waiting => counts.waiting = n,
                JobState::Active => counts.active = n,
                JobState::Completed => counts.completed = n,
                JobState::Failed => counts.failed = n,
            }
        }
        Ok(counts)
    }

    fn purge_terminal(&self, older_than: Duration) -> Result<usize, QueueError> {
        let Some(cutoff) = purge_cutoff(older_than) else {
            return Ok(0);
        };
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM jobs WHERE state IN ('completed', 'failed') AND updated_at < ?1",
            params![cutoff.timestamp_millis()],
        )
        .map_err(db_unavailable)
    }
}

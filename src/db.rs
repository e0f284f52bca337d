use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::SecondsFormat;
use rusqlite::{params, Connection};

use crate::error::GenerationError;
use crate::store::JobStore;
use crate::types::GenerationJob;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS generation_jobs (
    id              TEXT PRIMARY KEY,
    status          TEXT CHECK(status IN ('pending', 'processing', 'completed', 'partially_failed', 'failed')),
    data_json       TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_generation_jobs_created ON generation_jobs(created_at);
CREATE INDEX IF NOT EXISTS idx_generation_jobs_status ON generation_jobs(status);
"#;

/// Open (or create) the job database. Pass `None` for an in-memory database.
pub fn open_database(path: Option<&Path>) -> Result<Connection> {
    let conn = match path {
        Some(p) => Connection::open(p).context("Failed to open job database")?,
        None => Connection::open_in_memory().context("Failed to open in-memory database")?,
    };

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA busy_timeout = 5000;",
    )
    .context("Failed to set PRAGMA options")?;

    conn.execute_batch(SCHEMA)
        .context("Failed to create job schema")?;

    Ok(conn)
}

fn timestamp(ts: &chrono::DateTime<chrono::Utc>) -> String {
    // fixed width so the column sorts lexically
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Insert or replace a job record.
pub fn upsert_job(conn: &Connection, job: &GenerationJob) -> Result<()> {
    let data = serde_json::to_string(job).context("Failed to serialize job")?;
    conn.execute(
        "INSERT INTO generation_jobs (id, status, data_json, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(id) DO UPDATE SET
            status = excluded.status,
            data_json = excluded.data_json,
            updated_at = excluded.updated_at",
        params![
            job.id,
            job.status.as_str(),
            data,
            timestamp(&job.created_at),
            timestamp(&job.updated_at)
        ],
    )
    .context("Failed to upsert job")?;
    Ok(())
}

fn parse_job(data_json: &str) -> Result<GenerationJob> {
    serde_json::from_str(data_json).context("Failed to parse job data JSON")
}

/// Load a job by id.
pub fn get_job(conn: &Connection, job_id: &str) -> Result<Option<GenerationJob>> {
    let mut stmt = conn
        .prepare("SELECT data_json FROM generation_jobs WHERE id = ?1")
        .context("Failed to prepare get_job query")?;
    let mut rows = stmt.query(params![job_id]).context("Failed to query job")?;

    match rows.next().context("Failed to read job row")? {
        Some(row) => {
            let data_json: String = row.get(0)?;
            Ok(Some(parse_job(&data_json)?))
        }
        None => Ok(None),
    }
}

/// Find the job whose image list contains `image_id`.
///
/// Narrows candidates with a substring match on the stored JSON, then
/// confirms against the parsed image list.
pub fn find_job_by_image_id(conn: &Connection, image_id: &str) -> Result<Option<GenerationJob>> {
    let mut stmt = conn
        .prepare("SELECT data_json FROM generation_jobs WHERE instr(data_json, ?1) > 0")
        .context("Failed to prepare find_job_by_image_id query")?;
    let rows = stmt
        .query_map(params![image_id], |row| row.get::<_, String>(0))
        .context("Failed to execute find_job_by_image_id query")?;

    for row in rows {
        let job = parse_job(&row.context("Failed to read job row")?)?;
        if job.image(image_id).is_some() {
            return Ok(Some(job));
        }
    }
    Ok(None)
}

/// Up to `limit` jobs, newest first.
pub fn list_recent_jobs(conn: &Connection, limit: usize) -> Result<Vec<GenerationJob>> {
    let mut stmt = conn
        .prepare("SELECT data_json FROM generation_jobs ORDER BY created_at DESC LIMIT ?1")
        .context("Failed to prepare list_recent_jobs query")?;
    let rows = stmt
        .query_map(params![limit as i64], |row| row.get::<_, String>(0))
        .context("Failed to execute list_recent_jobs query")?;

    let mut jobs = Vec::new();
    for row in rows {
        jobs.push(parse_job(&row.context("Failed to read job row")?)?);
    }
    Ok(jobs)
}

/// Ids of pending or processing jobs, oldest first. Processing jobs here
/// were interrupted by a previous crash.
pub fn list_unfinished_job_ids(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare(
            "SELECT id FROM generation_jobs
             WHERE status IN ('pending', 'processing')
             ORDER BY created_at ASC",
        )
        .context("Failed to prepare list_unfinished query")?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .context("Failed to execute list_unfinished query")?;

    let mut ids = Vec::new();
    for row in rows {
        ids.push(row.context("Failed to read job id")?);
    }
    Ok(ids)
}

/// SQLite-backed [`JobStore`].
#[derive(Clone)]
pub struct SqliteJobStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteJobStore {
    /// Open (or create) the store. Pass `None` for an in-memory database.
    pub fn open(path: Option<&Path>) -> crate::Result<Self> {
        let conn = open_database(path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> crate::Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| GenerationError::Other(e.to_string()))?;
        Ok(f(&conn)?)
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn upsert(&self, job: &GenerationJob) -> crate::Result<()> {
        self.with_conn(|conn| upsert_job(conn, job))
    }

    async fn get(&self, job_id: &str) -> crate::Result<Option<GenerationJob>> {
        self.with_conn(|conn| get_job(conn, job_id))
    }

    async fn find_by_image_id(&self, image_id: &str) -> crate::Result<Option<GenerationJob>> {
        self.with_conn(|conn| find_job_by_image_id(conn, image_id))
    }

    async fn list_recent(&self, limit: usize) -> crate::Result<Vec<GenerationJob>> {
        self.with_conn(|conn| list_recent_jobs(conn, limit))
    }

    async fn list_unfinished(&self) -> crate::Result<Vec<String>> {
        self.with_conn(list_unfinished_job_ids)
    }
}

//! Fetch job persistence
//!
//! Jobs are written at submission, at each phase boundary and when they
//! finish. Live counters between those points exist only in the tracker.

use bggweb_common::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{FetchJob, JobParams, Phase, PhaseProgress};
use crate::utils::db_retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};

/// Error detail recorded for jobs a previous process left unfinished
pub const INTERRUPTED_DETAIL: &str = "interrupted by service restart";

const SELECT_COLUMNS: &str = r#"
    SELECT job_id, kind, params, status, current_phase, phases, batch_size, error,
           incomplete_ids, games_applied, created_at, started_at, finished_at
    FROM fetch_jobs
"#;

fn to_json<T: serde::Serialize>(value: &T, what: &str) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| Error::Internal(format!("Failed to serialize {}: {}", what, e)))
}

fn from_json<T: serde::de::DeserializeOwned>(raw: &str, what: &str) -> Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| Error::Corrupt(format!("{}: {}", what, e)))
}

/// Phase list in [`Phase::ALL`] order, one entry per phase
fn decode_phases(raw: &str) -> Result<Vec<PhaseProgress>> {
    let phases: Vec<PhaseProgress> = from_json(raw, "phases")?;
    let in_order = phases.len() == Phase::ALL.len()
        && phases.iter().zip(Phase::ALL).all(|(p, expected)| p.phase == expected);
    if !in_order {
        let found: Vec<Phase> = phases.iter().map(|p| p.phase).collect();
        return Err(Error::Corrupt(format!("phases: expected {:?}, found {:?}", Phase::ALL, found)));
    }
    Ok(phases)
}

fn parse_time(raw: &str, what: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Corrupt(format!("{} timestamp {:?}: {}", what, raw, e)))
}

fn parse_optional_time(raw: Option<String>, what: &str) -> Result<Option<DateTime<Utc>>> {
    raw.map(|s| parse_time(&s, what)).transpose()
}

/// Insert or update a job row
pub async fn save_job(pool: &SqlitePool, job: &FetchJob) -> Result<()> {
    let job_id = job.job_id.to_string();
    let params = to_json(&job.params, "params")?;
    let phases = to_json(&job.phases, "phases")?;
    let incomplete = to_json(&job.incomplete_ids, "incomplete ids")?;
    let current_phase = job.current_phase.map(|p| p.as_str());
    let created_at = job.created_at.to_rfc3339();
    let started_at = job.started_at.map(|t| t.to_rfc3339());
    let finished_at = job.finished_at.map(|t| t.to_rfc3339());

    retry_on_lock("save_job", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        sqlx::query(
            r#"
            INSERT INTO fetch_jobs (
                job_id, kind, params, status, current_phase, phases, batch_size, error,
                incomplete_ids, games_applied, created_at, started_at, finished_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(job_id) DO UPDATE SET
                status = excluded.status,
                current_phase = excluded.current_phase,
                phases = excluded.phases,
                error = excluded.error,
                incomplete_ids = excluded.incomplete_ids,
                games_applied = excluded.games_applied,
                started_at = excluded.started_at,
                finished_at = excluded.finished_at
            "#,
        )
        .bind(&job_id)
        .bind(job.kind.as_str())
        .bind(&params)
        .bind(job.status.as_str())
        .bind(current_phase)
        .bind(&phases)
        .bind(job.batch_size as i64)
        .bind(&job.error)
        .bind(&incomplete)
        .bind(job.games_applied as i64)
        .bind(&created_at)
        .bind(&started_at)
        .bind(&finished_at)
        .execute(pool)
        .await?;
        Ok(())
    })
    .await
}

fn job_from_row(row: &SqliteRow) -> Result<FetchJob> {
    let job_id: String = row.get("job_id");
    let job_id = Uuid::parse_str(&job_id)
        .map_err(|e| Error::Corrupt(format!("job_id: {}", e)))?;

    let kind: String = row.get("kind");
    let status: String = row.get("status");
    let current_phase: Option<String> = row.get("current_phase");
    let params: String = row.get("params");
    let phases: String = row.get("phases");
    let incomplete: String = row.get("incomplete_ids");
    let created_at: String = row.get("created_at");

    Ok(FetchJob {
        job_id,
        kind: kind.parse().map_err(Error::Corrupt)?,
        params: from_json::<JobParams>(&params, "params")?,
        status: status.parse().map_err(Error::Corrupt)?,
        current_phase: current_phase
            .map(|p| p.parse())
            .transpose()
            .map_err(Error::Corrupt)?,
        phases: decode_phases(&phases)?,
        batch_size: row.get::<i64, _>("batch_size") as usize,
        error: row.get("error"),
        incomplete_ids: from_json(&incomplete, "incomplete ids")?,
        games_applied: row.get::<i64, _>("games_applied") as u64,
        created_at: parse_time(&created_at, "created_at")?,
        started_at: parse_optional_time(row.get("started_at"), "started_at")?,
        finished_at: parse_optional_time(row.get("finished_at"), "finished_at")?,
    })
}

pub async fn load_job(pool: &SqlitePool, job_id: Uuid) -> Result<Option<FetchJob>> {
    let row = sqlx::query(&format!("{} WHERE job_id = ?", SELECT_COLUMNS))
        .bind(job_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Most recently created jobs first
pub async fn list_recent(pool: &SqlitePool, limit: i64) -> Result<Vec<FetchJob>> {
    let rows = sqlx::query(&format!("{} ORDER BY created_at DESC LIMIT ?", SELECT_COLUMNS))
        .bind(limit)
        .fetch_all(pool)
        .await?;

    rows.iter().map(job_from_row).collect()
}

/// Delete finished jobs; pending and running rows are kept
pub async fn clear_finished(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query("DELETE FROM fetch_jobs WHERE status NOT IN ('pending', 'running')")
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Mark jobs left pending/running by a previous process as failed
pub async fn fail_interrupted(pool: &SqlitePool) -> Result<u64> {
    let rows = sqlx::query(&format!(
        "{} WHERE status IN ('pending', 'running')",
        SELECT_COLUMNS
    ))
    .fetch_all(pool)
    .await?;

    let mut count = 0;
    for row in &rows {
        let mut job = job_from_row(row)?;
        if job.fail(INTERRUPTED_DETAIL).is_ok() {
            save_job(pool, &job).await?;
            count += 1;
        }
    }
    Ok(count)
}

//! Job submission, polling and cancellation
//!
//! POST /jobs, GET /jobs, GET /jobs/:id, POST /jobs/:id/cancel, POST /jobs/clear

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use uuid::Uuid;

use crate::db::jobs;
use crate::error::{ApiError, ApiResult};
use crate::models::JobSnapshot;
use crate::services::JobRequest;
use crate::AppState;

/// Jobs listed by GET /jobs
pub const RECENT_JOBS_LIMIT: i64 = 10;

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobSnapshot>,
}

#[derive(Debug, Serialize)]
pub struct ClearJobsResponse {
    pub deleted: u64,
}

/// POST /jobs
///
/// Queue a job and return immediately with 202 Accepted.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(request): Json<JobRequest>,
) -> ApiResult<(StatusCode, Json<JobSnapshot>)> {
    let snapshot = state.runner.submit(request).await?;
    Ok((StatusCode::ACCEPTED, Json(snapshot)))
}

/// GET /jobs
pub async fn list_jobs(State(state): State<AppState>) -> ApiResult<Json<JobListResponse>> {
    let jobs = state.reporter.recent(RECENT_JOBS_LIMIT).await?;
    Ok(Json(JobListResponse { jobs }))
}

/// GET /jobs/:id
///
/// Progress snapshot; safe to poll at any rate.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<JobSnapshot>> {
    Ok(Json(state.reporter.snapshot(job_id).await?))
}

/// POST /jobs/:id/cancel
///
/// Cooperative: the job stops at its next batch or phase boundary.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<JobSnapshot>)> {
    if let Some(active) = state.registry().get(job_id).await {
        let job = active.tracker.snapshot();
        if job.is_terminal() {
            return Err(ApiError::Conflict(format!(
                "Job {} is already {}",
                job_id,
                job.status.as_str()
            )));
        }
        active.cancel.cancel();
        tracing::info!(job_id = %job_id, phase = ?job.current_phase, "Cancellation requested");
        return Ok((StatusCode::ACCEPTED, Json(job.snapshot(chrono::Utc::now()))));
    }

    let mut job = jobs::load_job(&state.db, job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Job not found: {}", job_id)))?;

    if job.is_terminal() {
        return Err(ApiError::Conflict(format!(
            "Job {} is already {}",
            job_id,
            job.status.as_str()
        )));
    }

    // Stored as live but no task owns it
    job.cancel()
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    jobs::save_job(&state.db, &job).await?;
    tracing::warn!(job_id = %job_id, "Cancelled orphaned job");
    Ok((StatusCode::OK, Json(job.snapshot(chrono::Utc::now()))))
}

/// POST /jobs/clear
///
/// Delete finished job history; live jobs are kept.
pub async fn clear_jobs(State(state): State<AppState>) -> ApiResult<Json<ClearJobsResponse>> {
    let deleted = jobs::clear_finished(&state.db).await?;
    tracing::info!(deleted, "Cleared job history");
    Ok(Json(ClearJobsResponse { deleted }))
}

/// Build job routes
pub fn job_routes() -> Router<AppState> {
    Router::new()
        .route("/jobs", post(submit_job).get(list_jobs))
        .route("/jobs/clear", post(clear_jobs))
        .route("/jobs/events", get(super::job_event_stream))
        .route("/jobs/:id", get(get_job))
        .route("/jobs/:id/cancel", post(cancel_job))
}

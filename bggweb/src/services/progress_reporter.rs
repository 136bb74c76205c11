//! Progress reporter
//!
//! Read-only view of a job for pollers. Live jobs are read from their
//! tracker's latest published state; finished jobs come from the database.

use super::job_registry::JobRegistry;
use crate::db::jobs;
use crate::models::JobSnapshot;
use bggweb_common::{Error, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

#[derive(Clone)]
pub struct ProgressReporter {
    db: SqlitePool,
    registry: JobRegistry,
}

impl ProgressReporter {
    pub fn new(db: SqlitePool, registry: JobRegistry) -> Self {
        Self { db, registry }
    }

    /// Snapshot of `job_id`, or [`Error::NotFound`] when unknown
    pub async fn snapshot(&self, job_id: Uuid) -> Result<JobSnapshot> {
        if let Some(active) = self.registry.get(job_id).await {
            return Ok(active.tracker.snapshot().snapshot(Utc::now()));
        }

        jobs::load_job(&self.db, job_id)
            .await?
            .map(|job| job.snapshot(Utc::now()))
            .ok_or_else(|| Error::NotFound(format!("Job not found: {}", job_id)))
    }

    /// Most recent jobs, live state preferred over stored rows
    pub async fn recent(&self, limit: i64) -> Result<Vec<JobSnapshot>> {
        let now = Utc::now();
        let mut snapshots = Vec::new();
        for job in jobs::list_recent(&self.db, limit).await? {
            let snapshot = match self.registry.get(job.job_id).await {
                Some(active) => active.tracker.snapshot().snapshot(now),
                None => job.snapshot(now),
            };
            snapshots.push(snapshot);
        }
        Ok(snapshots)
    }
}

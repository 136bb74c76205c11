//! Active job registry
//!
//! Holds the tracker and cancellation token of every job that has not yet
//! reached a terminal state. At most one job is registered at a time.

use super::job_tracker::JobTracker;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Handles shared between the runner, the API and the watchdog
#[derive(Clone)]
pub struct ActiveJob {
    pub tracker: JobTracker,
    pub cancel: CancellationToken,
    /// Stall ceiling the watchdog applied, once it has stopped the job
    stalled: Arc<OnceLock<Duration>>,
}

impl ActiveJob {
    pub fn new(tracker: JobTracker) -> Self {
        Self {
            tracker,
            cancel: CancellationToken::new(),
            stalled: Arc::new(OnceLock::new()),
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.tracker.job_id()
    }

    /// Flag the job as stalled after `ceiling` without progress and fire its token
    pub fn mark_stalled(&self, ceiling: Duration) {
        // first flag wins
        let _ = self.stalled.set(ceiling);
        self.cancel.cancel();
    }

    pub fn is_stalled(&self) -> bool {
        self.stalled.get().is_some()
    }

    pub fn stalled_after(&self) -> Option<Duration> {
        self.stalled.get().copied()
    }
}

#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<Uuid, ActiveJob>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `job` unless another job holds the running slot
    ///
    /// Returns the id of the job already holding the slot on conflict.
    pub async fn try_register(&self, job: ActiveJob) -> Result<(), Uuid> {
        let mut jobs = self.jobs.write().await;
        if let Some(existing) = jobs.keys().next() {
            return Err(*existing);
        }
        jobs.insert(job.job_id(), job);
        Ok(())
    }

    pub async fn get(&self, job_id: Uuid) -> Option<ActiveJob> {
        self.jobs.read().await.get(&job_id).cloned()
    }

    pub async fn remove(&self, job_id: Uuid) -> Option<ActiveJob> {
        self.jobs.write().await.remove(&job_id)
    }

    pub async fn active(&self) -> Vec<ActiveJob> {
        self.jobs.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FetchJob, JobKind, JobParams};
    use bggweb_common::events::EventBus;

    fn active_job() -> ActiveJob {
        let job = FetchJob::new(
            JobKind::TopN,
            JobParams {
                n: Some(10),
                username: None,
                batch_size: 5,
            },
        );
        ActiveJob::new(JobTracker::new(job, EventBus::new(8)))
    }

    #[tokio::test]
    async fn only_one_job_holds_the_slot() {
        let registry = JobRegistry::new();
        let first = active_job();
        let first_id = first.job_id();

        registry.try_register(first).await.unwrap();
        assert_eq!(registry.try_register(active_job()).await, Err(first_id));
        assert_eq!(registry.len().await, 1);

        registry.remove(first_id).await.unwrap();
        assert!(registry.is_empty().await);
        assert!(registry.try_register(active_job()).await.is_ok());
    }

    #[test]
    fn mark_stalled_fires_token() {
        let job = active_job();
        assert!(!job.is_stalled());
        job.mark_stalled(Duration::from_secs(90));
        job.mark_stalled(Duration::from_secs(5));
        assert!(job.is_stalled());
        assert_eq!(job.stalled_after(), Some(Duration::from_secs(90)));
        assert!(job.cancel.is_cancelled());
    }
}

//! Job state tracker
//!
//! Owns the live [`FetchJob`] for one running job. Every mutation is applied
//! in place under the `watch` channel's write lock, so readers only ever see
//! whole snapshots. The tracker also emits the matching [`BggEvent`] and
//! records when state last changed for the watchdog.

use crate::models::{FetchJob, Phase, TransitionError};
use bggweb_common::events::{BggEvent, EventBus};
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::watch;
use uuid::Uuid;

#[derive(Clone)]
pub struct JobTracker {
    tx: Arc<watch::Sender<FetchJob>>,
    event_bus: EventBus,
    last_change: Arc<Mutex<Instant>>,
}

impl JobTracker {
    pub fn new(job: FetchJob, event_bus: EventBus) -> Self {
        let (tx, _) = watch::channel(job);
        Self {
            tx: Arc::new(tx),
            event_bus,
            last_change: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.tx.borrow().job_id
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> FetchJob {
        self.tx.borrow().clone()
    }

    /// Receiver for pollers; never blocks the runner
    pub fn subscribe(&self) -> watch::Receiver<FetchJob> {
        self.tx.subscribe()
    }

    /// Time since the tracked state last changed
    pub fn idle_for(&self) -> std::time::Duration {
        self.last_change
            .lock()
            .map(|t| t.elapsed())
            .unwrap_or_default()
    }

    fn touch(&self) {
        if let Ok(mut last) = self.last_change.lock() {
            *last = Instant::now();
        }
    }

    /// Apply `f` atomically; nothing is published when it fails or reports no change
    fn update<F>(&self, f: F) -> Result<bool, TransitionError>
    where
        F: FnOnce(&mut FetchJob) -> Result<bool, TransitionError>,
    {
        let mut outcome = Ok(false);
        self.tx.send_if_modified(|job| {
            // Work on a copy so a rejected transition leaves no trace
            let mut next = job.clone();
            match f(&mut next) {
                Ok(true) => {
                    *job = next;
                    outcome = Ok(true);
                    true
                }
                Ok(false) => false,
                Err(e) => {
                    outcome = Err(e);
                    false
                }
            }
        });
        if matches!(outcome, Ok(true)) {
            self.touch();
        }
        outcome
    }

    pub fn start(&self) -> Result<(), TransitionError> {
        self.update(|job| job.start().map(|_| true))?;
        Ok(())
    }

    pub fn begin_phase(&self, phase: Phase, total: u64) -> Result<(), TransitionError> {
        self.update(|job| job.begin_phase(phase, total).map(|_| true))?;
        self.event_bus.emit_lossy(BggEvent::JobPhaseStarted {
            job_id: self.job_id(),
            phase: phase.as_str().to_string(),
            total,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Advance the active phase's counters (never backwards)
    pub fn progress(&self, done: u64, failed: u64) -> Result<(), TransitionError> {
        if self.update(|job| job.record_progress(done, failed))? {
            let job = self.snapshot();
            if let Some(active) = job.active_phase() {
                self.event_bus.emit_lossy(BggEvent::JobProgress {
                    job_id: job.job_id,
                    phase: active.phase.as_str().to_string(),
                    done: active.done,
                    total: active.total,
                    failed: active.failed,
                    eta_seconds: active.eta_seconds(Utc::now()),
                    timestamp: Utc::now(),
                });
            }
        }
        Ok(())
    }

    pub fn complete_phase(&self) -> Result<(), TransitionError> {
        self.update(|job| job.complete_phase().map(|_| true))?;
        Ok(())
    }

    pub fn set_incomplete(&self, ids: Vec<String>) -> Result<(), TransitionError> {
        self.update(|job| job.set_incomplete(ids).map(|_| true))?;
        Ok(())
    }

    pub fn succeed(&self, games_applied: u64) -> Result<(), TransitionError> {
        self.update(|job| job.succeed(games_applied).map(|_| true))?;
        self.event_bus.emit_lossy(BggEvent::JobSucceeded {
            job_id: self.job_id(),
            games_applied,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    pub fn fail(&self, detail: impl Into<String>) -> Result<(), TransitionError> {
        let detail = detail.into();
        let error = detail.clone();
        self.update(move |job| job.fail(detail).map(|_| true))?;
        self.event_bus.emit_lossy(BggEvent::JobFailed {
            job_id: self.job_id(),
            error,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    pub fn cancel(&self) -> Result<(), TransitionError> {
        self.update(|job| job.cancel().map(|_| true))?;
        self.event_bus.emit_lossy(BggEvent::JobCancelled {
            job_id: self.job_id(),
            timestamp: Utc::now(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobKind, JobParams, JobStatus};

    fn tracker() -> (JobTracker, EventBus) {
        let bus = EventBus::new(64);
        let job = FetchJob::new(
            JobKind::TopN,
            JobParams {
                n: Some(10),
                username: None,
                batch_size: 5,
            },
        );
        (JobTracker::new(job, bus.clone()), bus)
    }

    #[test]
    fn readers_see_published_state() {
        let (tracker, _bus) = tracker();
        let rx = tracker.subscribe();
        tracker.start().unwrap();
        tracker.begin_phase(Phase::TopN, 10).unwrap();
        tracker.progress(4, 0).unwrap();

        let seen = rx.borrow().clone();
        assert_eq!(seen.status, JobStatus::Running);
        assert_eq!(seen.phase(Phase::TopN).done, 4);
    }

    #[test]
    fn rejected_transition_leaves_state_untouched() {
        let (tracker, _bus) = tracker();
        tracker.start().unwrap();
        tracker.begin_phase(Phase::Details, 3).unwrap();
        let before = tracker.snapshot();

        assert!(tracker.begin_phase(Phase::TopN, 5).is_err());
        assert_eq!(tracker.snapshot(), before);
    }

    #[test]
    fn progress_never_decreases() {
        let (tracker, _bus) = tracker();
        tracker.start().unwrap();
        tracker.begin_phase(Phase::TopN, 10).unwrap();

        let mut last = 0;
        for reported in [2u64, 5, 3, 5, 9, 1, 10] {
            tracker.progress(reported, 0).unwrap();
            let done = tracker.snapshot().phase(Phase::TopN).done;
            assert!(done >= last);
            last = done;
        }
        assert_eq!(last, 10);
    }

    #[tokio::test]
    async fn emits_lifecycle_events() {
        let (tracker, bus) = tracker();
        let mut rx = bus.subscribe();

        tracker.start().unwrap();
        tracker.begin_phase(Phase::TopN, 2).unwrap();
        tracker.progress(1, 0).unwrap();
        tracker.progress(1, 0).unwrap(); // unchanged, no event
        tracker.fail("boom").unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.event_type());
        }
        assert_eq!(kinds, vec!["JobPhaseStarted", "JobProgress", "JobFailed"]);
    }

    #[test]
    fn terminal_state_is_final() {
        let (tracker, _bus) = tracker();
        tracker.start().unwrap();
        tracker.cancel().unwrap();
        assert!(tracker.fail("late").is_err());
        assert_eq!(tracker.snapshot().status, JobStatus::Cancelled);
        assert!(tracker.snapshot().error.is_none());
    }
}

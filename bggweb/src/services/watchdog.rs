//! Stalled job watchdog
//!
//! Wakes periodically and stops any running job whose tracker has not changed
//! for the configured ceiling, so a stuck job cannot hold the running slot
//! forever. The runner records such jobs as failed, not cancelled.

use super::job_registry::JobRegistry;
use crate::config::PipelineConfig;
use crate::models::{JobStatus, Phase};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct Watchdog {
    registry: JobRegistry,
    stall_after: Duration,
    check_every: Duration,
}

impl Watchdog {
    pub fn new(registry: JobRegistry, stall_after: Duration, check_every: Duration) -> Self {
        Self {
            registry,
            stall_after,
            check_every,
        }
    }

    pub fn from_config(registry: JobRegistry, config: &PipelineConfig) -> Self {
        Self::new(
            registry,
            Duration::from_secs(config.watchdog_stall_secs),
            Duration::from_secs(config.watchdog_interval_secs),
        )
    }

    /// Flag every stalled job once; returns the ids flagged by this pass
    pub async fn check_once(&self) -> Vec<Uuid> {
        let mut flagged = Vec::new();
        for active in self.registry.active().await {
            if active.is_stalled() {
                continue;
            }
            let job = active.tracker.snapshot();
            if job.status != JobStatus::Running {
                continue;
            }
            // The apply transaction always runs to completion
            if job.current_phase == Some(Phase::Apply) {
                continue;
            }
            let idle = active.tracker.idle_for();
            if idle >= self.stall_after {
                warn!(
                    job_id = %job.job_id,
                    phase = ?job.current_phase,
                    idle_secs = idle.as_secs(),
                    "Job stalled; stopping it"
                );
                active.mark_stalled(self.stall_after);
                flagged.push(job.job_id);
            }
        }
        flagged
    }

    /// Run the periodic check on a background task
    pub fn spawn(self) -> JoinHandle<()> {
        info!(
            stall_secs = self.stall_after.as_secs(),
            interval_secs = self.check_every.as_secs(),
            "Starting job watchdog"
        );
        tokio::spawn(async move {
            let mut timer = interval(self.check_every.max(Duration::from_millis(10)));
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                timer.tick().await;
                let flagged = self.check_once().await;
                if flagged.is_empty() {
                    debug!("Watchdog pass: no stalled jobs");
                }
            }
        })
    }
}

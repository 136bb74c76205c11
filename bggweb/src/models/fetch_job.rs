//! Fetch job state machine
//!
//! A job moves `Pending → Running(phase) → {Succeeded, Failed, Cancelled}`.
//! Phases run in the fixed order TopN → Collection → Details → Apply; phases
//! a job kind does not need are marked `skipped` up front and never run.
//! Terminal jobs reject every further mutation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// What a job fetches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Ranked Top-N list, then details
    TopN,
    /// One user's owned collection, then details
    Collection,
    /// Top-N plus (optionally) a collection merge
    Refresh,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::TopN => "top_n",
            JobKind::Collection => "collection",
            JobKind::Refresh => "refresh",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "top_n" => Ok(JobKind::TopN),
            "collection" => Ok(JobKind::Collection),
            "refresh" => Ok(JobKind::Refresh),
            other => Err(format!("unknown job kind: {}", other)),
        }
    }
}

/// Lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

/// One ordered stage of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    TopN,
    Collection,
    Details,
    Apply,
}

impl Phase {
    /// Execution order
    pub const ALL: [Phase; 4] = [Phase::TopN, Phase::Collection, Phase::Details, Phase::Apply];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::TopN => "top_n",
            Phase::Collection => "collection",
            Phase::Details => "details",
            Phase::Apply => "apply",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("unknown phase: {}", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    Running,
    Done,
    Skipped,
    Failed,
}

/// Counters for one phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseProgress {
    pub phase: Phase,
    pub status: PhaseStatus,
    /// Items processed so far (failed items included)
    pub done: u64,
    pub total: u64,
    /// Items flagged failed/incomplete so far
    pub failed: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PhaseProgress {
    fn new(phase: Phase, status: PhaseStatus) -> Self {
        Self {
            phase,
            status,
            done: 0,
            total: 0,
            failed: 0,
            started_at: None,
            finished_at: None,
        }
    }

    /// ETA for this phase: `elapsed / done * (total - done)`; `None` while `done == 0`
    pub fn eta_seconds(&self, now: DateTime<Utc>) -> Option<u64> {
        if self.done == 0 || self.status != PhaseStatus::Running {
            return None;
        }
        let started = self.started_at?;
        let elapsed_ms = (now - started).num_milliseconds().max(0) as f64;
        let remaining = self.total.saturating_sub(self.done) as f64;
        let eta_ms = elapsed_ms / self.done as f64 * remaining;
        Some((eta_ms / 1000.0).round() as u64)
    }
}

/// Parameters captured at submission time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub batch_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("job {0} is already {1}")]
    Terminal(Uuid, &'static str),

    #[error("job {job_id} cannot {action} while {status}")]
    InvalidState {
        job_id: Uuid,
        action: &'static str,
        status: &'static str,
    },

    #[error("phase {phase} cannot start after {current}")]
    OutOfOrder { phase: Phase, current: Phase },

    #[error("phase {0} is skipped for this job")]
    SkippedPhase(Phase),
}

/// The unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchJob {
    pub job_id: Uuid,
    pub kind: JobKind,
    pub params: JobParams,
    pub status: JobStatus,
    pub current_phase: Option<Phase>,
    /// Always four entries in [`Phase::ALL`] order
    pub phases: Vec<PhaseProgress>,
    pub batch_size: usize,
    pub error: Option<String>,
    /// Game ids whose details could not be fetched
    pub incomplete_ids: Vec<String>,
    pub games_applied: u64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl FetchJob {
    pub fn new(kind: JobKind, params: JobParams) -> Self {
        let wants_collection = match kind {
            JobKind::TopN => false,
            JobKind::Collection => true,
            JobKind::Refresh => params
                .username
                .as_deref()
                .is_some_and(|u| !u.trim().is_empty()),
        };

        let phases = Phase::ALL
            .into_iter()
            .map(|phase| {
                let skipped = match phase {
                    Phase::TopN => kind == JobKind::Collection,
                    Phase::Collection => !wants_collection,
                    Phase::Details | Phase::Apply => false,
                };
                let status = if skipped {
                    PhaseStatus::Skipped
                } else {
                    PhaseStatus::Pending
                };
                PhaseProgress::new(phase, status)
            })
            .collect();

        Self {
            job_id: Uuid::new_v4(),
            kind,
            batch_size: params.batch_size,
            params,
            status: JobStatus::Pending,
            current_phase: None,
            phases,
            error: None,
            incomplete_ids: Vec::new(),
            games_applied: 0,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn phase(&self, phase: Phase) -> &PhaseProgress {
        &self.phases[phase as usize]
    }

    fn phase_mut(&mut self, phase: Phase) -> &mut PhaseProgress {
        &mut self.phases[phase as usize]
    }

    /// Whether `phase` will run for this job
    pub fn runs_phase(&self, phase: Phase) -> bool {
        self.phase(phase).status != PhaseStatus::Skipped
    }

    /// Progress of the phase currently running, if any
    pub fn active_phase(&self) -> Option<&PhaseProgress> {
        self.current_phase
            .map(|p| self.phase(p))
            .filter(|p| p.status == PhaseStatus::Running)
    }

    fn ensure_not_terminal(&self) -> Result<(), TransitionError> {
        if self.is_terminal() {
            return Err(TransitionError::Terminal(self.job_id, self.status.as_str()));
        }
        Ok(())
    }

    fn ensure_running(&self, action: &'static str) -> Result<(), TransitionError> {
        self.ensure_not_terminal()?;
        if self.status != JobStatus::Running {
            return Err(TransitionError::InvalidState {
                job_id: self.job_id,
                action,
                status: self.status.as_str(),
            });
        }
        Ok(())
    }

    /// Pending → Running
    pub fn start(&mut self) -> Result<(), TransitionError> {
        self.ensure_not_terminal()?;
        if self.status != JobStatus::Pending {
            return Err(TransitionError::InvalidState {
                job_id: self.job_id,
                action: "start",
                status: self.status.as_str(),
            });
        }
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Enter `phase` with counters reset to zero
    ///
    /// A phase still marked running is closed as done first.
    pub fn begin_phase(&mut self, phase: Phase, total: u64) -> Result<(), TransitionError> {
        self.ensure_running("begin a phase")?;
        if !self.runs_phase(phase) {
            return Err(TransitionError::SkippedPhase(phase));
        }
        if let Some(current) = self.current_phase {
            if phase <= current {
                return Err(TransitionError::OutOfOrder { phase, current });
            }
            let now = Utc::now();
            let previous = self.phase_mut(current);
            if previous.status == PhaseStatus::Running {
                previous.status = PhaseStatus::Done;
                previous.finished_at = Some(now);
            }
        }

        let progress = self.phase_mut(phase);
        progress.status = PhaseStatus::Running;
        progress.done = 0;
        progress.failed = 0;
        progress.total = total;
        progress.started_at = Some(Utc::now());
        progress.finished_at = None;
        self.current_phase = Some(phase);
        Ok(())
    }

    /// Advance counters of the active phase; never moves them backwards
    ///
    /// Returns `true` when a counter changed.
    pub fn record_progress(&mut self, done: u64, failed: u64) -> Result<bool, TransitionError> {
        self.ensure_running("record progress")?;
        let Some(current) = self.current_phase else {
            return Err(TransitionError::InvalidState {
                job_id: self.job_id,
                action: "record progress",
                status: "between phases",
            });
        };
        let progress = self.phase_mut(current);
        let new_done = progress.done.max(done);
        let new_failed = progress.failed.max(failed);
        let changed = new_done != progress.done || new_failed != progress.failed;
        progress.done = new_done;
        progress.failed = new_failed;
        if progress.total < progress.done {
            progress.total = progress.done;
        }
        Ok(changed)
    }

    /// Mark the active phase done
    pub fn complete_phase(&mut self) -> Result<(), TransitionError> {
        self.ensure_running("complete a phase")?;
        if let Some(current) = self.current_phase {
            let progress = self.phase_mut(current);
            progress.status = PhaseStatus::Done;
            progress.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Running(Apply) → Succeeded
    pub fn succeed(&mut self, games_applied: u64) -> Result<(), TransitionError> {
        self.ensure_running("succeed")?;
        if self.current_phase != Some(Phase::Apply) {
            return Err(TransitionError::InvalidState {
                job_id: self.job_id,
                action: "succeed",
                status: "not applying",
            });
        }
        self.complete_phase()?;
        self.games_applied = games_applied;
        self.status = JobStatus::Succeeded;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Any non-terminal state → Failed
    pub fn fail(&mut self, detail: impl Into<String>) -> Result<(), TransitionError> {
        self.ensure_not_terminal()?;
        let now = Utc::now();
        if let Some(current) = self.current_phase {
            let progress = self.phase_mut(current);
            if progress.status == PhaseStatus::Running {
                progress.status = PhaseStatus::Failed;
                progress.finished_at = Some(now);
            }
        }
        self.error = Some(detail.into());
        self.status = JobStatus::Failed;
        self.finished_at = Some(now);
        Ok(())
    }

    /// Any non-terminal state → Cancelled
    pub fn cancel(&mut self) -> Result<(), TransitionError> {
        self.ensure_not_terminal()?;
        let now = Utc::now();
        if let Some(current) = self.current_phase {
            let progress = self.phase_mut(current);
            if progress.status == PhaseStatus::Running {
                progress.status = PhaseStatus::Failed;
                progress.finished_at = Some(now);
            }
        }
        self.status = JobStatus::Cancelled;
        self.finished_at = Some(now);
        Ok(())
    }

    pub fn set_incomplete(&mut self, ids: Vec<String>) -> Result<(), TransitionError> {
        self.ensure_not_terminal()?;
        self.incomplete_ids = ids;
        Ok(())
    }

    /// Wall-clock time since the job started
    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> u64 {
        let Some(started) = self.started_at else {
            return 0;
        };
        let end = self.finished_at.unwrap_or(now);
        (end - started).num_seconds().max(0) as u64
    }

    /// Read-only view consumed by pollers
    pub fn snapshot(&self, now: DateTime<Utc>) -> JobSnapshot {
        let active = self.active_phase();
        JobSnapshot {
            job_id: self.job_id,
            kind: self.kind,
            status: self.status,
            current_phase: self.current_phase,
            processed: active.map(|p| p.done).unwrap_or(0),
            total: active.map(|p| p.total).unwrap_or(0),
            elapsed_seconds: self.elapsed_seconds(now),
            eta_seconds: active.and_then(|p| p.eta_seconds(now)),
            phases: self.phases.clone(),
            params: self.params.clone(),
            batch_size: self.batch_size,
            error: self.error.clone(),
            incomplete_ids: self.incomplete_ids.clone(),
            games_applied: self.games_applied,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

/// Point-in-time projection of a job returned to pollers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: Uuid,
    pub kind: JobKind,
    pub status: JobStatus,
    pub current_phase: Option<Phase>,
    /// Active phase counters, zero between phases
    pub processed: u64,
    pub total: u64,
    pub elapsed_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<u64>,
    pub phases: Vec<PhaseProgress>,
    pub params: JobParams,
    pub batch_size: usize,
    pub error: Option<String>,
    pub incomplete_ids: Vec<String>,
    pub games_applied: u64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

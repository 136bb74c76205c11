//! Job lifecycle events and the broadcast bus that carries them to SSE clients

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Events published while fetch jobs run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BggEvent {
    /// A job was accepted and queued
    JobSubmitted {
        job_id: Uuid,
        kind: String,
        timestamp: DateTime<Utc>,
    },

    /// A job moved into a new phase
    JobPhaseStarted {
        job_id: Uuid,
        phase: String,
        total: u64,
        timestamp: DateTime<Utc>,
    },

    /// Progress counters for the active phase
    JobProgress {
        job_id: Uuid,
        phase: String,
        done: u64,
        total: u64,
        failed: u64,
        eta_seconds: Option<u64>,
        timestamp: DateTime<Utc>,
    },

    /// Job finished and its results were applied
    JobSucceeded {
        job_id: Uuid,
        games_applied: u64,
        timestamp: DateTime<Utc>,
    },

    /// Job ended with an error; nothing was applied
    JobFailed {
        job_id: Uuid,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Job was cancelled by a user request
    JobCancelled {
        job_id: Uuid,
        timestamp: DateTime<Utc>,
    },
}

impl BggEvent {
    /// SSE event name
    pub fn event_type(&self) -> &'static str {
        match self {
            BggEvent::JobSubmitted { .. } => "JobSubmitted",
            BggEvent::JobPhaseStarted { .. } => "JobPhaseStarted",
            BggEvent::JobProgress { .. } => "JobProgress",
            BggEvent::JobSucceeded { .. } => "JobSucceeded",
            BggEvent::JobFailed { .. } => "JobFailed",
            BggEvent::JobCancelled { .. } => "JobCancelled",
        }
    }

    pub fn job_id(&self) -> Uuid {
        match self {
            BggEvent::JobSubmitted { job_id, .. }
            | BggEvent::JobPhaseStarted { job_id, .. }
            | BggEvent::JobProgress { job_id, .. }
            | BggEvent::JobSucceeded { job_id, .. }
            | BggEvent::JobFailed { job_id, .. }
            | BggEvent::JobCancelled { job_id, .. } => *job_id,
        }
    }
}

/// Broadcast bus for [`BggEvent`]s
///
/// Slow subscribers lose the oldest events once `capacity` is exceeded.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BggEvent>,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<BggEvent> {
        self.tx.subscribe()
    }

    /// Emit an event; errors when nobody is listening
    pub fn emit(
        &self,
        event: BggEvent,
    ) -> std::result::Result<usize, broadcast::error::SendError<BggEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring the no-subscriber case
    pub fn emit_lossy(&self, event: BggEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

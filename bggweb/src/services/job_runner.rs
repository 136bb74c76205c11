//! Job runner
//!
//! Accepts job requests and drives each accepted job through
//! TopN → Collection → Details → Apply on its own tokio task. The request path
//! only validates, persists and spawns; it never waits on job work.

use super::apply_stage::{self, ApplyInput, CollectionFetch};
use super::batch_processor::{BatchProcessor, BatchSettings};
use super::game_source::{FetchContext, GameSource};
use super::job_registry::{ActiveJob, JobRegistry};
use super::job_tracker::JobTracker;
use crate::config::{clamp_batch_size, PipelineConfig};
use crate::db::jobs;
use crate::error::{JobError, SubmitError};
use crate::models::records::{CollectionSubtype, TopEntry};
use crate::models::{FetchJob, JobKind, JobParams, JobSnapshot, Phase};
use bggweb_common::config::TomlConfig;
use bggweb_common::events::{BggEvent, EventBus};
use chrono::Utc;
use serde::Deserialize;
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Top-N size when a request does not name one
pub const DEFAULT_TOP_N: u32 = 100;

/// Largest Top-N a request may ask for (one hundred ranked pages)
pub const MAX_TOP_N: u32 = 10_000;

/// Rows on one ranked page
const RANKED_PAGE_ROWS: usize = 100;

/// Body of `POST /jobs`
#[derive(Debug, Clone, Deserialize)]
pub struct JobRequest {
    pub kind: JobKind,
    #[serde(default)]
    pub n: Option<u32>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub batch_size: Option<usize>,
}

impl JobRequest {
    /// Validated parameters recorded on the job
    fn params(&self, batch_size: usize) -> Result<JobParams, SubmitError> {
        let username = self
            .username
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(String::from);

        let n = match self.kind {
            JobKind::Collection => None,
            JobKind::TopN | JobKind::Refresh => Some(self.n.unwrap_or(DEFAULT_TOP_N)),
        };
        if let Some(n) = n {
            if !(1..=MAX_TOP_N).contains(&n) {
                return Err(SubmitError::Invalid(format!(
                    "n must be between 1 and {}",
                    MAX_TOP_N
                )));
            }
        }
        if self.kind == JobKind::Collection && username.is_none() {
            return Err(SubmitError::Invalid(
                "A collection job needs a username".to_string(),
            ));
        }
        if self.batch_size == Some(0) {
            return Err(SubmitError::Invalid(
                "batch_size must be at least 1".to_string(),
            ));
        }

        Ok(JobParams {
            n,
            username,
            batch_size,
        })
    }
}

fn ensure_not_cancelled(ctx: &FetchContext) -> Result<(), JobError> {
    if ctx.is_cancelled() {
        Err(JobError::Cancelled)
    } else {
        Ok(())
    }
}

#[derive(Clone)]
pub struct JobRunner {
    db: SqlitePool,
    source: Arc<dyn GameSource>,
    registry: JobRegistry,
    event_bus: EventBus,
    toml_config: Arc<TomlConfig>,
}

impl JobRunner {
    pub fn new(
        db: SqlitePool,
        source: Arc<dyn GameSource>,
        registry: JobRegistry,
        event_bus: EventBus,
        toml_config: Arc<TomlConfig>,
    ) -> Self {
        Self {
            db,
            source,
            registry,
            event_bus,
            toml_config,
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Accept a job using the currently resolved pipeline configuration
    pub async fn submit(&self, request: JobRequest) -> Result<JobSnapshot, SubmitError> {
        let config = PipelineConfig::resolve(&self.db, &self.toml_config).await?;
        self.submit_with_config(request, config).await
    }

    /// Accept a job with an explicit configuration; returns once it is queued
    pub async fn submit_with_config(
        &self,
        request: JobRequest,
        mut config: PipelineConfig,
    ) -> Result<JobSnapshot, SubmitError> {
        if let Some(size) = request.batch_size {
            config.batch_size = clamp_batch_size(size);
        }
        config.batch_size = clamp_batch_size(config.batch_size);

        let params = request.params(config.batch_size)?;
        let job = FetchJob::new(request.kind, params);
        let job_id = job.job_id;

        let active = ActiveJob::new(JobTracker::new(job.clone(), self.event_bus.clone()));
        self.registry
            .try_register(active.clone())
            .await
            .map_err(SubmitError::Busy)?;

        if let Err(e) = jobs::save_job(&self.db, &job).await {
            self.registry.remove(job_id).await;
            return Err(e.into());
        }

        self.event_bus.emit_lossy(BggEvent::JobSubmitted {
            job_id,
            kind: job.kind.as_str().to_string(),
            timestamp: Utc::now(),
        });
        info!(
            job_id = %job_id,
            kind = %job.kind,
            batch_size = config.batch_size,
            "Job submitted"
        );

        let runner = self.clone();
        tokio::spawn(async move {
            runner.run(active, config).await;
        });

        Ok(job.snapshot(Utc::now()))
    }

    async fn run(self, active: ActiveJob, config: PipelineConfig) {
        let job_id = active.job_id();
        let ctx = FetchContext::new(active.cancel.clone(), config.retry_policy());
        let outcome = self.execute(&active, &ctx, &config).await;
        self.finalize(&active, outcome).await;
        self.registry.remove(job_id).await;
        debug!(job_id = %job_id, "Job released running slot");
    }

    async fn persist(&self, tracker: &JobTracker) {
        if let Err(e) = jobs::save_job(&self.db, &tracker.snapshot()).await {
            warn!(job_id = %tracker.job_id(), error = %e, "Failed to persist job progress");
        }
    }

    async fn execute(
        &self,
        active: &ActiveJob,
        ctx: &FetchContext,
        config: &PipelineConfig,
    ) -> Result<u64, JobError> {
        let tracker = &active.tracker;

        ensure_not_cancelled(ctx)?;
        tracker.start()?;
        self.persist(tracker).await;

        let job = tracker.snapshot();
        let mut input = ApplyInput::default();

        if job.runs_phase(Phase::TopN) {
            ensure_not_cancelled(ctx)?;
            let n = job.params.n.unwrap_or(DEFAULT_TOP_N);
            input.top = self.top_n_phase(tracker, ctx, n).await?;
        }

        if job.runs_phase(Phase::Collection) {
            ensure_not_cancelled(ctx)?;
            let username = job.params.username.clone().unwrap_or_default();
            input.collection = Some(self.collection_phase(tracker, ctx, &username).await?);
        }

        ensure_not_cancelled(ctx)?;
        let ids = input.target_ids();
        tracker.begin_phase(Phase::Details, ids.len() as u64)?;
        self.persist(tracker).await;
        info!(job_id = %job.job_id, games = ids.len(), "Fetching details");

        let processor = BatchProcessor::new(self.source.as_ref(), BatchSettings::from(config), ctx);
        let outcome = processor
            .run(&ids, |progress| {
                if let Err(e) = tracker.progress(progress.processed, progress.incomplete) {
                    debug!(error = %e, "Progress update rejected");
                }
            })
            .await?;
        tracker.complete_phase()?;
        if !outcome.incomplete.is_empty() {
            warn!(
                job_id = %job.job_id,
                incomplete = outcome.incomplete.len(),
                failed_batches = outcome.failed_batches,
                "Some games have no details; stored details are kept"
            );
        }
        tracker.set_incomplete(outcome.incomplete)?;
        input.details = outcome.details;

        // Cancellation is not honoured once the transaction begins
        ensure_not_cancelled(ctx)?;
        tracker.begin_phase(Phase::Apply, ids.len() as u64)?;
        self.persist(tracker).await;

        let summary = apply_stage::apply(&self.db, &input, |written| {
            if let Err(e) = tracker.progress(written, 0) {
                debug!(error = %e, "Progress update rejected");
            }
        })
        .await?;

        Ok(summary.games_written)
    }

    async fn top_n_phase(
        &self,
        tracker: &JobTracker,
        ctx: &FetchContext,
        n: u32,
    ) -> Result<Vec<TopEntry>, JobError> {
        let target = n as usize;

        tracker.begin_phase(Phase::TopN, u64::from(n))?;
        self.persist(tracker).await;
        info!(job_id = %tracker.job_id(), n, "Fetching ranked list");

        let mut seen = HashSet::new();
        let mut entries = Vec::with_capacity(target.min(RANKED_PAGE_ROWS));
        let mut page = 1u32;

        while entries.len() < target {
            ensure_not_cancelled(ctx)?;
            let rows = self
                .source
                .fetch_top_page(page, ctx)
                .await
                .map_err(|e| JobError::fetch(Phase::TopN.as_str(), e))?;

            let before = entries.len();
            for row in rows {
                if entries.len() >= target {
                    break;
                }
                if seen.insert(row.bgg_id.clone()) {
                    entries.push(row);
                }
            }
            if entries.len() == before {
                info!(job_id = %tracker.job_id(), page, found = entries.len(), "Ranked list exhausted");
                break;
            }

            tracker.progress(entries.len() as u64, 0)?;
            debug!(page, collected = entries.len(), "Ranked page fetched");
            page += 1;
        }

        tracker.complete_phase()?;
        Ok(entries)
    }

    /// Owned items across every subtype
    ///
    /// An id listed under several subtypes keeps its first position but takes
    /// the entry from the later subtype, so owned expansions that the base
    /// game listing also returns end up typed as expansions.
    async fn collection_phase(
        &self,
        tracker: &JobTracker,
        ctx: &FetchContext,
        username: &str,
    ) -> Result<CollectionFetch, JobError> {
        tracker.begin_phase(Phase::Collection, CollectionSubtype::ALL.len() as u64)?;
        self.persist(tracker).await;
        info!(job_id = %tracker.job_id(), username, "Fetching collection");

        let mut position: HashMap<String, usize> = HashMap::new();
        let mut entries = Vec::new();
        for (index, subtype) in CollectionSubtype::ALL.into_iter().enumerate() {
            ensure_not_cancelled(ctx)?;
            let items = self
                .source
                .fetch_collection(username, subtype, ctx)
                .await
                .map_err(|e| JobError::fetch(Phase::Collection.as_str(), e))?;
            for item in items {
                match position.get(&item.bgg_id).copied() {
                    Some(at) => entries[at] = item,
                    None => {
                        position.insert(item.bgg_id.clone(), entries.len());
                        entries.push(item);
                    }
                }
            }
            tracker.progress(index as u64 + 1, 0)?;
        }

        tracker.complete_phase()?;
        Ok(CollectionFetch {
            username: username.to_string(),
            entries,
        })
    }

    async fn finalize(&self, active: &ActiveJob, outcome: Result<u64, JobError>) {
        let tracker = &active.tracker;
        let job_id = tracker.job_id();

        let transition = match outcome {
            Ok(games_applied) => {
                info!(job_id = %job_id, games_applied, "Job succeeded");
                tracker.succeed(games_applied)
            }
            Err(JobError::Cancelled) => match active.stalled_after() {
                Some(ceiling) => {
                    let err = JobError::Stalled {
                        seconds: ceiling.as_secs(),
                    };
                    error!(job_id = %job_id, error = %err, "Job failed");
                    tracker.fail(err.to_string())
                }
                None => {
                    info!(job_id = %job_id, "Job cancelled");
                    tracker.cancel()
                }
            },
            Err(err) => {
                error!(job_id = %job_id, error = %err, "Job failed");
                tracker.fail(err.to_string())
            }
        };
        if let Err(e) = transition {
            warn!(job_id = %job_id, error = %e, "Final transition rejected");
        }

        if let Err(e) = jobs::save_job(&self.db, &tracker.snapshot()).await {
            error!(job_id = %job_id, error = %e, "Failed to persist final job state");
        }
    }
}

//! Fetch pipeline services

pub mod apply_stage;
pub mod batch_processor;
pub mod bgg_client;
pub mod game_source;
pub mod job_registry;
pub mod job_runner;
pub mod job_tracker;
pub mod parsing;
pub mod progress_reporter;
pub mod watchdog;

pub use crate::error::{FetchError, JobError};
pub use apply_stage::{apply, ApplyInput, ApplySummary, CollectionFetch};
pub use batch_processor::{BatchProcessor, BatchProgress, BatchSettings, DetailsOutcome};
pub use bgg_client::BggClient;
pub use game_source::{FetchContext, GameSource};
pub use job_registry::{ActiveJob, JobRegistry};
pub use job_runner::{JobRequest, JobRunner, DEFAULT_TOP_N, MAX_TOP_N};
pub use job_tracker::JobTracker;
pub use progress_reporter::ProgressReporter;
pub use watchdog::Watchdog;

//! Data models

pub mod fetch_job;
pub mod records;

pub use fetch_job::{
    FetchJob, JobKind, JobParams, JobSnapshot, JobStatus, Phase, PhaseProgress, PhaseStatus,
    TransitionError,
};
pub use records::{
    recommendation_score, CollectionEntry, CollectionSubtype, GameDetail, GameType,
    PlayerCountVotes, TopEntry, PLAYABLE_SCORE,
};

//! Test helper utilities
//!
//! Shared by the bggweb integration tests: a temporary on-disk database, a
//! scripted [`GameSource`] and small builders for fetched records.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::response::Response;
use bggweb::config::PipelineConfig;
use bggweb::error::FetchError;
use bggweb::models::records::{
    CollectionEntry, CollectionSubtype, GameDetail, GameType, PlayerCountVotes, TopEntry,
};
use bggweb::models::{JobSnapshot, JobStatus};
use bggweb::services::{FetchContext, GameSource, JobRegistry, ProgressReporter};
use http_body_util::BodyExt;
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

/// Create a temporary database with the full schema
///
/// The TempDir must be kept alive for the duration of the test.
pub async fn create_test_db() -> (TempDir, SqlitePool) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test_bggweb.db");
    let pool = bggweb_common::db::init_database(&db_path)
        .await
        .expect("Failed to initialize test database");
    (temp_dir, pool)
}

/// Pipeline settings with every wait removed
pub fn test_config(batch_size: usize) -> PipelineConfig {
    PipelineConfig {
        base_url: "http://127.0.0.1:9".to_string(),
        batch_size,
        batch_delay_ms: 0,
        request_interval_ms: 0,
        request_timeout_secs: 5,
        max_attempts: 2,
        backoff_base_ms: 1,
        rate_limit_wait_ms: 1,
        ..PipelineConfig::default()
    }
}

pub fn game_id(n: usize) -> String {
    format!("g{}", n)
}

pub fn top_entry(n: usize) -> TopEntry {
    TopEntry {
        bgg_id: game_id(n),
        title: format!("Game {:02}", n),
        game_type: GameType::BaseGame,
        avg_rating: Some(7.0),
        num_voters: Some(1000 + n as i64),
    }
}

pub fn collection_entry(n: usize, game_type: GameType) -> CollectionEntry {
    CollectionEntry {
        bgg_id: game_id(n),
        title: format!("Owned {:02}", n),
        game_type,
        avg_rating: Some(8.0),
        num_voters: Some(50),
    }
}

/// Details with a 2-player (playable) and 5-player (not playable) poll
pub fn detail(id: &str) -> GameDetail {
    GameDetail {
        bgg_id: id.to_string(),
        year: Some(2015),
        weight: Some(2.5),
        weight_votes: Some(120),
        bgg_rank: Some(42),
        categories: vec!["Card Game".to_string()],
        families: vec!["Strategy".to_string()],
        player_counts: vec![
            PlayerCountVotes {
                player_count: 2,
                best_votes: 60,
                rec_votes: 30,
                not_votes: 10,
            },
            PlayerCountVotes {
                player_count: 5,
                best_votes: 5,
                rec_votes: 15,
                not_votes: 80,
            },
        ],
    }
}

/// Scripted source; every request is recorded in `calls`
#[derive(Default)]
pub struct FakeSource {
    pub top_pages: Vec<Vec<TopEntry>>,
    /// Error returned for every Top-N page
    pub top_error: Option<fn() -> FetchError>,
    /// Cancel the job's token after serving the final Top-N page
    pub cancel_after_top: bool,
    pub collection_games: Vec<CollectionEntry>,
    pub collection_expansions: Vec<CollectionEntry>,
    /// Details served for any requested id not in `missing_ids`
    pub details_for_all: bool,
    pub missing_ids: HashSet<String>,
    /// 1-based detail request numbers that fail with a parse error
    pub failing_detail_calls: HashSet<usize>,
    /// Detail requests wait until cancelled
    pub hang_details: bool,
    pub(crate) detail_calls: AtomicUsize,
    pub(crate) calls: Mutex<Vec<String>>,
}

impl FakeSource {
    pub fn with_top(entries: Vec<TopEntry>) -> Self {
        Self {
            top_pages: vec![entries],
            details_for_all: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl GameSource for FakeSource {
    async fn fetch_top_page(
        &self,
        page: u32,
        ctx: &FetchContext,
    ) -> Result<Vec<TopEntry>, FetchError> {
        self.record(format!("top:{}", page));
        if let Some(make_error) = self.top_error {
            return Err(make_error());
        }
        let index = page as usize - 1;
        let rows = self.top_pages.get(index).cloned().unwrap_or_default();
        if self.cancel_after_top && index + 1 >= self.top_pages.len() {
            ctx.cancel.cancel();
        }
        Ok(rows)
    }

    async fn fetch_collection(
        &self,
        username: &str,
        subtype: CollectionSubtype,
        _ctx: &FetchContext,
    ) -> Result<Vec<CollectionEntry>, FetchError> {
        self.record(format!("collection:{}:{}", username, subtype.as_param()));
        Ok(match subtype {
            CollectionSubtype::BoardGame => self.collection_games.clone(),
            CollectionSubtype::Expansion => self.collection_expansions.clone(),
        })
    }

    async fn fetch_details(
        &self,
        ids: &[String],
        ctx: &FetchContext,
    ) -> Result<Vec<GameDetail>, FetchError> {
        let call = self.detail_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.record(format!("details:{}", ids.join(",")));

        if self.hang_details {
            ctx.cancel.cancelled().await;
            return Err(FetchError::Cancelled);
        }
        if self.failing_detail_calls.contains(&call) {
            return Err(FetchError::Parse("Cannot load more than 20 items".to_string()));
        }
        if !self.details_for_all {
            return Ok(Vec::new());
        }
        Ok(ids
            .iter()
            .filter(|id| !self.missing_ids.contains(*id))
            .map(|id| detail(id))
            .collect())
    }
}

/// Poll until the job is terminal (10s limit)
pub async fn wait_for_terminal(reporter: &ProgressReporter, job_id: Uuid) -> JobSnapshot {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let snapshot = reporter.snapshot(job_id).await.expect("job should exist");
        if snapshot.status.is_terminal() {
            return snapshot;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {} still {:?}",
            job_id,
            snapshot.status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll until the job reports `status`
pub async fn wait_for_status(reporter: &ProgressReporter, job_id: Uuid, status: JobStatus) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while reporter.snapshot(job_id).await.expect("job should exist").status != status {
        assert!(tokio::time::Instant::now() < deadline, "job never reached {:?}", status);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Collect a response body as JSON
pub async fn extract_json(response: Response<Body>) -> serde_json::Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

/// Map of `bgg_id → title` for every stored game
pub async fn stored_titles(pool: &SqlitePool) -> HashMap<String, String> {
    sqlx::query_as::<_, (String, String)>("SELECT bgg_id, title FROM games")
        .fetch_all(pool)
        .await
        .unwrap()
        .into_iter()
        .collect()
}

/// Wait until the runner has persisted its final state and released the slot
pub async fn wait_for_idle(registry: &JobRegistry) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !registry.is_empty().await {
        assert!(tokio::time::Instant::now() < deadline, "running slot never released");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

//! HTTP API integration tests
//!
//! Drives the full router with `tower::ServiceExt::oneshot` against a
//! scripted game source and a temporary database.

mod helpers;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use bggweb::models::JobStatus;
use bggweb::services::MAX_TOP_N;
use bggweb::{build_router, AppState};
use bggweb_common::config::TomlConfig;
use bggweb_common::events::EventBus;
use helpers::*;
use http_body_util::BodyExt;
use serde_json::json;
use sqlx::SqlitePool;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

async fn setup(source: FakeSource) -> (TempDir, SqlitePool, AppState, Router) {
    let (temp_dir, pool) = create_test_db().await;
    bggweb::db::settings::set_setting(&pool, "batch_delay_ms", 0)
        .await
        .unwrap();

    let state = AppState::new(
        pool.clone(),
        EventBus::new(100),
        Arc::new(source),
        Arc::new(TomlConfig::default()),
    );
    let app = build_router(state.clone());
    (temp_dir, pool, state, app)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn submit(app: &Router, body: serde_json::Value) -> Uuid {
    let response = app.clone().oneshot(post_json("/jobs", body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = extract_json(response).await;
    assert_eq!(json["status"], "pending");
    json["job_id"].as_str().unwrap().parse().unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let (_tmp, _pool, _state, app) = setup(FakeSource::default()).await;

    let response = app.oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = extract_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["module"], "bggweb");
    assert_eq!(json["running_jobs"], 0);
    assert_eq!(json["games"], 0);
}

#[tokio::test]
async fn test_index_page_is_served() {
    let (_tmp, _pool, _state, app) = setup(FakeSource::default()).await;

    let response = app.clone().oneshot(get("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(get("/static/app.js")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_collection_job_without_username_is_rejected() {
    let (_tmp, _pool, _state, app) = setup(FakeSource::default()).await;

    let response = app
        .clone()
        .oneshot(post_json("/jobs", json!({ "kind": "collection" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = extract_json(response).await;
    assert_eq!(json["error"]["code"], "BAD_REQUEST");

    let response = app
        .oneshot(post_json("/jobs", json!({ "kind": "top_n", "n": 0 })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_oversized_top_n_is_rejected_before_any_work() {
    let (_tmp, _pool, state, app) = setup(FakeSource::default()).await;

    for n in [u64::from(MAX_TOP_N) + 1, u64::from(u32::MAX)] {
        let response = app
            .clone()
            .oneshot(post_json("/jobs", json!({ "kind": "top_n", "n": n })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "n = {}", n);
        let json = extract_json(response).await;
        assert_eq!(json["error"]["code"], "BAD_REQUEST");
    }
    assert!(state.registry().is_empty().await);

    let response = app
        .clone()
        .oneshot(post_json("/jobs", json!({ "kind": "refresh", "n": u32::MAX })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.oneshot(get("/jobs")).await.unwrap();
    let json = extract_json(response).await;
    assert!(json["jobs"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let (_tmp, _pool, _state, app) = setup(FakeSource::default()).await;
    let id = Uuid::new_v4();

    let response = app.clone().oneshot(get(&format!("/jobs/{}", id))).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .oneshot(post(&format!("/jobs/{}/cancel", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_job_lifecycle_over_http() {
    let mut source = FakeSource::with_top((1..=3).map(top_entry).collect());
    source.hang_details = true;
    let (_tmp, _pool, state, app) = setup(source).await;

    let job_id = submit(&app, json!({ "kind": "top_n", "n": 3 })).await;
    wait_for_status(&state.reporter, job_id, JobStatus::Running).await;

    // Only one job at a time
    let response = app
        .clone()
        .oneshot(post_json("/jobs", json!({ "kind": "top_n", "n": 3 })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app.clone().oneshot(get(&format!("/jobs/{}", job_id))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = extract_json(response).await;
    assert_eq!(json["kind"], "top_n");
    assert_eq!(json["params"]["n"], 3);

    let response = app
        .clone()
        .oneshot(post(&format!("/jobs/{}/cancel", job_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let finished = wait_for_terminal(&state.reporter, job_id).await;
    assert_eq!(finished.status, JobStatus::Cancelled);

    let response = app
        .clone()
        .oneshot(post(&format!("/jobs/{}/cancel", job_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app.clone().oneshot(get("/jobs")).await.unwrap();
    let json = extract_json(response).await;
    assert_eq!(json["jobs"][0]["job_id"], job_id.to_string());
    assert_eq!(json["jobs"][0]["status"], "cancelled");
}

#[tokio::test]
async fn test_orphaned_job_can_be_cancelled() {
    let (_tmp, pool, _state, app) = setup(FakeSource::default()).await;

    let mut job = bggweb::models::FetchJob::new(
        bggweb::models::JobKind::TopN,
        bggweb::models::JobParams {
            n: Some(5),
            username: None,
            batch_size: 20,
        },
    );
    job.start().unwrap();
    bggweb::db::jobs::save_job(&pool, &job).await.unwrap();

    let response = app
        .oneshot(post(&format!("/jobs/{}/cancel", job.job_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = extract_json(response).await;
    assert_eq!(json["status"], "cancelled");

    let stored = bggweb::db::jobs::load_job(&pool, job.job_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, JobStatus::Cancelled);
}

#[tokio::test]
async fn test_browse_export_and_detail_after_job() {
    let (_tmp, _pool, state, app) =
        setup(FakeSource::with_top((1..=3).map(top_entry).collect())).await;

    let job_id = submit(&app, json!({ "kind": "top_n", "n": 3 })).await;
    let job = wait_for_terminal(&state.reporter, job_id).await;
    assert_eq!(job.status, JobStatus::Succeeded, "error: {:?}", job.error);

    // Default filters keep the playable 2-player row of each game
    let response = app.clone().oneshot(get("/games/rows")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = extract_json(response).await;
    assert_eq!(json["count"], 3);
    assert_eq!(json["rows"][0]["player_count"], 2);
    assert_eq!(json["sort"], "score_factor");

    let response = app
        .clone()
        .oneshot(get("/games/rows?playable=all&sort=title&dir=asc&page_size=2"))
        .await
        .unwrap();
    let json = extract_json(response).await;
    assert_eq!(json["count"], 6);
    assert_eq!(json["num_pages"], 3);
    assert_eq!(json["rows"][0]["title"], "Game 01");
    let strategy = json["pinned_families"]
        .as_array()
        .unwrap()
        .iter()
        .find(|f| f["name"] == "Strategy")
        .unwrap();
    assert_eq!(strategy["count"], 6);

    let response = app.clone().oneshot(get("/export.csv")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/csv"));
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.starts_with("Score Factor,Game Title,Game ID"));
    assert_eq!(text.lines().count(), 4);

    let response = app.clone().oneshot(get("/games/g2")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = extract_json(response).await;
    assert_eq!(json["title"], "Game 02");
    assert_eq!(json["recommendations"].as_array().unwrap().len(), 2);

    let response = app.clone().oneshot(get("/games/missing")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    wait_for_idle(state.registry()).await;
    let response = app.clone().oneshot(post("/jobs/clear")).await.unwrap();
    let json = extract_json(response).await;
    assert_eq!(json["deleted"], 1);
    let response = app.oneshot(get("/jobs")).await.unwrap();
    let json = extract_json(response).await;
    assert!(json["jobs"].as_array().unwrap().is_empty());
}

//! bggweb library
//!
//! Board-game catalog service: a background fetch pipeline
//! (Top-N → Collection → Details → Apply) feeding a SQLite catalog that the
//! HTTP API filters, pages and exports.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod filter;
pub mod models;
pub mod pagination;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use bggweb_common::config::TomlConfig;
use bggweb_common::events::EventBus;
use chrono::{DateTime, Utc};
use services::{GameSource, JobRegistry, JobRunner, ProgressReporter};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    /// Job lifecycle events for SSE clients
    pub event_bus: EventBus,
    pub runner: JobRunner,
    pub reporter: ProgressReporter,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        source: Arc<dyn GameSource>,
        toml_config: Arc<TomlConfig>,
    ) -> Self {
        let registry = JobRegistry::new();
        let runner = JobRunner::new(
            db.clone(),
            source,
            registry.clone(),
            event_bus.clone(),
            toml_config,
        );
        let reporter = ProgressReporter::new(db.clone(), registry);
        Self {
            db,
            event_bus,
            runner,
            reporter,
            startup_time: Utc::now(),
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        self.runner.registry()
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::ui_routes())
        .merge(api::job_routes())
        .merge(api::game_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

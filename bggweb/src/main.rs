//! bggweb - board-game catalog service
//!
//! Fetches ranked lists, collections and game details from the remote site on
//! background jobs and serves the stored catalog over HTTP.

use anyhow::{Context, Result};
use bggweb::config::PipelineConfig;
use bggweb::db::jobs;
use bggweb::services::{BggClient, Watchdog};
use bggweb::{build_router, AppState};
use bggweb_common::config::{database_path, resolve_root_folder, TomlConfig, ROOT_FOLDER_ENV};
use bggweb_common::db::init_database;
use bggweb_common::events::EventBus;
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8000;

/// Event bus capacity for SSE fan-out
const EVENT_BUS_CAPACITY: usize = 1000;

#[derive(Parser, Debug)]
#[command(name = "bggweb", version, about = "Board-game catalog service")]
struct Args {
    /// Root folder holding the database
    #[arg(long, env = "BGGWEB_ROOT_FOLDER")]
    root_folder: Option<String>,

    /// Listen address
    #[arg(long, env = "BGGWEB_HOST")]
    host: Option<String>,

    /// Listen port
    #[arg(long, env = "BGGWEB_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!(
        "Starting bggweb v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let args = Args::parse();

    let toml_config = match TomlConfig::load() {
        Ok(config) => config,
        Err(e) => {
            warn!("Ignoring unreadable config file: {}", e);
            TomlConfig::default()
        }
    };

    let root_folder = resolve_root_folder(args.root_folder.as_deref(), ROOT_FOLDER_ENV, &toml_config);
    let db_path = database_path(&root_folder);
    info!("Database path: {}", db_path.display());

    let pool = init_database(&db_path)
        .await
        .with_context(|| format!("Failed to open database at {}", db_path.display()))?;

    let interrupted = jobs::fail_interrupted(&pool).await?;
    if interrupted > 0 {
        warn!(interrupted, "Marked jobs from a previous run as failed");
    }

    let pipeline = PipelineConfig::resolve(&pool, &toml_config).await?;
    info!(
        base_url = %pipeline.base_url,
        batch_size = pipeline.batch_size,
        max_failed_batches = pipeline.max_failed_batches,
        "Pipeline configuration resolved"
    );
    let client = BggClient::new(&pipeline).context("Failed to build HTTP client")?;

    let state = AppState::new(
        pool,
        EventBus::new(EVENT_BUS_CAPACITY),
        Arc::new(client),
        Arc::new(toml_config.clone()),
    );

    Watchdog::from_config(state.registry().clone(), &pipeline).spawn();

    let host = args
        .host
        .or(toml_config.server.host.clone())
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = args.port.or(toml_config.server.port).unwrap_or(DEFAULT_PORT);
    let addr = format!("{}:{}", host, port);

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("bggweb listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

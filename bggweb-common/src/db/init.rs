//! Database initialization
//!
//! Opens (or creates) the SQLite file and creates every table idempotently.
//! Connection pragmas are applied per connection through
//! [`SqliteConnectOptions`] so each pooled connection gets them.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Busy timeout applied to every connection
pub const BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create all tables and indexes (safe to call repeatedly)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS settings (
        key TEXT PRIMARY KEY,
        value TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS games (
        bgg_id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        game_type TEXT NOT NULL CHECK (game_type IN ('Base Game', 'Expansion')),
        year INTEGER,
        avg_rating REAL,
        num_voters INTEGER,
        weight REAL,
        weight_votes INTEGER,
        bgg_rank INTEGER,
        owned INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS categories (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS families (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS game_categories (
        bgg_id TEXT NOT NULL REFERENCES games(bgg_id) ON DELETE CASCADE,
        category_id INTEGER NOT NULL REFERENCES categories(id) ON DELETE CASCADE,
        PRIMARY KEY (bgg_id, category_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS game_families (
        bgg_id TEXT NOT NULL REFERENCES games(bgg_id) ON DELETE CASCADE,
        family_id INTEGER NOT NULL REFERENCES families(id) ON DELETE CASCADE,
        PRIMARY KEY (bgg_id, family_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS player_count_recommendations (
        bgg_id TEXT NOT NULL REFERENCES games(bgg_id) ON DELETE CASCADE,
        player_count INTEGER NOT NULL,
        best_pct REAL NOT NULL DEFAULT 0,
        best_votes INTEGER NOT NULL DEFAULT 0,
        rec_pct REAL NOT NULL DEFAULT 0,
        rec_votes INTEGER NOT NULL DEFAULT 0,
        not_pct REAL NOT NULL DEFAULT 0,
        not_votes INTEGER NOT NULL DEFAULT 0,
        vote_count INTEGER NOT NULL DEFAULT 0,
        score REAL NOT NULL DEFAULT 0,
        PRIMARY KEY (bgg_id, player_count)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS collections (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT NOT NULL UNIQUE,
        created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS owned_games (
        collection_id INTEGER NOT NULL REFERENCES collections(id) ON DELETE CASCADE,
        bgg_id TEXT NOT NULL REFERENCES games(bgg_id) ON DELETE CASCADE,
        PRIMARY KEY (collection_id, bgg_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS fetch_jobs (
        job_id TEXT PRIMARY KEY,
        kind TEXT NOT NULL,
        params TEXT NOT NULL,
        status TEXT NOT NULL,
        current_phase TEXT,
        phases TEXT NOT NULL,
        batch_size INTEGER NOT NULL,
        error TEXT,
        incomplete_ids TEXT NOT NULL DEFAULT '[]',
        games_applied INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        started_at TEXT,
        finished_at TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_fetch_jobs_created ON fetch_jobs(created_at)",
    "CREATE INDEX IF NOT EXISTS idx_fetch_jobs_status ON fetch_jobs(status)",
    "CREATE INDEX IF NOT EXISTS idx_pcr_game ON player_count_recommendations(bgg_id)",
];

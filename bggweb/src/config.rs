//! Pipeline configuration
//!
//! Every key resolves independently: database `settings` row, then
//! `BGGWEB_<KEY>` environment variable, then the TOML `[pipeline]` table,
//! then the compiled default. Invalid values at one tier are logged and the
//! next tier is tried.
//!
//! Jobs resolve the whole set at submit time. The HTTP transport
//! (`base_url`, `request_timeout_secs`, `request_interval_ms`) and the
//! watchdog keys are read once at startup; changing them needs a restart.

use bggweb_common::config::TomlConfig;
use bggweb_common::Result;
use sqlx::{Pool, Sqlite};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Largest id count the thing endpoint accepts per request
pub const MAX_BATCH_SIZE: usize = 20;

/// Upper bound for the 429 wait
pub const RATE_LIMIT_WAIT_CAP_MS: u64 = 60_000;

/// Resolved settings for the fetcher and job runner
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub base_url: String,
    pub batch_size: usize,
    pub batch_delay_ms: u64,
    pub request_interval_ms: u64,
    pub request_timeout_secs: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub rate_limit_wait_ms: u64,
    pub max_failed_batches: usize,
    pub split_failed_batches: bool,
    pub collection_queue_attempts: u32,
    pub watchdog_stall_secs: u64,
    pub watchdog_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_url: "https://boardgamegeek.com".to_string(),
            batch_size: MAX_BATCH_SIZE,
            batch_delay_ms: 1000,
            request_interval_ms: 1000,
            request_timeout_secs: 60,
            max_attempts: 5,
            backoff_base_ms: 2000,
            rate_limit_wait_ms: 10_000,
            max_failed_batches: 3,
            split_failed_batches: true,
            collection_queue_attempts: 20,
            watchdog_stall_secs: 900,
            watchdog_interval_secs: 30,
        }
    }
}

/// Raw values from the non-default tiers
struct Sources<'a> {
    db: &'a HashMap<String, String>,
    toml: &'a TomlConfig,
}

impl Sources<'_> {
    fn resolve<T>(&self, key: &str, default: T) -> T
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let env_key = format!("BGGWEB_{}", key.to_ascii_uppercase());
        let candidates = [
            ("database", self.db.get(key).cloned()),
            ("environment", std::env::var(&env_key).ok()),
            ("TOML", self.toml.pipeline_value(key)),
        ];

        for (tier, raw) in candidates {
            let Some(raw) = raw else { continue };
            match raw.trim().parse::<T>() {
                Ok(value) => return value,
                Err(e) => warn!(key, tier, value = %raw, "Ignoring invalid pipeline setting: {}", e),
            }
        }
        default
    }
}

impl PipelineConfig {
    /// Resolve from database, environment and TOML
    pub async fn resolve(db: &Pool<Sqlite>, toml: &TomlConfig) -> Result<Self> {
        let settings = crate::db::settings::load_all(db).await?;
        Ok(Self::from_sources(&settings, toml))
    }

    /// Resolve from already-loaded database settings
    pub fn from_sources(db_settings: &HashMap<String, String>, toml: &TomlConfig) -> Self {
        let d = Self::default();
        let s = Sources {
            db: db_settings,
            toml,
        };

        Self {
            base_url: s
                .resolve("base_url", d.base_url)
                .trim_end_matches('/')
                .to_string(),
            batch_size: clamp_batch_size(s.resolve("batch_size", d.batch_size)),
            batch_delay_ms: s.resolve("batch_delay_ms", d.batch_delay_ms),
            request_interval_ms: s.resolve("request_interval_ms", d.request_interval_ms),
            request_timeout_secs: s.resolve("request_timeout_secs", d.request_timeout_secs).max(1),
            max_attempts: s.resolve("max_attempts", d.max_attempts).max(1),
            backoff_base_ms: s.resolve("backoff_base_ms", d.backoff_base_ms),
            rate_limit_wait_ms: s
                .resolve("rate_limit_wait_ms", d.rate_limit_wait_ms)
                .min(RATE_LIMIT_WAIT_CAP_MS),
            max_failed_batches: s.resolve("max_failed_batches", d.max_failed_batches),
            split_failed_batches: s.resolve("split_failed_batches", d.split_failed_batches),
            collection_queue_attempts: s
                .resolve("collection_queue_attempts", d.collection_queue_attempts)
                .max(1),
            watchdog_stall_secs: s.resolve("watchdog_stall_secs", d.watchdog_stall_secs).max(1),
            watchdog_interval_secs: s
                .resolve("watchdog_interval_secs", d.watchdog_interval_secs)
                .max(1),
        }
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Retry settings a job carries into every fetch
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            backoff_base_ms: self.backoff_base_ms,
            rate_limit_wait_ms: self.rate_limit_wait_ms.min(RATE_LIMIT_WAIT_CAP_MS),
            collection_queue_attempts: self.collection_queue_attempts.max(1),
        }
    }
}

/// Per-job retry bounds for remote requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub rate_limit_wait_ms: u64,
    pub collection_queue_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        PipelineConfig::default().retry_policy()
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (1-based) after a network error
    pub fn network_backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.backoff_base_ms.saturating_mul(factor))
    }

    /// Wait before retry number `attempt` (1-based) after HTTP 429
    pub fn rate_limit_backoff(&self, attempt: u32) -> Duration {
        let wait = self
            .rate_limit_wait_ms
            .saturating_mul(attempt as u64)
            .min(RATE_LIMIT_WAIT_CAP_MS);
        Duration::from_millis(wait)
    }
}

/// Keep a batch size within `1..=MAX_BATCH_SIZE`
pub fn clamp_batch_size(size: usize) -> usize {
    size.clamp(1, MAX_BATCH_SIZE)
}

//! BoardGameGeek HTTP client
//!
//! Requests are paced by a `governor` limiter (one per `request_interval_ms`)
//! and retried with backoff:
//! - HTTP 429: `rate_limit_wait_ms × attempt`, capped at 60s
//! - connection errors, timeouts, other non-success statuses:
//!   `backoff_base_ms × 2^(attempt-1)`
//!
//! Both bounded by `max_attempts`. Parse failures are never retried. Every
//! wait is raced against the job's cancellation token. Retry bounds come from
//! the calling job's [`FetchContext`]; the transport settings are fixed when
//! the client is built.

use super::game_source::{FetchContext, GameSource};
use super::parsing;
use crate::config::PipelineConfig;
use crate::error::FetchError;
use crate::models::records::{CollectionEntry, CollectionSubtype, GameDetail, TopEntry};
use crate::utils::cancellable_sleep;
use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use reqwest::{StatusCode, Url};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const USER_AGENT: &str = concat!("bggweb/", env!("CARGO_PKG_VERSION"), " (+https://example.local)");

/// Wait step while a collection request is queued (HTTP 202)
const QUEUE_WAIT_STEP: Duration = Duration::from_secs(5);
const QUEUE_WAIT_CAP: Duration = Duration::from_secs(30);

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

pub struct BggClient {
    http: reqwest::Client,
    base_url: String,
    limiter: Option<DirectLimiter>,
    queue_wait_step: Duration,
}

impl BggClient {
    pub fn new(config: &PipelineConfig) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| FetchError::Network(format!("failed to build HTTP client: {}", e)))?;

        let limiter = Quota::with_period(Duration::from_millis(config.request_interval_ms))
            .map(RateLimiter::direct);

        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            limiter,
            queue_wait_step: QUEUE_WAIT_STEP,
        })
    }

    /// Override the 202 queue wait step
    pub fn with_queue_wait_step(mut self, step: Duration) -> Self {
        self.queue_wait_step = step;
        self
    }

    pub fn top_page_url(&self, page: u32) -> String {
        format!(
            "{}/search/boardgame/page/{}?sort=rank&advsearch=1&q=\
             &range%5Bnumvoters%5D%5Bmin%5D=50&playerrangetype=normal&B1=Submit&sortdir=asc",
            self.base_url, page
        )
    }

    pub fn collection_url(
        &self,
        username: &str,
        subtype: CollectionSubtype,
    ) -> Result<Url, FetchError> {
        Url::parse_with_params(
            &format!("{}/xmlapi2/collection", self.base_url),
            &[
                ("username", username),
                ("own", "1"),
                ("stats", "1"),
                ("subtype", subtype.as_param()),
            ],
        )
        .map_err(|e| FetchError::Parse(format!("invalid collection URL: {}", e)))
    }

    pub fn thing_url(&self, ids: &[String]) -> String {
        format!("{}/xmlapi2/thing?id={}&stats=1", self.base_url, ids.join(","))
    }

    /// One request, classified
    async fn send_once(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<(StatusCode, String), FetchError> {
        if let Some(limiter) = &self.limiter {
            tokio::select! {
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                _ = limiter.until_ready() => {}
            }
        }

        let request = async {
            let response = self.http.get(url).send().await?;
            let status = response.status();
            let body = response.text().await?;
            Ok::<_, reqwest::Error>((status, body))
        };

        let (status, body) = tokio::select! {
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            result = request => result?,
        };

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::RateLimited);
        }
        // BGG answers 400 with a plain-text body when a batch holds too many ids;
        // pass it on so the parser reports it.
        if status == StatusCode::BAD_REQUEST
            && body.to_ascii_lowercase().contains("cannot load more than")
        {
            return Ok((status, body));
        }
        if !status.is_success() {
            return Err(FetchError::Network(format!("HTTP {} from {}", status, url)));
        }
        Ok((status, body))
    }

    /// Request with bounded retry for network and rate-limit failures
    async fn get_with_retry(
        &self,
        url: &str,
        ctx: &FetchContext,
    ) -> Result<(StatusCode, String), FetchError> {
        let policy = &ctx.retry;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            debug!(url, attempt, "GET");
            let err = match self.send_once(url, &ctx.cancel).await {
                Ok(ok) => return Ok(ok),
                Err(err) if err.is_retryable() => err,
                Err(err) => return Err(err),
            };

            if attempt >= policy.max_attempts {
                warn!(url, attempt, error = %err, "Giving up after retries");
                return Err(err);
            }

            let wait = match err {
                FetchError::RateLimited => policy.rate_limit_backoff(attempt),
                _ => policy.network_backoff(attempt),
            };
            warn!(url, attempt, wait_ms = wait.as_millis() as u64, error = %err, "Request failed, retrying");
            if !cancellable_sleep(wait, &ctx.cancel).await {
                return Err(FetchError::Cancelled);
            }
        }
    }
}

#[async_trait]
impl GameSource for BggClient {
    async fn fetch_top_page(
        &self,
        page: u32,
        ctx: &FetchContext,
    ) -> Result<Vec<TopEntry>, FetchError> {
        let (_, body) = self.get_with_retry(&self.top_page_url(page), ctx).await?;
        parsing::parse_top_page(&body)
    }

    async fn fetch_collection(
        &self,
        username: &str,
        subtype: CollectionSubtype,
        ctx: &FetchContext,
    ) -> Result<Vec<CollectionEntry>, FetchError> {
        let url = self.collection_url(username, subtype)?;
        let mut queued = 0u32;
        loop {
            let (status, body) = self.get_with_retry(url.as_str(), ctx).await?;
            if status != StatusCode::ACCEPTED {
                return parsing::parse_collection(&body, subtype);
            }

            queued += 1;
            if queued >= ctx.retry.collection_queue_attempts {
                return Err(FetchError::Network(format!(
                    "collection for {} still queued after {} attempts",
                    username, queued
                )));
            }
            let wait = (self.queue_wait_step * queued).min(QUEUE_WAIT_CAP);
            info!(username, subtype = subtype.as_param(), wait_ms = wait.as_millis() as u64, "Collection queued, waiting");
            if !cancellable_sleep(wait, &ctx.cancel).await {
                return Err(FetchError::Cancelled);
            }
        }
    }

    async fn fetch_details(
        &self,
        ids: &[String],
        ctx: &FetchContext,
    ) -> Result<Vec<GameDetail>, FetchError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let (_, body) = self.get_with_retry(&self.thing_url(ids), ctx).await?;
        parsing::parse_things(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> BggClient {
        BggClient::new(&PipelineConfig {
            base_url: "http://bgg.test".into(),
            ..PipelineConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn thing_url_joins_ids_with_commas() {
        let url = client().thing_url(&["1".into(), "22".into(), "333".into()]);
        assert_eq!(url, "http://bgg.test/xmlapi2/thing?id=1,22,333&stats=1");
    }

    #[test]
    fn collection_url_encodes_username() {
        let url = client()
            .collection_url("jane doe&co", CollectionSubtype::Expansion)
            .unwrap();
        let query = url.query().unwrap();
        assert!(query.contains("username=jane+doe%26co"));
        assert!(query.contains("own=1"));
        assert!(query.contains("subtype=boardgameexpansion"));
    }

    #[test]
    fn top_page_url_is_ranked_search() {
        let url = client().top_page_url(3);
        assert!(url.starts_with("http://bgg.test/search/boardgame/page/3?sort=rank"));
        assert!(url.contains("sortdir=asc"));
    }

    #[test]
    fn zero_interval_disables_pacing() {
        let client = BggClient::new(&PipelineConfig {
            request_interval_ms: 0,
            ..PipelineConfig::default()
        })
        .unwrap();
        assert!(client.limiter.is_none());
    }
}

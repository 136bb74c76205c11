//! Fetcher contract
//!
//! The job runner only talks to a [`GameSource`]; [`BggClient`](super::BggClient)
//! is the production implementation.

use crate::config::RetryPolicy;
use crate::error::FetchError;
use crate::models::records::{CollectionEntry, CollectionSubtype, GameDetail, TopEntry};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// What one job hands to every fetch: its cancellation token and retry bounds
#[derive(Debug, Clone, Default)]
pub struct FetchContext {
    pub cancel: CancellationToken,
    pub retry: RetryPolicy,
}

impl FetchContext {
    pub fn new(cancel: CancellationToken, retry: RetryPolicy) -> Self {
        Self { cancel, retry }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[async_trait]
pub trait GameSource: Send + Sync {
    /// One page (1-based) of the ranked list; empty when past the end
    async fn fetch_top_page(&self, page: u32, ctx: &FetchContext)
        -> Result<Vec<TopEntry>, FetchError>;

    /// Owned items of `username` for one subtype
    async fn fetch_collection(
        &self,
        username: &str,
        subtype: CollectionSubtype,
        ctx: &FetchContext,
    ) -> Result<Vec<CollectionEntry>, FetchError>;

    /// Details for up to one batch of ids in a single request
    ///
    /// Ids absent from the result are treated as incomplete by the caller.
    async fn fetch_details(
        &self,
        ids: &[String],
        ctx: &FetchContext,
    ) -> Result<Vec<GameDetail>, FetchError>;
}

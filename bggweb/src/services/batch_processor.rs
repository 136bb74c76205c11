//! Batched detail fetching
//!
//! Ids are cut into contiguous batches of at most `batch_size` (the last may
//! be shorter) and each batch is one request. A failed batch counts its items
//! as processed so progress stays monotonic; its items are re-fetched one by
//! one when `split_failed_batches` is on, and whatever still fails is flagged
//! incomplete. The phase fails once failed batches exceed
//! `max_failed_batches`.

use super::game_source::{FetchContext, GameSource};
use crate::config::{clamp_batch_size, PipelineConfig};
use crate::error::{FetchError, JobError};
use crate::models::records::GameDetail;
use crate::utils::cancellable_sleep;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, warn};

/// Lazy sequence of `⌈len / size⌉` contiguous batches
pub fn batches<T>(items: &[T], size: usize) -> std::slice::Chunks<'_, T> {
    items.chunks(size.max(1))
}

pub fn batch_count(items: usize, size: usize) -> usize {
    items.div_ceil(size.max(1))
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchSettings {
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub max_failed_batches: usize,
    pub split_failed_batches: bool,
}

impl From<&PipelineConfig> for BatchSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            batch_size: clamp_batch_size(config.batch_size),
            batch_delay: config.batch_delay(),
            max_failed_batches: config.max_failed_batches,
            split_failed_batches: config.split_failed_batches,
        }
    }
}

/// Counters reported after every batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchProgress {
    pub processed: u64,
    pub total: u64,
    pub incomplete: u64,
    pub failed_batches: usize,
}

#[derive(Debug, Default)]
pub struct DetailsOutcome {
    pub details: HashMap<String, GameDetail>,
    /// Ids without details, in request order
    pub incomplete: Vec<String>,
    pub failed_batches: usize,
    flagged: HashSet<String>,
}

impl DetailsOutcome {
    fn absorb(&mut self, requested: &[String], fetched: Vec<GameDetail>) {
        let wanted: HashSet<&str> = requested.iter().map(String::as_str).collect();
        for detail in fetched {
            if wanted.contains(detail.bgg_id.as_str()) {
                self.details.insert(detail.bgg_id.clone(), detail);
            }
        }
        for id in requested {
            if !self.details.contains_key(id) && self.flagged.insert(id.clone()) {
                self.incomplete.push(id.clone());
            }
        }
    }
}

pub struct BatchProcessor<'a> {
    source: &'a dyn GameSource,
    settings: BatchSettings,
    ctx: &'a FetchContext,
}

impl<'a> BatchProcessor<'a> {
    pub fn new(
        source: &'a dyn GameSource,
        settings: BatchSettings,
        ctx: &'a FetchContext,
    ) -> Self {
        Self {
            source,
            settings,
            ctx,
        }
    }

    async fn pause(&self) -> Result<(), JobError> {
        if cancellable_sleep(self.settings.batch_delay, &self.ctx.cancel).await {
            Ok(())
        } else {
            Err(JobError::Cancelled)
        }
    }

    /// Fetch details for every id, reporting progress after each batch
    pub async fn run<F>(&self, ids: &[String], mut on_progress: F) -> Result<DetailsOutcome, JobError>
    where
        F: FnMut(BatchProgress),
    {
        let total = ids.len() as u64;
        let mut outcome = DetailsOutcome::default();
        let mut processed = 0u64;

        for (index, batch) in batches(ids, self.settings.batch_size).enumerate() {
            if self.ctx.is_cancelled() {
                return Err(JobError::Cancelled);
            }
            if index > 0 {
                self.pause().await?;
            }

            match self.source.fetch_details(batch, self.ctx).await {
                Ok(fetched) => {
                    debug!(batch = index + 1, size = batch.len(), "Batch fetched");
                    outcome.absorb(batch, fetched);
                }
                Err(FetchError::Cancelled) => return Err(JobError::Cancelled),
                Err(err) => {
                    outcome.failed_batches += 1;
                    warn!(
                        batch = index + 1,
                        size = batch.len(),
                        failed_batches = outcome.failed_batches,
                        error = %err,
                        "Batch failed"
                    );
                    if outcome.failed_batches > self.settings.max_failed_batches {
                        return Err(JobError::BatchThreshold {
                            failed: outcome.failed_batches,
                            limit: self.settings.max_failed_batches,
                        });
                    }
                    if self.settings.split_failed_batches && batch.len() > 1 {
                        self.refetch_singly(batch, &mut outcome).await?;
                    } else {
                        outcome.absorb(batch, Vec::new());
                    }
                }
            }

            processed += batch.len() as u64;
            on_progress(BatchProgress {
                processed,
                total,
                incomplete: outcome.incomplete.len() as u64,
                failed_batches: outcome.failed_batches,
            });
        }

        Ok(outcome)
    }

    async fn refetch_singly(
        &self,
        batch: &[String],
        outcome: &mut DetailsOutcome,
    ) -> Result<(), JobError> {
        for id in batch {
            self.pause().await?;
            let single = std::slice::from_ref(id);
            match self.source.fetch_details(single, self.ctx).await {
                Ok(fetched) => outcome.absorb(single, fetched),
                Err(FetchError::Cancelled) => return Err(JobError::Cancelled),
                Err(err) => {
                    debug!(bgg_id = %id, error = %err, "Single-item refetch failed");
                    outcome.absorb(single, Vec::new());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::records::{CollectionEntry, CollectionSubtype, TopEntry};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Fails any request containing one of `poison` ids; omits `missing` ids
    struct ScriptedSource {
        poison: HashSet<String>,
        missing: HashSet<String>,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedSource {
        fn new(poison: &[&str], missing: &[&str]) -> Self {
            Self {
                poison: poison.iter().map(|s| s.to_string()).collect(),
                missing: missing.iter().map(|s| s.to_string()).collect(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl GameSource for ScriptedSource {
        async fn fetch_top_page(
            &self,
            _page: u32,
            _ctx: &FetchContext,
        ) -> Result<Vec<TopEntry>, FetchError> {
            Ok(Vec::new())
        }

        async fn fetch_collection(
            &self,
            _username: &str,
            _subtype: CollectionSubtype,
            _ctx: &FetchContext,
        ) -> Result<Vec<CollectionEntry>, FetchError> {
            Ok(Vec::new())
        }

        async fn fetch_details(
            &self,
            ids: &[String],
            _ctx: &FetchContext,
        ) -> Result<Vec<GameDetail>, FetchError> {
            self.calls.lock().unwrap().push(ids.to_vec());
            if ids.iter().any(|id| self.poison.contains(id)) {
                return Err(FetchError::Parse("unexpected body".into()));
            }
            Ok(ids
                .iter()
                .filter(|id| !self.missing.contains(*id))
                .map(|id| GameDetail {
                    bgg_id: id.clone(),
                    ..GameDetail::default()
                })
                .collect())
        }
    }

    fn ids(n: usize) -> Vec<String> {
        (1..=n).map(|i| i.to_string()).collect()
    }

    fn settings(batch_size: usize, max_failed: usize, split: bool) -> BatchSettings {
        BatchSettings {
            batch_size,
            batch_delay: Duration::ZERO,
            max_failed_batches: max_failed,
            split_failed_batches: split,
        }
    }

    #[test]
    fn batches_cover_every_item_exactly_once() {
        for n in 0..=45usize {
            for b in 1..=12usize {
                let items: Vec<usize> = (0..n).collect();
                let produced: Vec<&[usize]> = batches(&items, b).collect();
                assert_eq!(produced.len(), batch_count(n, b), "n={n} b={b}");
                assert!(produced.iter().all(|c| !c.is_empty() && c.len() <= b));
                let flat: Vec<usize> = produced.concat();
                assert_eq!(flat, items);
            }
        }
    }

    #[test]
    fn zero_batch_size_treated_as_one() {
        let items = [1, 2, 3];
        assert_eq!(batches(&items, 0).count(), 3);
        assert_eq!(batch_count(3, 0), 3);
    }

    #[tokio::test]
    async fn one_request_per_batch() {
        let source = ScriptedSource::new(&[], &[]);
        let ctx = FetchContext::default();
        let processor = BatchProcessor::new(&source, settings(10, 3, true), &ctx);

        let mut reports = Vec::new();
        let outcome = processor.run(&ids(50), |p| reports.push(p)).await.unwrap();

        assert_eq!(source.calls.lock().unwrap().len(), 5);
        assert_eq!(outcome.details.len(), 50);
        assert!(outcome.incomplete.is_empty());
        let processed: Vec<u64> = reports.iter().map(|p| p.processed).collect();
        assert_eq!(processed, vec![10, 20, 30, 40, 50]);
    }

    #[tokio::test]
    async fn failed_batch_without_split_flags_whole_batch() {
        // batch 3 holds ids 21..=30
        let source = ScriptedSource::new(&["25"], &[]);
        let ctx = FetchContext::default();
        let processor = BatchProcessor::new(&source, settings(10, 3, false), &ctx);

        let mut last = None;
        let outcome = processor.run(&ids(50), |p| last = Some(p)).await.unwrap();

        assert_eq!(outcome.failed_batches, 1);
        assert_eq!(outcome.details.len(), 40);
        assert_eq!(outcome.incomplete, ids(30)[20..].to_vec());
        let last = last.unwrap();
        assert_eq!(last.processed, 50);
        assert_eq!(last.incomplete, 10);
    }

    #[tokio::test]
    async fn split_recovers_healthy_items_of_failed_batch() {
        let source = ScriptedSource::new(&["25"], &[]);
        let ctx = FetchContext::default();
        let processor = BatchProcessor::new(&source, settings(10, 3, true), &ctx);

        let outcome = processor.run(&ids(50), |_| {}).await.unwrap();

        assert_eq!(outcome.failed_batches, 1);
        assert_eq!(outcome.details.len(), 49);
        assert_eq!(outcome.incomplete, vec!["25".to_string()]);
        // 5 batch requests + 10 single refetches
        assert_eq!(source.calls.lock().unwrap().len(), 15);
    }

    #[tokio::test]
    async fn missing_items_are_incomplete_not_failed_batches() {
        let source = ScriptedSource::new(&[], &["3", "7"]);
        let ctx = FetchContext::default();
        let processor = BatchProcessor::new(&source, settings(5, 0, true), &ctx);

        let outcome = processor.run(&ids(10), |_| {}).await.unwrap();
        assert_eq!(outcome.failed_batches, 0);
        assert_eq!(outcome.incomplete, vec!["3".to_string(), "7".to_string()]);
    }

    #[tokio::test]
    async fn exceeding_threshold_is_fatal() {
        let source = ScriptedSource::new(&["1", "11", "21"], &[]);
        let ctx = FetchContext::default();
        let processor = BatchProcessor::new(&source, settings(10, 2, false), &ctx);

        let err = processor.run(&ids(40), |_| {}).await.unwrap_err();
        assert!(matches!(err, JobError::BatchThreshold { failed: 3, limit: 2 }));
        // fourth batch never requested
        assert_eq!(source.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn cancellation_stops_before_next_batch() {
        let source = ScriptedSource::new(&[], &[]);
        let ctx = FetchContext::default();
        let processor = BatchProcessor::new(&source, settings(10, 3, true), &ctx);

        let err = processor
            .run(&ids(30), |p| {
                if p.processed == 10 {
                    ctx.cancel.cancel();
                }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, JobError::Cancelled));
        assert_eq!(source.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn incomplete_ids_are_flagged_once_in_request_order() {
        let mut outcome = DetailsOutcome::default();
        outcome.absorb(&ids(3), Vec::new());
        outcome.absorb(&["2".to_string(), "4".to_string()], Vec::new());
        outcome.absorb(
            &["5".to_string(), "1".to_string()],
            vec![GameDetail {
                bgg_id: "5".into(),
                ..GameDetail::default()
            }],
        );

        assert_eq!(outcome.incomplete, ids(4));
        assert_eq!(outcome.details.len(), 1);
    }

    #[tokio::test]
    async fn empty_input_makes_no_requests() {
        let source = ScriptedSource::new(&[], &[]);
        let ctx = FetchContext::default();
        let processor = BatchProcessor::new(&source, settings(10, 3, true), &ctx);

        let outcome = processor.run(&[], |_| panic!("no progress expected")).await.unwrap();
        assert!(outcome.details.is_empty());
        assert!(source.calls.lock().unwrap().is_empty());
    }
}

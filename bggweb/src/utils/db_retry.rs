//! Lock-contention retry for job-row writes
//!
//! Job rows are written while the apply transaction may hold the SQLite write
//! lock, so a save can see "database is locked". Such writes are retried with
//! a doubling delay until a total wait budget is spent; any other error is
//! returned as-is.

use bggweb_common::{Error, Result};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Budget used for job-row saves
pub const DEFAULT_MAX_LOCK_WAIT_MS: u64 = 5000;

const FIRST_DELAY: Duration = Duration::from_millis(10);
const MAX_DELAY: Duration = Duration::from_secs(1);

/// Delay schedule and wait budget for one write
#[derive(Debug, Clone, Copy)]
struct LockRetry {
    budget: Duration,
    delay: Duration,
    attempts: u32,
}

impl LockRetry {
    fn new(budget: Duration) -> Self {
        Self {
            budget,
            delay: FIRST_DELAY,
            attempts: 0,
        }
    }

    /// Delay before the next attempt, or `None` once the budget is spent
    fn next_delay(&mut self, waited: Duration) -> Option<Duration> {
        if waited >= self.budget {
            return None;
        }
        let delay = self.delay;
        self.delay = (self.delay * 2).min(MAX_DELAY);
        Some(delay)
    }
}

/// Run `write` until it succeeds, fails with a non-lock error, or the
/// `max_wait_ms` budget runs out
pub async fn retry_on_lock<F, Fut, T>(what: &str, max_wait_ms: u64, mut write: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let mut retry = LockRetry::new(Duration::from_millis(max_wait_ms));

    loop {
        retry.attempts += 1;
        let err = match write().await {
            Ok(value) => {
                if retry.attempts > 1 {
                    debug!(what, attempts = retry.attempts, "Write went through after lock retries");
                }
                return Ok(value);
            }
            Err(err) if err.is_lock_error() => err,
            Err(err) => return Err(err),
        };

        let waited = started.elapsed();
        let Some(delay) = retry.next_delay(waited) else {
            error!(what, attempts = retry.attempts, waited_ms = waited.as_millis() as u64, "Giving up on locked database");
            return Err(Error::Internal(format!(
                "Database locked during {} ({} attempts over {} ms): {}",
                what,
                retry.attempts,
                waited.as_millis(),
                err
            )));
        };

        warn!(what, attempt = retry.attempts, delay_ms = delay.as_millis() as u64, "Database locked, retrying");
        tokio::time::sleep(delay).await;
    }
}

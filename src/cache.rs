//! Read-through request cache with rate-limit-aware retry.
//!
//! Every upstream call goes through [`RequestCache::get_or_fetch`]. It handles:
//! 1. Returning already-fetched data without touching the network.
//! 2. Storing successful responses permanently (merged pull requests are
//!    immutable, so entries never expire and are never evicted).
//! 3. Waiting out GitHub rate limits and retrying until the request succeeds.

use crate::github::FetchError;
use chrono::Utc;
use moka::future::Cache;
use std::future::Future;
use std::hash::Hash;
use std::time::Duration;

/// Extra wait added on top of the upstream reset time.
const RETRY_SAFETY_MARGIN_SECS: i64 = 1;

/// An unbounded read-through cache keyed by request identity.
///
/// The epoch source is injectable so backoff arithmetic is deterministic in
/// tests; the sleep itself uses `tokio::time` and cooperates with paused time.
#[derive(Clone)]
pub struct RequestCache<K, V> {
    store: Cache<K, V>,
    now_epoch: fn() -> i64,
}

impl<K, V> RequestCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            store: Cache::builder().build(),
            now_epoch: || Utc::now().timestamp(),
        }
    }

    #[cfg(test)]
    fn with_clock(now_epoch: fn() -> i64) -> Self {
        Self {
            store: Cache::builder().build(),
            now_epoch,
        }
    }

    /// Returns the cached value for `key`, fetching it if absent.
    ///
    /// On a rate-limited response the call sleeps until the upstream reset
    /// time (plus a one-second margin) and loops; there is no retry cap. Each
    /// iteration re-checks the cache first, so a value populated elsewhere in
    /// the meantime short-circuits the retry. Any other failure propagates to
    /// the caller and nothing is stored.
    pub async fn get_or_fetch<F, Fut>(&self, key: K, fetch: F) -> anyhow::Result<V>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<V, FetchError>>,
    {
        loop {
            if let Some(value) = self.store.get(&key).await {
                return Ok(value);
            }

            match fetch().await {
                Ok(value) => {
                    self.store.insert(key.clone(), value.clone()).await;
                    return Ok(value);
                }
                Err(FetchError::RateLimited { reset }) => {
                    let wait = (reset - (self.now_epoch)()).max(0) + RETRY_SAFETY_MARGIN_SECS;
                    tracing::warn!(wait_secs = wait, "Rate limited. Retrying after reset");
                    tokio::time::sleep(Duration::from_secs(wait as u64)).await;
                }
                Err(FetchError::Upstream(e)) => {
                    tracing::error!("Error during API request: {e:#}");
                    return Err(e);
                }
            }
        }
    }
}

impl<K, V> Default for RequestCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

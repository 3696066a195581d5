use crate::cache::RecordCache;
use crate::error::FetchError;
use crate::model::{CachedRecord, Fetched, Record};
use crate::retry::{with_retry, RetryPolicy};
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct FetchPlan<'a> {
    pub cache: &'a RecordCache,
    pub key: &'a str,
    pub ttl: Duration,
    pub retry: &'a RetryPolicy,
    pub cancel: &'a CancellationToken,
}

/// Serves `plan.key` from the cache, else runs `load` under the retry
/// policy and caches the result. After a terminal failure the last value
/// ever stored under the key is returned marked stale; with nothing to fall
/// back on the failure surfaces as [`FetchError::NoDataAvailable`].
pub async fn fetch_cached<T, F, Fut>(plan: FetchPlan<'_>, load: F) -> Result<Fetched<T>, FetchError>
where
    T: Record,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    if let Some(record) = plan.cache.get(plan.key) {
        if let Some(value) = T::unwrap(record.payload) {
            return Ok(Fetched::fresh(value, record.fetched_at));
        }
        tracing::warn!("Cache entry '{}' holds an unexpected payload kind", plan.key);
    }

    let err = match with_retry(plan.retry, plan.cancel, plan.key, load).await {
        Ok(value) => {
            let value = Arc::new(value);
            let fetched_at = Utc::now();
            plan.cache.set(
                plan.key,
                CachedRecord {
                    payload: T::wrap(value.clone()),
                    fetched_at,
                },
                plan.ttl,
            )?;
            return Ok(Fetched::fresh(value, fetched_at));
        }
        Err(FetchError::Cancelled) => return Err(FetchError::Cancelled),
        Err(err) => err,
    };

    let stale = plan
        .cache
        .get_stale(plan.key)
        .and_then(|record| T::unwrap(record.payload.clone()).map(|value| (value, record.fetched_at)));

    match stale {
        Some((value, fetched_at)) => {
            tracing::warn!(
                "Serving stale data for '{}' from {}: {}",
                plan.key,
                fetched_at,
                err
            );
            Ok(Fetched {
                value,
                fetched_at,
                stale: true,
            })
        }
        None => {
            tracing::error!("No data available for '{}': {}", plan.key, err);
            Err(FetchError::NoDataAvailable {
                key: plan.key.to_string(),
                source: Box::new(err),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TtlCache;
    use crate::model::StationCatalog;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn catalog(total_rows: usize) -> StationCatalog {
        StationCatalog {
            stations: vec![],
            total_rows,
            skipped: vec![],
        }
    }

    fn plan<'a>(
        cache: &'a RecordCache,
        retry: &'a RetryPolicy,
        cancel: &'a CancellationToken,
    ) -> FetchPlan<'a> {
        FetchPlan {
            cache,
            key: "stations:catalog",
            ttl: Duration::from_secs(60),
            retry,
            cancel,
        }
    }

    fn unavailable() -> FetchError {
        FetchError::UpstreamHttp {
            status: 503,
            url: "x".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hit_skips_upstream() {
        let cache = TtlCache::new("stations", Duration::from_secs(60));
        let retry = RetryPolicy::default();
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            let fetched = fetch_cached(plan(&cache, &retry, &cancel), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(catalog(1)) }
            })
            .await
            .unwrap();
            assert!(!fetched.stale);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_fallback_after_retries_exhausted() {
        let cache = TtlCache::new("stations", Duration::from_secs(60));
        let retry = RetryPolicy::default();
        let cancel = CancellationToken::new();

        fetch_cached(plan(&cache, &retry, &cancel), || async { Ok(catalog(7)) })
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(120)).await;

        let calls = AtomicU32::new(0);
        let fetched = fetch_cached(plan(&cache, &retry, &cancel), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<StationCatalog, _>(unavailable()) }
        })
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(fetched.stale);
        assert_eq!(fetched.value.total_rows, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_data_available_without_prior_value() {
        let cache = TtlCache::new("stations", Duration::from_secs(60));
        let retry = RetryPolicy::default();
        let cancel = CancellationToken::new();

        let result = fetch_cached(plan(&cache, &retry, &cancel), || async {
            Err::<StationCatalog, _>(unavailable())
        })
        .await;

        match result {
            Err(FetchError::NoDataAvailable { key, source }) => {
                assert_eq!(key, "stations:catalog");
                assert_eq!(*source, unavailable());
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_fetch_writes_nothing() {
        let cache = TtlCache::new("stations", Duration::from_secs(60));
        let retry = RetryPolicy::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = fetch_cached(plan(&cache, &retry, &cancel), || async { Ok(catalog(1)) }).await;

        assert_eq!(result, Err(FetchError::Cancelled));
        assert!(cache.is_empty());
        assert_eq!(cache.get_stale("stations:catalog"), None);
    }
}

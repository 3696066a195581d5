use crate::error::CacheError;
use crate::model::CachedRecord;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub const CURRENT_WEATHER_TTL: Duration = Duration::from_secs(5 * 60);
pub const FORECAST_TTL: Duration = Duration::from_secs(30 * 60);
pub const STATIONS_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const ALERTS_TTL: Duration = Duration::from_secs(5 * 60);
pub const POLLEN_TTL: Duration = Duration::from_secs(30 * 60);

const DEFAULT_MAX_ENTRIES: usize = 512;
const DEFAULT_SHELF_CAPACITY: u64 = 256;

#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub key: String,
    pub value: V,
    pub stored_at: Instant,
    pub ttl: Duration,
}

impl<V> CacheEntry<V> {
    /// An entry aged exactly `ttl` is still fresh.
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) > self.ttl
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStatistics {
    pub name: String,
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub purged: u64,
    pub hit_rate: f64,
    pub total_requests: u64,
}

struct Inner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    hits: u64,
    misses: u64,
    evictions: u64,
    purged: u64,
}

/// Live entries expire after the TTL. The moka shelf keeps the last value
/// written per key so a fetcher can fall back to it once the upstream fails.
pub struct TtlCache<V> {
    name: String,
    default_ttl: Duration,
    max_entries: usize,
    inner: Mutex<Inner<V>>,
    shelf: moka::sync::Cache<String, V>,
}

impl<V> std::fmt::Debug for TtlCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("name", &self.name)
            .field("default_ttl", &self.default_ttl)
            .field("max_entries", &self.max_entries)
            .finish()
    }
}

impl<V> TtlCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, default_ttl: Duration) -> Self {
        Self::with_limits(name, default_ttl, DEFAULT_MAX_ENTRIES, DEFAULT_SHELF_CAPACITY)
    }

    pub fn with_limits(
        name: impl Into<String>,
        default_ttl: Duration,
        max_entries: usize,
        shelf_capacity: u64,
    ) -> Self {
        Self {
            name: name.into(),
            default_ttl,
            max_entries: max_entries.max(1),
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                hits: 0,
                misses: 0,
                evictions: 0,
                purged: 0,
            }),
            shelf: moka::sync::Cache::new(shelf_capacity),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Returns the value if present and fresh.
    ///
    /// A miss counts one `misses`; an expired entry is removed on the spot and
    /// additionally counts one `evictions`.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let lookup = inner.entries.get(key).map(|entry| {
            if entry.is_expired(now) {
                None
            } else {
                Some(entry.value.clone())
            }
        });

        match lookup {
            Some(Some(value)) => {
                inner.hits += 1;
                tracing::debug!(cache = %self.name, key, "Cache hit");
                Some(value)
            }
            Some(None) => {
                inner.entries.remove(key);
                inner.evictions += 1;
                inner.misses += 1;
                tracing::debug!(cache = %self.name, key, "Cache entry expired");
                None
            }
            None => {
                inner.misses += 1;
                tracing::debug!(cache = %self.name, key, "Cache miss");
                None
            }
        }
    }

    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) -> Result<(), CacheError> {
        let key = key.into();
        validate_key(&key)?;

        let now = Instant::now();
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.max_entries {
            let before = inner.entries.len();
            inner.entries.retain(|_, entry| !entry.is_expired(now));
            inner.purged += (before - inner.entries.len()) as u64;

            if inner.entries.len() >= self.max_entries {
                let oldest = inner
                    .entries
                    .values()
                    .min_by_key(|entry| entry.stored_at)
                    .map(|entry| entry.key.clone());
                if let Some(oldest) = oldest {
                    inner.entries.remove(&oldest);
                    inner.purged += 1;
                    tracing::debug!(cache = %self.name, key = %oldest, "Cache full, dropped oldest entry");
                }
            }
        }

        self.shelf.insert(key.clone(), value.clone());
        inner.entries.insert(
            key.clone(),
            CacheEntry {
                key: key.clone(),
                value,
                stored_at: now,
                ttl,
            },
        );
        tracing::debug!(cache = %self.name, key = %key, ttl_secs = ttl.as_secs(), "Cache set");
        Ok(())
    }

    pub fn set_default(&self, key: impl Into<String>, value: V) -> Result<(), CacheError> {
        self.set(key, value, self.default_ttl)
    }

    /// Last value written for `key`, fresh or not. Does not touch counters.
    pub fn get_stale(&self, key: &str) -> Option<V> {
        if let Some(entry) = self.inner.lock().entries.get(key) {
            return Some(entry.value.clone());
        }
        self.shelf.get(key)
    }

    pub fn invalidate(&self, key: &str) {
        if self.inner.lock().entries.remove(key).is_some() {
            tracing::debug!(cache = %self.name, key, "Cache invalidated");
        }
        self.shelf.invalidate(key);
    }

    pub fn clear(&self) {
        let count = {
            let mut inner = self.inner.lock();
            let count = inner.entries.len();
            inner.entries.clear();
            count
        };
        self.shelf.invalidate_all();
        tracing::debug!(cache = %self.name, count, "Cache cleared");
    }

    /// Proactive sweep. Removed entries count as `purged`, not `evictions`.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - inner.entries.len();
        inner.purged += removed as u64;
        if removed > 0 {
            tracing::debug!(cache = %self.name, removed, "Cache cleanup");
        }
        removed
    }

    pub fn stats(&self) -> CacheStatistics {
        let inner = self.inner.lock();
        let total = inner.hits + inner.misses;
        let hit_rate = if total > 0 {
            inner.hits as f64 / total as f64
        } else {
            0.0
        };

        CacheStatistics {
            name: self.name.clone(),
            entries: inner.entries.len(),
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            purged: inner.purged,
            hit_rate,
            total_requests: total,
        }
    }

    pub fn reset_stats(&self) {
        let mut inner = self.inner.lock();
        inner.hits = 0;
        inner.misses = 0;
        inner.evictions = 0;
        inner.purged = 0;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn validate_key(key: &str) -> Result<(), CacheError> {
    if key.trim().is_empty() || key.chars().any(char::is_control) {
        return Err(CacheError::InvalidKey(key.to_string()));
    }
    Ok(())
}

pub fn cache_key(prefix: &str, parts: &[&str]) -> String {
    std::iter::once(prefix)
        .chain(parts.iter().copied())
        .collect::<Vec<_>>()
        .join(":")
}

/// Coordinates rounded to four decimals, so jitter in the configured
/// location does not fan out into new keys.
pub fn coordinate_key(prefix: &str, latitude: f64, longitude: f64) -> String {
    format!("{}:{:.4},{:.4}", prefix, latitude, longitude)
}

pub type RecordCache = TtlCache<CachedRecord>;

#[derive(Debug, Clone)]
pub struct CacheRegistry {
    pub current_weather: Arc<RecordCache>,
    pub forecast: Arc<RecordCache>,
    pub stations: Arc<RecordCache>,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self {
            current_weather: Arc::new(TtlCache::new("current_weather", CURRENT_WEATHER_TTL)),
            forecast: Arc::new(TtlCache::new("forecast", FORECAST_TTL)),
            stations: Arc::new(TtlCache::new("stations", STATIONS_TTL)),
        }
    }

    pub fn stats(&self) -> BTreeMap<String, CacheStatistics> {
        [&self.current_weather, &self.forecast, &self.stations]
            .into_iter()
            .map(|cache| (cache.name().to_string(), cache.stats()))
            .collect()
    }

    pub fn clear_all(&self) {
        self.current_weather.clear();
        self.forecast.clear();
        self.stations.clear();
        tracing::info!("All caches cleared");
    }

    pub fn cleanup_expired(&self) -> usize {
        self.current_weather.cleanup_expired()
            + self.forecast.cleanup_expired()
            + self.stations.cleanup_expired()
    }
}

impl Default for CacheRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> TtlCache<String> {
        TtlCache::new("test", CURRENT_WEATHER_TTL)
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = cache();
        let ttl = Duration::from_secs(300);
        cache.set("current:kzrh", "obs".to_string(), ttl).unwrap();

        tokio::time::advance(ttl - Duration::from_millis(1)).await;
        assert_eq!(cache.get("current:kzrh"), Some("obs".to_string()));
        assert_eq!(cache.stats().evictions, 0);

        tokio::time::advance(Duration::from_millis(2)).await;
        assert_eq!(cache.get("current:kzrh"), None);
        let stats = cache.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.entries, 0);

        // Already gone: a second lookup is a plain miss.
        assert_eq!(cache.get("current:kzrh"), None);
        let stats = cache.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.misses, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_at_exact_ttl_is_fresh() {
        let cache = cache();
        cache.set("k", "v".to_string(), Duration::from_secs(10)).unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(cache.get("k"), Some("v".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hit_path_scenario() {
        let cache = cache();
        cache
            .set("current:kzrh", "obs".to_string(), Duration::from_secs(5 * 60))
            .unwrap();

        tokio::time::advance(Duration::from_secs(4 * 60 + 59)).await;
        assert_eq!(cache.get("current:kzrh"), Some("obs".to_string()));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.hit_rate, 1.0);
    }

    #[test]
    fn test_hit_rate_is_zero_without_requests() {
        let stats = cache().stats();
        assert_eq!(stats.hit_rate, 0.0);
        assert_eq!(stats.total_requests, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_counters_track_every_get() {
        let cache = cache();
        cache.set("a", "1".to_string(), Duration::from_secs(1)).unwrap();
        cache.set("b", "2".to_string(), Duration::from_secs(100)).unwrap();

        let mut gets = 0;
        for key in ["a", "b", "c", "a"] {
            cache.get(key);
            gets += 1;
        }
        tokio::time::advance(Duration::from_secs(2)).await;
        for key in ["a", "b", "a"] {
            cache.get(key);
            gets += 1;
        }

        let stats = cache.stats();
        assert_eq!(stats.hits + stats.misses, gets);
        assert!(stats.evictions <= stats.misses);
        assert_eq!(stats.hits, 4);
        assert_eq!(stats.evictions, 1);
    }

    #[test]
    fn test_set_overwrites_without_touching_counters() {
        let cache = cache();
        cache.set_default("k", "old".to_string()).unwrap();
        cache.set_default("k", "new".to_string()).unwrap();

        let stats = cache.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.entries, 1);
        assert_eq!(cache.get("k"), Some("new".to_string()));
    }

    #[test]
    fn test_invalid_keys_are_rejected() {
        let cache = cache();
        assert!(matches!(
            cache.set_default("", "v".to_string()),
            Err(CacheError::InvalidKey(_))
        ));
        assert!(cache.set_default("   ", "v".to_string()).is_err());
        assert!(cache.set_default("bad\nkey", "v".to_string()).is_err());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_value_survives_eviction() {
        let cache = cache();
        cache.set("k", "v".to_string(), Duration::from_secs(1)).unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(cache.get("k"), None);
        let before = cache.stats();
        assert_eq!(cache.get_stale("k"), Some("v".to_string()));
        assert_eq!(cache.stats(), before);
    }

    #[test]
    fn test_clear_drops_stale_copies_too() {
        let cache = cache();
        cache.set_default("k", "v".to_string()).unwrap();
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.get_stale("k"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_counts_purged_not_evictions() {
        let cache = cache();
        cache.set("a", "1".to_string(), Duration::from_secs(1)).unwrap();
        cache.set("b", "2".to_string(), Duration::from_secs(1)).unwrap();
        cache.set("c", "3".to_string(), Duration::from_secs(60)).unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(cache.cleanup_expired(), 2);
        let stats = cache.stats();
        assert_eq!(stats.purged, 2);
        assert_eq!(stats.evictions, 0);
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_bound_drops_oldest() {
        let cache: TtlCache<String> =
            TtlCache::with_limits("bounded", Duration::from_secs(60), 2, 8);
        cache.set_default("forecast:1", "a".to_string()).unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.set_default("forecast:2", "b".to_string()).unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.set_default("forecast:3", "c".to_string()).unwrap();

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("forecast:1"), None);
        assert_eq!(cache.get("forecast:3"), Some("c".to_string()));
        assert_eq!(cache.stats().purged, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_access_keeps_counters_consistent() {
        let cache = Arc::new(cache());
        let mut handles = Vec::new();
        for task in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..250 {
                    let key = format!("k{}", i % 10);
                    if i % 3 == 0 {
                        cache.set_default(key, format!("{}-{}", task, i)).unwrap();
                    } else {
                        cache.get(&key);
                    }
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let gets_per_task = (0..250).filter(|i| i % 3 != 0).count() as u64;
        let stats = cache.stats();
        assert_eq!(stats.hits + stats.misses, gets_per_task * 8);
        assert!(stats.entries <= 10);
    }

    #[test]
    fn test_keys() {
        assert_eq!(cache_key("current", &["kzrh"]), "current:kzrh");
        assert_eq!(
            coordinate_key("forecast", 47.377_777, 8.540_01),
            "forecast:47.3778,8.5400"
        );
    }

    #[test]
    fn test_registry_reports_three_named_caches() {
        let registry = CacheRegistry::new();
        let stats = registry.stats();
        let names: Vec<_> = stats.keys().cloned().collect();
        assert_eq!(names, vec!["current_weather", "forecast", "stations"]);
        assert_eq!(registry.forecast.default_ttl(), FORECAST_TTL);
        assert_eq!(registry.stations.default_ttl(), STATIONS_TTL);
    }
}

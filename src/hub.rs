use crate::cache::{CacheRegistry, CacheStatistics};
use crate::condition::{resolve, ResolvedCondition, ResolverInput};
use crate::config::{Config, CurrentSource};
use crate::coordinator::{Coordinator, CoordinatorState, DataSource, Phase, RefreshOutcome};
use crate::error::FetchError;
use crate::model::{
    Alert, AlertSet, AlertState, Category, Fetched, ForecastSnapshot, Location, PollenReport,
    StationMetadata, StationObservation,
};
use crate::providers::{
    AlertFetcher, OpenMeteoCurrentFetcher, OpenMeteoForecastFetcher, PollenFetcher,
    StationCatalogFetcher, StationFetcher, Upstream,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Error, Debug, Clone, PartialEq)]
pub enum HubError {
    #[error("Category '{0}' is not enabled")]
    CategoryDisabled(Category),
    #[error("No location available: {0}")]
    LocationUnavailable(String),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CategoryData {
    Current(Arc<StationObservation>),
    Forecast(Arc<ForecastSnapshot>),
    Alerts(Arc<AlertSet>),
    Pollen(Arc<PollenReport>),
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryView {
    pub category: Category,
    pub phase: Phase,
    pub data: Option<CategoryData>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub stale: bool,
    pub last_error: Option<String>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub refresh_count: u64,
}

impl CategoryView {
    fn from_state<T>(
        category: Category,
        state: CoordinatorState<T>,
        wrap: fn(Arc<T>) -> CategoryData,
    ) -> Self {
        let stale = state.is_stale();
        let fetched_at = state.snapshot.as_ref().map(|snapshot| snapshot.fetched_at);
        Self {
            category,
            phase: state.phase,
            data: state.snapshot.map(|snapshot| wrap(snapshot.value)),
            fetched_at,
            stale,
            last_error: state.last_error.map(|err| err.to_string()),
            last_attempt_at: state.last_attempt_at,
            last_success_at: state.last_success_at,
            refresh_count: state.refresh_count,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertEntry {
    #[serde(flatten)]
    pub alert: Alert,
    pub state: AlertState,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertSummary {
    pub postal_code: String,
    pub any_alert: bool,
    pub critical_alert: bool,
    pub max_active_level: u8,
    pub alerts: Vec<AlertEntry>,
    pub stale: bool,
}

impl AlertSummary {
    pub fn new(set: &AlertSet, now: DateTime<Utc>, stale: bool) -> Self {
        Self {
            postal_code: set.postal_code.clone(),
            any_alert: set.any_alert(now),
            critical_alert: set.critical_alert(now),
            max_active_level: set.max_active_level(now),
            alerts: set
                .alerts
                .iter()
                .map(|alert| AlertEntry {
                    alert: alert.clone(),
                    state: alert.sensor_state(now),
                })
                .collect(),
            stale,
        }
    }
}

type Slot<T> = Option<Arc<Coordinator<T>>>;

fn coordinator<T: Send + Sync + 'static>(
    config: &Config,
    category: Category,
    source: Arc<dyn DataSource<T>>,
    cancel: &CancellationToken,
) -> Slot<T> {
    Some(Arc::new(Coordinator::new(
        category,
        source,
        config.interval(category),
        cancel.child_token(),
    )))
}

fn enabled<T>(category: Category, slot: &Slot<T>) -> Result<&Arc<Coordinator<T>>, HubError> {
    slot.as_ref().ok_or(HubError::CategoryDisabled(category))
}

fn latest<T>(slot: &Slot<T>) -> Option<Fetched<T>>
where
    T: Send + Sync + 'static,
{
    slot.as_ref().and_then(|coordinator| coordinator.snapshot())
}

pub struct WeatherHub {
    config: Config,
    caches: CacheRegistry,
    station: Option<StationMetadata>,
    location: Option<Location>,
    current: Slot<StationObservation>,
    forecast: Slot<ForecastSnapshot>,
    alerts: Slot<AlertSet>,
    pollen: Slot<PollenReport>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for WeatherHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeatherHub")
            .field("station_id", &self.config.station_id)
            .field("location", &self.location)
            .field("categories", &self.enabled_categories())
            .finish()
    }
}

impl WeatherHub {
    /// Looks the configured station up in the metadata catalog, then builds
    /// the hub. A catalog failure only costs the station metadata. `cancel`
    /// becomes the hub's shutdown token.
    pub async fn connect(
        config: Config,
        upstream: Upstream,
        cancel: CancellationToken,
    ) -> Result<Self, HubError> {
        let caches = CacheRegistry::new();
        let catalog = StationCatalogFetcher::new(
            upstream.clone(),
            caches.stations.clone(),
            &config.stations_meta_url,
        );

        let station = match catalog.fetch(&cancel.child_token()).await {
            Ok(fetched) => {
                let station = fetched.value.find(&config.station_id).cloned();
                if station.is_none() {
                    tracing::warn!("Station {} not found in the metadata catalog", config.station_id);
                }
                station
            }
            Err(FetchError::Cancelled) => {
                tracing::info!("Station lookup for {} cancelled", config.station_id);
                None
            }
            Err(err) => {
                tracing::warn!("Station metadata unavailable: {}", err);
                None
            }
        };

        Self::assemble(config, upstream, caches, station, cancel)
    }

    /// Builds the hub without touching the network. Forecast and pollen
    /// need a location, taken from the config or else from `station`; they
    /// are disabled when neither has one.
    pub fn build(
        config: Config,
        upstream: Upstream,
        caches: CacheRegistry,
        station: Option<StationMetadata>,
    ) -> Result<Self, HubError> {
        Self::assemble(config, upstream, caches, station, CancellationToken::new())
    }

    fn assemble(
        config: Config,
        upstream: Upstream,
        caches: CacheRegistry,
        station: Option<StationMetadata>,
        cancel: CancellationToken,
    ) -> Result<Self, HubError> {
        let location = config.location.or_else(|| {
            station
                .as_ref()
                .map(|station| Location::new(station.latitude, station.longitude))
        });

        let current: Slot<StationObservation> = if !config.is_enabled(Category::Current) {
            None
        } else {
            let source: Arc<dyn DataSource<StationObservation>> = match config.current_source {
                CurrentSource::MeteoSwiss => Arc::new(StationFetcher::new(
                    upstream.clone(),
                    caches.current_weather.clone(),
                    &config.stac_base_url,
                    &config.app_base_url,
                    &config.station_id,
                    config.postal_code.clone(),
                )),
                CurrentSource::OpenMeteo => {
                    let location = location.ok_or_else(|| {
                        HubError::LocationUnavailable(format!(
                            "Open-Meteo current weather needs coordinates for station {}",
                            config.station_id
                        ))
                    })?;
                    Arc::new(OpenMeteoCurrentFetcher::new(
                        upstream.clone(),
                        caches.current_weather.clone(),
                        &config.openmeteo_base_url,
                        location,
                    ))
                }
            };
            coordinator(&config, Category::Current, source, &cancel)
        };

        let needs_location = |category: Category| -> Option<Location> {
            if !config.is_enabled(category) {
                return None;
            }
            if location.is_none() {
                tracing::warn!(
                    "No coordinates for station {}, disabling {}",
                    config.station_id,
                    category
                );
            }
            location
        };

        let forecast = needs_location(Category::Forecast).and_then(|location| {
            let source: Arc<dyn DataSource<ForecastSnapshot>> = Arc::new(OpenMeteoForecastFetcher::new(
                upstream.clone(),
                caches.forecast.clone(),
                &config.openmeteo_base_url,
                location,
            ));
            coordinator(&config, Category::Forecast, source, &cancel)
        });

        let station_name = station
            .as_ref()
            .map(|station| station.name.clone())
            .unwrap_or_else(|| config.station_id.clone());
        let pollen = needs_location(Category::Pollen).and_then(|location| {
            let source: Arc<dyn DataSource<PollenReport>> = Arc::new(PollenFetcher::new(
                upstream.clone(),
                caches.current_weather.clone(),
                &config.air_quality_base_url,
                location,
                station_name,
            ));
            coordinator(&config, Category::Pollen, source, &cancel)
        });

        let alerts = match (&config.postal_code, config.is_enabled(Category::Alerts)) {
            (Some(postal_code), true) => {
                let source: Arc<dyn DataSource<AlertSet>> = Arc::new(AlertFetcher::new(
                    upstream,
                    caches.current_weather.clone(),
                    &config.app_base_url,
                    postal_code,
                ));
                coordinator(&config, Category::Alerts, source, &cancel)
            }
            _ => None,
        };

        Ok(Self {
            config,
            caches,
            station,
            location,
            current,
            forecast,
            alerts,
            pollen,
            cancel,
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn location(&self) -> Option<Location> {
        self.location
    }

    pub fn station(&self) -> Option<StationMetadata> {
        self.station.clone()
    }

    pub fn enabled_categories(&self) -> Vec<Category> {
        let mut categories = Vec::new();
        if self.current.is_some() {
            categories.push(Category::Current);
        }
        if self.forecast.is_some() {
            categories.push(Category::Forecast);
        }
        if self.alerts.is_some() {
            categories.push(Category::Alerts);
        }
        if self.pollen.is_some() {
            categories.push(Category::Pollen);
        }
        categories
    }

    /// Spawns every coordinator and the cache sweeper. Calling it twice is a
    /// no-op.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            tracing::debug!("Hub already started");
            return;
        }

        if let Some(coordinator) = &self.current {
            tasks.push(coordinator.spawn());
        }
        if let Some(coordinator) = &self.forecast {
            tasks.push(coordinator.spawn());
        }
        if let Some(coordinator) = &self.alerts {
            tasks.push(coordinator.spawn());
        }
        if let Some(coordinator) = &self.pollen {
            tasks.push(coordinator.spawn());
        }

        let caches = self.caches.clone();
        let cancel = self.cancel.child_token();
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CACHE_SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let purged = caches.cleanup_expired();
                        if purged > 0 {
                            tracing::debug!("Swept {} expired cache entries", purged);
                        }
                    }
                }
            }
        }));

        tracing::info!(
            "Weather hub started for station {} with {:?}",
            self.config.station_id,
            self.enabled_categories()
        );
    }

    /// Cancels every coordinator and waits for the tasks to finish. In-flight
    /// fetches resolve as cancelled without touching the caches.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(err) = task.await {
                tracing::error!("Hub task ended abnormally: {}", err);
            }
        }
        tracing::info!("Weather hub stopped");
    }

    pub fn get_current(&self, category: Category) -> Result<CategoryView, HubError> {
        Ok(match category {
            Category::Current => CategoryView::from_state(
                category,
                enabled(category, &self.current)?.state(),
                CategoryData::Current,
            ),
            Category::Forecast => CategoryView::from_state(
                category,
                enabled(category, &self.forecast)?.state(),
                CategoryData::Forecast,
            ),
            Category::Alerts => CategoryView::from_state(
                category,
                enabled(category, &self.alerts)?.state(),
                CategoryData::Alerts,
            ),
            Category::Pollen => CategoryView::from_state(
                category,
                enabled(category, &self.pollen)?.state(),
                CategoryData::Pollen,
            ),
        })
    }

    pub async fn request_refresh(&self, category: Category) -> Result<RefreshOutcome, HubError> {
        let outcome = match category {
            Category::Current => enabled(category, &self.current)?.refresh().await,
            Category::Forecast => enabled(category, &self.forecast)?.refresh().await,
            Category::Alerts => enabled(category, &self.alerts)?.refresh().await,
            Category::Pollen => enabled(category, &self.pollen)?.refresh().await,
        };
        Ok(outcome)
    }

    pub fn get_resolved_condition(&self) -> ResolvedCondition {
        resolve_snapshots(
            latest(&self.current).as_ref(),
            latest(&self.forecast).as_ref(),
            Utc::now(),
        )
    }

    pub fn alert_summary(&self) -> Option<AlertSummary> {
        let coordinator = self.alerts.as_ref()?;
        let state = coordinator.state();
        let stale = state.is_stale();
        let snapshot = state.snapshot?;
        Some(AlertSummary::new(&snapshot.value, Utc::now(), stale))
    }

    pub fn get_cache_stats(&self) -> BTreeMap<String, CacheStatistics> {
        self.caches.stats()
    }

    pub fn clear_caches(&self) {
        self.caches.clear_all();
    }

    pub fn weather_feed(&self) -> WeatherFeed {
        WeatherFeed {
            current: self.current.as_ref().map(|coordinator| coordinator.subscribe()),
            forecast: self.forecast.as_ref().map(|coordinator| coordinator.subscribe()),
        }
    }
}

fn resolve_snapshots(
    observation: Option<&Fetched<StationObservation>>,
    forecast: Option<&Fetched<ForecastSnapshot>>,
    now: DateTime<Utc>,
) -> ResolvedCondition {
    resolve(&ResolverInput {
        observation: observation.map(|fetched| fetched.value.as_ref()),
        forecast: forecast.map(|fetched| fetched.value.as_ref()),
        now,
    })
}

type StateReceiver<T> = watch::Receiver<CoordinatorState<T>>;

async fn changed<T>(receiver: &mut Option<StateReceiver<T>>) -> bool {
    match receiver {
        Some(receiver) => receiver.changed().await.is_ok(),
        None => std::future::pending().await,
    }
}

/// Yields a freshly resolved condition whenever the current-weather or
/// forecast coordinator publishes.
#[derive(Debug)]
pub struct WeatherFeed {
    current: Option<StateReceiver<StationObservation>>,
    forecast: Option<StateReceiver<ForecastSnapshot>>,
}

impl WeatherFeed {
    pub async fn next(&mut self) -> Option<ResolvedCondition> {
        loop {
            if self.current.is_none() && self.forecast.is_none() {
                return None;
            }

            let (category, open) = tokio::select! {
                open = changed(&mut self.current) => (Category::Current, open),
                open = changed(&mut self.forecast) => (Category::Forecast, open),
            };
            if open {
                return Some(self.resolve_now());
            }

            tracing::debug!("{} coordinator closed, feed continues without it", category);
            match category {
                Category::Current => self.current = None,
                _ => self.forecast = None,
            }
        }
    }

    fn resolve_now(&mut self) -> ResolvedCondition {
        let observation = self
            .current
            .as_mut()
            .and_then(|receiver| receiver.borrow_and_update().snapshot.clone());
        let forecast = self
            .forecast
            .as_mut()
            .and_then(|receiver| receiver.borrow_and_update().snapshot.clone());
        resolve_snapshots(observation.as_ref(), forecast.as_ref(), Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{Condition, ConditionSource};
    use crate::providers::testing::{upstream, ScriptedTransport};
    use serde_json::json;

    const RAINY_CSV: &str = "\
station_abbr;reference_timestamp;tre200s0;ure200s0;fu3010z0;dkl010z0;rre150z0;prestas0
KZRH;01.06.2024 10:00;12.1;93.0;9.0;260;0.4;962.3
";

    fn config() -> Config {
        let mut config = Config::for_station("KZRH");
        config.stac_base_url = "https://stac.test".to_string();
        config.app_base_url = "https://app.test/v1".to_string();
        config.openmeteo_base_url = "https://openmeteo.test".to_string();
        config.air_quality_base_url = "https://air.test".to_string();
        config.stations_meta_url = "https://meta.test/ogd-smn_meta_stations.csv".to_string();
        config
    }

    fn script_station(transport: &ScriptedTransport) {
        transport.respond_json(
            "/items/kzrh",
            json!({ "assets": { "ogd-smn_kzrh_t_recent.csv": { "href": "https://data.test/kzrh_t_recent.csv" } } }),
        );
        transport.respond("kzrh_t_recent.csv", Ok(RAINY_CSV.as_bytes().to_vec()));
    }

    fn zurich() -> StationMetadata {
        StationMetadata {
            station_id: "KZRH".to_string(),
            name: "Zürich / Fluntern".to_string(),
            latitude: 47.378,
            longitude: 8.566,
            altitude_m: Some(556.0),
            canton: Some("ZH".to_string()),
        }
    }

    fn hub(config: Config, transport: Arc<ScriptedTransport>, station: Option<StationMetadata>) -> WeatherHub {
        WeatherHub::build(config, upstream(transport), CacheRegistry::new(), station).unwrap()
    }

    #[test]
    fn test_categories_without_location_are_disabled() {
        let hub = hub(config(), Arc::new(ScriptedTransport::default()), None);

        assert_eq!(hub.enabled_categories(), vec![Category::Current]);
        assert_eq!(
            hub.get_current(Category::Forecast).unwrap_err(),
            HubError::CategoryDisabled(Category::Forecast)
        );
        assert_eq!(
            hub.get_current(Category::Alerts).unwrap_err(),
            HubError::CategoryDisabled(Category::Alerts)
        );
        assert!(hub.alert_summary().is_none());
    }

    #[test]
    fn test_location_comes_from_station_metadata() {
        let mut config = config();
        config.postal_code = Some("8001".to_string());
        config.categories.insert(Category::Alerts);
        let hub = hub(config, Arc::new(ScriptedTransport::default()), Some(zurich()));

        assert_eq!(hub.location(), Some(Location::new(47.378, 8.566)));
        assert_eq!(hub.enabled_categories(), Category::ALL.to_vec());
        assert_eq!(hub.station().unwrap().name, "Zürich / Fluntern");
    }

    #[test]
    fn test_openmeteo_current_requires_coordinates() {
        let mut config = config();
        config.current_source = CurrentSource::OpenMeteo;
        let result = WeatherHub::build(
            config,
            upstream(Arc::new(ScriptedTransport::default())),
            CacheRegistry::new(),
            None,
        );
        assert!(matches!(result, Err(HubError::LocationUnavailable(_))));
    }

    #[tokio::test]
    async fn test_refresh_and_resolve_from_observation() {
        let transport = Arc::new(ScriptedTransport::default());
        script_station(&transport);
        let hub = hub(config(), transport, None);

        let before = hub.get_current(Category::Current).unwrap();
        assert!(before.data.is_none());
        assert_eq!(hub.get_resolved_condition().source, ConditionSource::SafeDefault);

        let outcome = hub.request_refresh(Category::Current).await.unwrap();
        assert_eq!(outcome, RefreshOutcome::Updated { stale: false });

        let view = hub.get_current(Category::Current).unwrap();
        assert!(!view.stale);
        assert_eq!(view.refresh_count, 1);
        match view.data {
            Some(CategoryData::Current(observation)) => {
                assert_eq!(observation.precipitation_mm, Some(0.4))
            }
            other => panic!("unexpected data: {:?}", other),
        }

        let resolved = hub.get_resolved_condition();
        assert_eq!(resolved.condition, Condition::Rainy);
        assert_eq!(resolved.source, ConditionSource::Heuristic);

        let stats = hub.get_cache_stats();
        assert_eq!(stats["current_weather"].entries, 1);
        assert_eq!(stats["current_weather"].misses, 1);

        hub.clear_caches();
        assert_eq!(hub.get_cache_stats()["current_weather"].entries, 0);
    }

    #[tokio::test]
    async fn test_feed_yields_condition_after_refresh() {
        let transport = Arc::new(ScriptedTransport::default());
        script_station(&transport);
        let hub = hub(config(), transport, None);
        let mut feed = hub.weather_feed();

        hub.request_refresh(Category::Current).await.unwrap();
        let resolved = feed.next().await.unwrap();
        assert_eq!(resolved.condition, Condition::Rainy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_marks_view_stale() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.respond(
            "/items/kzrh",
            Err(FetchError::UpstreamHttp {
                status: 503,
                url: "https://stac.test".to_string(),
            }),
        );
        let hub = hub(config(), transport.clone(), None);

        let outcome = hub.request_refresh(Category::Current).await.unwrap();
        assert!(matches!(
            outcome,
            RefreshOutcome::Failed(FetchError::NoDataAvailable { .. })
        ));
        assert_eq!(transport.request_count(), 4);

        let view = hub.get_current(Category::Current).unwrap();
        assert!(view.stale);
        assert!(view.last_error.unwrap().contains("current:kzrh"));
    }

    #[tokio::test]
    async fn test_connect_resolves_station_from_catalog() {
        let transport = Arc::new(ScriptedTransport::default());
        let mut header = (0..16).map(|i| format!("col{}", i)).collect::<Vec<_>>();
        header[0] = "station_abbr".to_string();
        let mut row = vec![String::new(); 16];
        row[0] = "KZRH".to_string();
        row[3] = "Zürich / Fluntern".to_string();
        row[14] = "47.378".to_string();
        row[15] = "8.566".to_string();
        transport.respond(
            "ogd-smn_meta_stations.csv",
            Ok(format!("{}\n{}\n", header.join(";"), row.join(";")).into_bytes()),
        );

        let hub = WeatherHub::connect(config(), upstream(transport), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(hub.station().unwrap().station_id, "KZRH");
        assert_eq!(hub.location(), Some(Location::new(47.378, 8.566)));
        assert!(hub.enabled_categories().contains(&Category::Pollen));
        assert_eq!(hub.get_cache_stats()["stations"].entries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_with_cancelled_token_skips_lookup() {
        let transport = Arc::new(ScriptedTransport::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let hub = WeatherHub::connect(config(), upstream(transport.clone()), cancel)
            .await
            .unwrap();
        assert!(hub.station().is_none());
        assert_eq!(transport.request_count(), 0);
        assert_eq!(hub.get_cache_stats()["stations"].entries, 0);

        hub.start();
        hub.shutdown().await;
        assert_eq!(transport.request_count(), 0);
        assert_eq!(hub.get_current(Category::Current).unwrap().refresh_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_follows_caller_token() {
        let transport = Arc::new(ScriptedTransport::default());
        script_station(&transport);
        let cancel = CancellationToken::new();
        let hub = WeatherHub::connect(config(), upstream(transport.clone()), cancel.child_token())
            .await
            .unwrap();

        hub.start();
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        hub.shutdown().await;
        let requests = transport.request_count();
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(transport.request_count(), requests);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_shutdown() {
        let transport = Arc::new(ScriptedTransport::default());
        script_station(&transport);
        let hub = hub(config(), transport.clone(), None);

        hub.start();
        hub.start();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(hub.get_current(Category::Current).unwrap().refresh_count, 1);

        hub.shutdown().await;
        let requests = transport.request_count();
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(transport.request_count(), requests);
    }
}

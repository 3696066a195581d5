use crate::error::FetchError;
use crate::model::{
    AlertSet, Category, Fetched, ForecastSnapshot, PollenReport, StationObservation,
};
use crate::providers::{
    AlertFetcher, OpenMeteoCurrentFetcher, OpenMeteoForecastFetcher, PollenFetcher, StationFetcher,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub const MIN_UPDATE_INTERVAL: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_CURRENT_INTERVAL: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_ALERTS_INTERVAL: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_FORECAST_INTERVAL: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_POLLEN_INTERVAL: Duration = Duration::from_secs(30 * 60);

pub fn default_interval(category: Category) -> Duration {
    match category {
        Category::Current => DEFAULT_CURRENT_INTERVAL,
        Category::Forecast => DEFAULT_FORECAST_INTERVAL,
        Category::Alerts => DEFAULT_ALERTS_INTERVAL,
        Category::Pollen => DEFAULT_POLLEN_INTERVAL,
    }
}

pub fn clamp_interval(category: Category, requested: Duration) -> Duration {
    if requested < MIN_UPDATE_INTERVAL {
        tracing::warn!(
            "{} update interval {}s is below the minimum {}s, using the minimum",
            category,
            requested.as_secs(),
            MIN_UPDATE_INTERVAL.as_secs()
        );
        return MIN_UPDATE_INTERVAL;
    }
    requested
}

#[async_trait]
pub trait DataSource<T>: Send + Sync {
    async fn fetch(&self, cancel: &CancellationToken) -> Result<Fetched<T>, FetchError>;
}

macro_rules! impl_data_source {
    ($fetcher:ty, $record:ty) => {
        #[async_trait]
        impl DataSource<$record> for $fetcher {
            async fn fetch(&self, cancel: &CancellationToken) -> Result<Fetched<$record>, FetchError> {
                <$fetcher>::fetch(self, cancel).await
            }
        }
    };
}

impl_data_source!(StationFetcher, StationObservation);
impl_data_source!(OpenMeteoCurrentFetcher, StationObservation);
impl_data_source!(OpenMeteoForecastFetcher, ForecastSnapshot);
impl_data_source!(AlertFetcher, AlertSet);
impl_data_source!(PollenFetcher, PollenReport);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Fetching,
}

#[derive(Debug)]
pub struct CoordinatorState<T> {
    pub phase: Phase,
    pub snapshot: Option<Fetched<T>>,
    pub last_error: Option<FetchError>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub refresh_count: u64,
}

impl<T> Default for CoordinatorState<T> {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            snapshot: None,
            last_error: None,
            last_attempt_at: None,
            last_success_at: None,
            refresh_count: 0,
        }
    }
}

impl<T> Clone for CoordinatorState<T> {
    fn clone(&self) -> Self {
        Self {
            phase: self.phase,
            snapshot: self.snapshot.clone(),
            last_error: self.last_error.clone(),
            last_attempt_at: self.last_attempt_at,
            last_success_at: self.last_success_at,
            refresh_count: self.refresh_count,
        }
    }
}

impl<T> CoordinatorState<T> {
    /// True when the snapshot came from a stale fallback or the last
    /// refresh failed.
    pub fn is_stale(&self) -> bool {
        self.last_error.is_some() || self.snapshot.as_ref().is_some_and(|snapshot| snapshot.stale)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    Updated { stale: bool },
    Failed(FetchError),
    Coalesced,
}

pub struct Coordinator<T> {
    category: Category,
    source: Arc<dyn DataSource<T>>,
    interval: Duration,
    state: watch::Sender<CoordinatorState<T>>,
    cycle: Mutex<()>,
    cancel: CancellationToken,
}

impl<T> std::fmt::Debug for Coordinator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("category", &self.category)
            .field("interval", &self.interval)
            .finish()
    }
}

impl<T> Coordinator<T>
where
    T: Send + Sync + 'static,
{
    pub fn new(
        category: Category,
        source: Arc<dyn DataSource<T>>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(CoordinatorState::default());
        Self {
            category,
            source,
            interval: clamp_interval(category, interval),
            state,
            cycle: Mutex::new(()),
            cancel,
        }
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn subscribe(&self) -> watch::Receiver<CoordinatorState<T>> {
        self.state.subscribe()
    }

    pub fn state(&self) -> CoordinatorState<T> {
        self.state.borrow().clone()
    }

    pub fn snapshot(&self) -> Option<Fetched<T>> {
        self.state.borrow().snapshot.clone()
    }

    /// One refresh cycle. Returns [`RefreshOutcome::Coalesced`] without
    /// fetching when a cycle is already in flight.
    pub async fn refresh(&self) -> RefreshOutcome {
        let Ok(_cycle) = self.cycle.try_lock() else {
            tracing::debug!("{} refresh already in flight, coalescing", self.category);
            return RefreshOutcome::Coalesced;
        };

        let started_at = Utc::now();
        self.state.send_if_modified(|state| {
            state.phase = Phase::Fetching;
            state.last_attempt_at = Some(started_at);
            false
        });

        match self.source.fetch(&self.cancel).await {
            Ok(fetched) => {
                let stale = fetched.stale;
                self.state.send_modify(|state| {
                    state.phase = Phase::Idle;
                    state.snapshot = Some(fetched);
                    state.last_error = None;
                    state.last_success_at = Some(Utc::now());
                    state.refresh_count += 1;
                });
                if stale {
                    tracing::warn!("{} refreshed from stale cache", self.category);
                } else {
                    tracing::debug!("{} refreshed", self.category);
                }
                RefreshOutcome::Updated { stale }
            }
            Err(err) => {
                tracing::error!("{} refresh failed: {}", self.category, err);
                let outcome = RefreshOutcome::Failed(err.clone());
                self.state.send_modify(|state| {
                    state.phase = Phase::Idle;
                    state.last_error = Some(err);
                    state.refresh_count += 1;
                });
                outcome
            }
        }
    }

    /// Runs the periodic scheduler until cancelled. The first tick fires
    /// immediately.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(
            "{} coordinator started, refreshing every {}s",
            self.category,
            self.interval.as_secs()
        );

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.refresh().await;
                }
            }
        }

        tracing::info!("{} coordinator stopped", self.category);
    }

    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(self.clone().run())
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as SyncMutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Semaphore;

    #[derive(Default)]
    struct ScriptedSource {
        calls: AtomicU32,
        results: SyncMutex<VecDeque<Result<u32, FetchError>>>,
        gate: Option<Arc<Semaphore>>,
    }

    impl ScriptedSource {
        fn new(results: Vec<Result<u32, FetchError>>) -> Self {
            Self {
                results: SyncMutex::new(results.into()),
                ..Default::default()
            }
        }

        fn gated(results: Vec<Result<u32, FetchError>>, gate: Arc<Semaphore>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::new(results)
            }
        }
    }

    #[async_trait]
    impl DataSource<u32> for ScriptedSource {
        async fn fetch(&self, cancel: &CancellationToken) -> Result<Fetched<u32>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                    permit = gate.acquire() => drop(permit),
                }
            }
            let next = self.results.lock().pop_front().unwrap_or(Ok(0));
            next.map(|value| Fetched::fresh(Arc::new(value), Utc::now()))
        }
    }

    fn coordinator(source: Arc<ScriptedSource>) -> Arc<Coordinator<u32>> {
        Arc::new(Coordinator::new(
            Category::Current,
            source,
            DEFAULT_CURRENT_INTERVAL,
            CancellationToken::new(),
        ))
    }

    fn unavailable() -> FetchError {
        FetchError::NoDataAvailable {
            key: "current:kzrh".to_string(),
            source: Box::new(FetchError::NetworkTimeout("x".to_string())),
        }
    }

    #[test]
    fn test_interval_is_clamped_to_minimum() {
        assert_eq!(clamp_interval(Category::Current, Duration::from_secs(60)), MIN_UPDATE_INTERVAL);
        assert_eq!(
            clamp_interval(Category::Forecast, DEFAULT_FORECAST_INTERVAL),
            DEFAULT_FORECAST_INTERVAL
        );
    }

    #[tokio::test]
    async fn test_success_replaces_snapshot() {
        let coordinator = coordinator(Arc::new(ScriptedSource::new(vec![Ok(7), Ok(8)])));

        assert_eq!(coordinator.refresh().await, RefreshOutcome::Updated { stale: false });
        assert_eq!(coordinator.refresh().await, RefreshOutcome::Updated { stale: false });

        let state = coordinator.state();
        assert_eq!(state.snapshot.map(|s| *s.value), Some(8));
        assert_eq!(state.refresh_count, 2);
        assert_eq!(state.phase, Phase::Idle);
        assert!(!coordinator.state().is_stale());
    }

    #[tokio::test]
    async fn test_failure_retains_previous_snapshot() {
        let coordinator = coordinator(Arc::new(ScriptedSource::new(vec![Ok(7), Err(unavailable())])));

        coordinator.refresh().await;
        assert_eq!(coordinator.refresh().await, RefreshOutcome::Failed(unavailable()));

        let state = coordinator.state();
        assert_eq!(state.snapshot.as_ref().map(|s| *s.value), Some(7));
        assert_eq!(state.last_error, Some(unavailable()));
        assert!(state.is_stale());
    }

    #[tokio::test]
    async fn test_fetching_phase_does_not_notify_but_completion_does() {
        let gate = Arc::new(Semaphore::new(0));
        let source = Arc::new(ScriptedSource::gated(vec![Ok(1)], gate.clone()));
        let coordinator = coordinator(source.clone());
        let mut rx = coordinator.subscribe();

        let running = coordinator.clone();
        let task = tokio::spawn(async move { running.refresh().await });
        while source.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        assert_eq!(rx.borrow().phase, Phase::Fetching);
        assert!(!rx.has_changed().unwrap());

        gate.add_permits(1);
        assert_eq!(task.await.unwrap(), RefreshOutcome::Updated { stale: false });
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().snapshot.as_ref().map(|s| *s.value), Some(1));
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_overlapping_refresh_is_coalesced() {
        let gate = Arc::new(Semaphore::new(0));
        let source = Arc::new(ScriptedSource::gated(vec![Ok(1)], gate.clone()));
        let coordinator = coordinator(source.clone());

        let running = coordinator.clone();
        let first = tokio::spawn(async move { running.refresh().await });
        while source.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        assert_eq!(coordinator.refresh().await, RefreshOutcome::Coalesced);
        gate.add_permits(1);
        assert_eq!(first.await.unwrap(), RefreshOutcome::Updated { stale: false });
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.state().refresh_count, 1);
    }

    #[tokio::test]
    async fn test_cancel_fails_in_flight_cycle_without_replacing_snapshot() {
        let gate = Arc::new(Semaphore::new(0));
        let source = Arc::new(ScriptedSource::gated(vec![Ok(1)], gate));
        let coordinator = coordinator(source.clone());

        let running = coordinator.clone();
        let cycle = tokio::spawn(async move { running.refresh().await });
        while source.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        coordinator.shutdown();

        assert_eq!(cycle.await.unwrap(), RefreshOutcome::Failed(FetchError::Cancelled));
        let state = coordinator.state();
        assert!(state.snapshot.is_none());
        assert_eq!(state.last_error, Some(FetchError::Cancelled));
        assert_eq!(state.phase, Phase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_ticks_until_shutdown() {
        let source = Arc::new(ScriptedSource::new(vec![]));
        let coordinator = coordinator(source.clone());
        let handle = coordinator.spawn();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(DEFAULT_CURRENT_INTERVAL).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);

        coordinator.shutdown();
        handle.await.unwrap();
        tokio::time::sleep(DEFAULT_CURRENT_INTERVAL * 3).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }
}

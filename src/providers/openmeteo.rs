use super::fetch::{fetch_cached, FetchPlan};
use super::merge::{convert_current, merge_daily, merge_hourly};
use super::types::OpenMeteoForecastResponse;
use super::Upstream;
use crate::cache::{coordinate_key, RecordCache, CURRENT_WEATHER_TTL, FORECAST_TTL};
use crate::error::FetchError;
use crate::model::{Fetched, ForecastSnapshot, Location, StationObservation};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const CURRENT_FIELDS: &str = "temperature_2m,relative_humidity_2m,pressure_msl,wind_speed_10m,\
wind_direction_10m,precipitation,weather_code";
const HOURLY_FIELDS: &str = "temperature_2m,precipitation_probability,weather_code";
const DAILY_FIELDS: &str = "weather_code,temperature_2m_max,temperature_2m_min";
const FORECAST_DAYS: u32 = 7;

#[derive(Debug, Clone)]
struct OpenMeteoClient {
    upstream: Upstream,
    base_url: String,
    location: Location,
}

impl OpenMeteoClient {
    async fn get_forecast(&self, with_series: bool) -> Result<OpenMeteoForecastResponse, FetchError> {
        if !self.location.is_valid() {
            return Err(FetchError::parse(format!(
                "invalid coordinates {}, {}",
                self.location.latitude, self.location.longitude
            )));
        }

        let url = format!("{}/v1/forecast", self.base_url.trim_end_matches('/'));
        let mut query = vec![
            ("latitude", self.location.latitude.to_string()),
            ("longitude", self.location.longitude.to_string()),
            ("current", CURRENT_FIELDS.to_string()),
            ("timezone", "UTC".to_string()),
        ];
        if with_series {
            query.push(("hourly", HOURLY_FIELDS.to_string()));
            query.push(("daily", DAILY_FIELDS.to_string()));
            query.push(("forecast_days", FORECAST_DAYS.to_string()));
        }

        self.upstream.get_json(&url, &query).await
    }
}

/// Converts a raw forecast response into a snapshot. A response with no
/// usable current block and no usable series is a parse error.
pub fn normalize_forecast(
    response: &OpenMeteoForecastResponse,
    location: Location,
    now: DateTime<Utc>,
) -> Result<ForecastSnapshot, FetchError> {
    let hourly = response
        .hourly
        .as_ref()
        .map(|hourly| merge_hourly(hourly, now))
        .unwrap_or_default();
    let daily = response
        .daily
        .as_ref()
        .map(|daily| merge_daily(daily, now))
        .unwrap_or_default();
    let current = response.current.as_ref().and_then(convert_current);

    if hourly.is_empty() && daily.is_empty() && current.is_none() {
        return Err(FetchError::parse("forecast response carries no usable data"));
    }

    Ok(ForecastSnapshot {
        location,
        generated_at: now,
        current,
        hourly,
        daily,
    })
}

#[derive(Debug, Clone)]
pub struct OpenMeteoForecastFetcher {
    client: OpenMeteoClient,
    cache: Arc<RecordCache>,
}

impl OpenMeteoForecastFetcher {
    pub fn new(
        upstream: Upstream,
        cache: Arc<RecordCache>,
        base_url: impl Into<String>,
        location: Location,
    ) -> Self {
        Self {
            client: OpenMeteoClient {
                upstream,
                base_url: base_url.into(),
                location,
            },
            cache,
        }
    }

    pub fn cache_key(&self) -> String {
        let location = self.client.location;
        coordinate_key("forecast", location.latitude, location.longitude)
    }

    pub async fn fetch(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Fetched<ForecastSnapshot>, FetchError> {
        let key = self.cache_key();
        fetch_cached(
            FetchPlan {
                cache: &self.cache,
                key: &key,
                ttl: FORECAST_TTL,
                retry: &self.client.upstream.retry,
                cancel,
            },
            || async {
                let response = self.client.get_forecast(true).await?;
                let snapshot = normalize_forecast(&response, self.client.location, Utc::now())?;
                tracing::info!(
                    "Fetched forecast for {:.4},{:.4}: {} hourly, {} daily points",
                    snapshot.location.latitude,
                    snapshot.location.longitude,
                    snapshot.hourly.len(),
                    snapshot.daily.len()
                );
                Ok(snapshot)
            },
        )
        .await
    }
}

/// Current conditions from Open-Meteo, shaped like a station observation.
#[derive(Debug, Clone)]
pub struct OpenMeteoCurrentFetcher {
    client: OpenMeteoClient,
    cache: Arc<RecordCache>,
}

impl OpenMeteoCurrentFetcher {
    pub fn new(
        upstream: Upstream,
        cache: Arc<RecordCache>,
        base_url: impl Into<String>,
        location: Location,
    ) -> Self {
        Self {
            client: OpenMeteoClient {
                upstream,
                base_url: base_url.into(),
                location,
            },
            cache,
        }
    }

    pub fn cache_key(&self) -> String {
        let location = self.client.location;
        coordinate_key("openmeteo", location.latitude, location.longitude)
    }

    pub async fn fetch(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Fetched<StationObservation>, FetchError> {
        let key = self.cache_key();
        fetch_cached(
            FetchPlan {
                cache: &self.cache,
                key: &key,
                ttl: CURRENT_WEATHER_TTL,
                retry: &self.client.upstream.retry,
                cancel,
            },
            || async {
                let response = self.client.get_forecast(false).await?;
                let current = response
                    .current
                    .as_ref()
                    .and_then(convert_current)
                    .ok_or_else(|| FetchError::parse("response has no current block"))?;

                let location = self.client.location;
                Ok(StationObservation {
                    station_id: format!("openmeteo:{:.4},{:.4}", location.latitude, location.longitude),
                    timestamp: current.time,
                    temperature_c: current.temperature_c,
                    humidity_pct: current.humidity_pct,
                    wind_speed_kmh: current.wind_speed_kmh,
                    wind_direction_deg: current.wind_direction_deg,
                    precipitation_mm: current.precipitation_mm,
                    pressure_hpa: current.pressure_hpa,
                    symbol_code: None,
                    missing_parameters: Vec::new(),
                })
            },
        )
        .await
    }
}

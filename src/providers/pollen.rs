use super::fetch::{fetch_cached, FetchPlan};
use super::merge::OPENMETEO_TIME_FORMAT;
use super::types::AirQualityResponse;
use super::{parse_utc_minutes, Upstream};
use crate::cache::{coordinate_key, RecordCache, POLLEN_TTL};
use crate::error::FetchError;
use crate::model::{Fetched, Location, PollenReading, PollenReport, PollenType};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const REQUESTED_SERIES: &str = "alder_pollen,birch_pollen,grass_pollen,mugwort_pollen,ragweed_pollen";

/// Upstream series name per pollen type. Hazel is not requested but is
/// read when the upstream includes it.
const SERIES: [(&str, PollenType); 6] = [
    ("alder_pollen", PollenType::Alder),
    ("birch_pollen", PollenType::Birch),
    ("hazel_pollen", PollenType::Hazel),
    ("grass_pollen", PollenType::Grass),
    ("mugwort_pollen", PollenType::Mugwort),
    ("ragweed_pollen", PollenType::Ambrosia),
];

/// Grains/m³ at which levels 1 through 4 start.
fn level_thresholds(pollen_type: PollenType) -> [f64; 4] {
    match pollen_type {
        PollenType::Birch | PollenType::Hazel | PollenType::Alder => [1.0, 11.0, 70.0, 300.0],
        PollenType::Grass => [1.0, 20.0, 50.0, 150.0],
        PollenType::Ambrosia | PollenType::Mugwort => [1.0, 6.0, 11.0, 40.0],
    }
}

/// 0 none, 1 low, 2 moderate, 3 strong, 4 very strong.
pub fn concentration_level(pollen_type: PollenType, concentration: f64) -> u8 {
    level_thresholds(pollen_type)
        .iter()
        .filter(|&&threshold| concentration >= threshold)
        .count() as u8
}

#[derive(Debug, Clone)]
pub struct PollenFetcher {
    upstream: Upstream,
    cache: Arc<RecordCache>,
    base_url: String,
    location: Location,
    station: String,
}

impl PollenFetcher {
    pub fn new(
        upstream: Upstream,
        cache: Arc<RecordCache>,
        base_url: impl Into<String>,
        location: Location,
        station: impl Into<String>,
    ) -> Self {
        Self {
            upstream,
            cache,
            base_url: base_url.into(),
            location,
            station: station.into(),
        }
    }

    pub fn cache_key(&self) -> String {
        coordinate_key("pollen", self.location.latitude, self.location.longitude)
    }

    pub async fn fetch(&self, cancel: &CancellationToken) -> Result<Fetched<PollenReport>, FetchError> {
        let key = self.cache_key();
        fetch_cached(
            FetchPlan {
                cache: &self.cache,
                key: &key,
                ttl: POLLEN_TTL,
                retry: &self.upstream.retry,
                cancel,
            },
            || self.load(),
        )
        .await
    }

    async fn load(&self) -> Result<PollenReport, FetchError> {
        let url = format!("{}/v1/air-quality", self.base_url.trim_end_matches('/'));
        let query = [
            ("latitude", self.location.latitude.to_string()),
            ("longitude", self.location.longitude.to_string()),
            ("hourly", REQUESTED_SERIES.to_string()),
            ("forecast_days", "1".to_string()),
            ("timezone", "UTC".to_string()),
        ];
        let response: AirQualityResponse = self.upstream.get_json(&url, &query).await?;
        let report = parse_pollen(&response, &self.station, self.location, Utc::now())?;
        tracing::info!(
            "Fetched {} pollen readings for {}",
            report.readings.len(),
            self.station
        );
        Ok(report)
    }
}

pub fn parse_pollen(
    response: &AirQualityResponse,
    station: &str,
    location: Location,
    now: DateTime<Utc>,
) -> Result<PollenReport, FetchError> {
    let hourly = response
        .hourly
        .as_ref()
        .ok_or_else(|| FetchError::parse("air-quality response has no hourly block"))?;

    let mut readings = Vec::new();
    for (series_name, pollen_type) in SERIES {
        let Some(values) = hourly.series.get(series_name) else {
            continue;
        };
        let Some((index, concentration)) = values
            .iter()
            .enumerate()
            .find_map(|(index, value)| value.filter(|v| v.is_finite()).map(|v| (index, v)))
        else {
            tracing::debug!("{} has no values", series_name);
            continue;
        };

        let measured_at = hourly
            .time
            .get(index)
            .and_then(|raw| parse_utc_minutes(raw, OPENMETEO_TIME_FORMAT))
            .unwrap_or(now);
        readings.push(PollenReading {
            pollen_type,
            level: concentration_level(pollen_type, concentration),
            concentration,
            measured_at,
        });
    }

    if readings.is_empty() {
        tracing::warn!("No pollen data available (possibly outside pollen season)");
        return Err(FetchError::parse(
            "no pollen series in response, possibly outside pollen season",
        ));
    }

    let measured_at = readings
        .iter()
        .map(|reading| reading.measured_at)
        .min()
        .unwrap_or(now);

    Ok(PollenReport {
        station: station.to_string(),
        location,
        readings,
        measured_at,
    })
}

use super::fetch::{fetch_cached, FetchPlan};
use super::types::{PlzDetailResponse, StacItem};
use super::{parse_utc_minutes, Upstream};
use crate::cache::{cache_key, RecordCache, CURRENT_WEATHER_TTL, STATIONS_TTL};
use crate::error::FetchError;
use crate::model::{
    Fetched, Location, SkippedStation, StationCatalog, StationMetadata, StationObservation,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const STAC_COLLECTION: &str = "ch.meteoschweiz.ogd-smn";
const TIMESTAMP_COLUMN: &str = "reference_timestamp";
const TIMESTAMP_FORMAT: &str = "%d.%m.%Y %H:%M";

pub const PARAM_TEMPERATURE: &str = "tre200s0";
pub const PARAM_HUMIDITY: &str = "ure200s0";
pub const PARAM_WIND_SPEED: &str = "fu3010z0";
pub const PARAM_WIND_DIRECTION: &str = "dkl010z0";
pub const PARAM_PRECIPITATION: &str = "rre150z0";
pub const PARAM_PRESSURE: &str = "prestas0";

const EXPECTED_PARAMETERS: [&str; 6] = [
    PARAM_TEMPERATURE,
    PARAM_HUMIDITY,
    PARAM_WIND_SPEED,
    PARAM_WIND_DIRECTION,
    PARAM_PRECIPITATION,
    PARAM_PRESSURE,
];

const META_MIN_COLUMNS: usize = 16;

/// Current observation for one station.
#[derive(Debug, Clone)]
pub struct StationFetcher {
    upstream: Upstream,
    cache: Arc<RecordCache>,
    stac_base_url: String,
    app_base_url: String,
    station_id: String,
    postal_code: Option<String>,
}

impl StationFetcher {
    pub fn new(
        upstream: Upstream,
        cache: Arc<RecordCache>,
        stac_base_url: impl Into<String>,
        app_base_url: impl Into<String>,
        station_id: &str,
        postal_code: Option<String>,
    ) -> Self {
        Self {
            upstream,
            cache,
            stac_base_url: stac_base_url.into(),
            app_base_url: app_base_url.into(),
            // The STAC API uses lower-case item ids.
            station_id: station_id.trim().to_lowercase(),
            postal_code,
        }
    }

    pub fn station_id(&self) -> &str {
        &self.station_id
    }

    pub fn cache_key(&self) -> String {
        cache_key("current", &[&self.station_id])
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
                retry: &self.upstream.retry,
                cancel,
            },
            || self.load(),
        )
        .await
    }

    async fn load(&self) -> Result<StationObservation, FetchError> {
        let csv_url = self.find_recent_csv().await?;
        let body = self.upstream.get_bytes(&csv_url, &[]).await?;
        let mut observation =
            parse_observation_csv(&self.station_id, &decode_text(&body), Utc::now())?;
        observation.symbol_code = self.fetch_symbol_code().await;

        tracing::info!(
            "Fetched observation for {} at {} (temp={:?})",
            self.station_id,
            observation.timestamp,
            observation.temperature_c
        );
        Ok(observation)
    }

    async fn find_recent_csv(&self) -> Result<String, FetchError> {
        let url = format!(
            "{}/collections/{}/items/{}",
            self.stac_base_url.trim_end_matches('/'),
            STAC_COLLECTION,
            self.station_id
        );
        let item: StacItem = self.upstream.get_json(&url, &[]).await?;

        let asset_key = format!("ogd-smn_{}_t_recent.csv", self.station_id);
        item.assets
            .get(&asset_key)
            .map(|asset| asset.href.clone())
            .ok_or_else(|| {
                tracing::warn!("No {} asset for station {}", asset_key, self.station_id);
                FetchError::parse(format!("STAC item has no asset '{}'", asset_key))
            })
    }

    /// Best effort: the app backend only knows postal codes, and a failure
    /// here must not fail the observation.
    async fn fetch_symbol_code(&self) -> Option<i32> {
        let postal_code = self.postal_code.as_deref()?;
        match fetch_plz_detail(&self.upstream, &self.app_base_url, postal_code).await {
            Ok(detail) => detail.current_weather.and_then(|weather| weather.icon),
            Err(err) => {
                tracing::debug!("Symbol code lookup for {} failed: {}", postal_code, err);
                None
            }
        }
    }
}

pub(crate) async fn fetch_plz_detail(
    upstream: &Upstream,
    app_base_url: &str,
    postal_code: &str,
) -> Result<PlzDetailResponse, FetchError> {
    let url = format!("{}/plzDetail", app_base_url.trim_end_matches('/'));
    upstream
        .get_json(&url, &[("plz", format!("{}00", postal_code))])
        .await
}

/// UTF-8 when valid, otherwise ISO-8859-1 (every byte is one code point).
pub fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.trim_start_matches('\u{feff}').to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

fn parse_value(raw: Option<&str>) -> Option<f64> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    raw.parse::<f64>().ok().filter(|value| value.is_finite())
}

fn csv_reader(text: &str) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .delimiter(b';')
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes())
}

fn csv_error(what: &str, err: csv::Error) -> FetchError {
    FetchError::parse(format!("{}: {}", what, err))
}

/// Parses the latest (last) row of a semicolon separated `t_recent` file.
pub fn parse_observation_csv(
    station_id: &str,
    text: &str,
    now: DateTime<Utc>,
) -> Result<StationObservation, FetchError> {
    let mut reader = csv_reader(text);
    let columns: HashMap<String, usize> = reader
        .headers()
        .map_err(|err| csv_error("observation CSV header", err))?
        .iter()
        .enumerate()
        .map(|(index, name)| (name.to_lowercase(), index))
        .collect();
    if columns.is_empty() {
        return Err(FetchError::parse("observation CSV is empty"));
    }

    let mut latest = None;
    for record in reader.records() {
        match record {
            Ok(record) => latest = Some(record),
            Err(err) => tracing::warn!("Skipping unreadable observation row: {}", err),
        }
    }
    let latest = latest.ok_or_else(|| FetchError::parse("observation CSV has no data rows"))?;
    let field = |name: &str| columns.get(name).and_then(|&index| latest.get(index));

    let missing_parameters: Vec<String> = EXPECTED_PARAMETERS
        .iter()
        .filter(|code| !columns.contains_key(**code))
        .map(|code| code.to_string())
        .collect();
    if !missing_parameters.is_empty() {
        tracing::warn!(
            "Station {}: parameters missing from upstream CSV: {}",
            station_id,
            missing_parameters.join(", ")
        );
    }

    let timestamp = match field(TIMESTAMP_COLUMN) {
        Some(raw) => parse_utc_minutes(raw, TIMESTAMP_FORMAT).unwrap_or_else(|| {
            tracing::warn!("Unparseable reference timestamp {:?}, using now", raw);
            now
        }),
        None => {
            return Err(FetchError::parse(format!(
                "observation CSV lacks the '{}' column",
                TIMESTAMP_COLUMN
            )))
        }
    };

    Ok(StationObservation {
        station_id: station_id.to_uppercase(),
        timestamp,
        temperature_c: parse_value(field(PARAM_TEMPERATURE)),
        humidity_pct: parse_value(field(PARAM_HUMIDITY)),
        wind_speed_kmh: parse_value(field(PARAM_WIND_SPEED)),
        wind_direction_deg: parse_value(field(PARAM_WIND_DIRECTION)),
        precipitation_mm: parse_value(field(PARAM_PRECIPITATION)),
        pressure_hpa: parse_value(field(PARAM_PRESSURE)),
        symbol_code: None,
        missing_parameters,
    })
}

/// The station metadata list.
#[derive(Debug, Clone)]
pub struct StationCatalogFetcher {
    upstream: Upstream,
    cache: Arc<RecordCache>,
    url: String,
}

impl StationCatalogFetcher {
    pub fn new(upstream: Upstream, cache: Arc<RecordCache>, url: impl Into<String>) -> Self {
        Self {
            upstream,
            cache,
            url: url.into(),
        }
    }

    pub async fn fetch(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Fetched<StationCatalog>, FetchError> {
        let key = cache_key("stations", &["catalog"]);
        fetch_cached(
            FetchPlan {
                cache: &self.cache,
                key: &key,
                ttl: STATIONS_TTL,
                retry: &self.upstream.retry,
                cancel,
            },
            || async {
                let body = self.upstream.get_bytes(&self.url, &[]).await?;
                parse_station_catalog(&decode_text(&body))
            },
        )
        .await
    }
}

/// Parses `ogd-smn_meta_stations.csv`. Malformed rows are reported in
/// [`StationCatalog::skipped`]; only an input without a single usable row
/// is an error.
pub fn parse_station_catalog(text: &str) -> Result<StationCatalog, FetchError> {
    let mut stations = Vec::new();
    let mut skipped = Vec::new();
    let mut total_rows = 0;

    let mut reader = csv_reader(text);
    for (index, result) in reader.records().enumerate() {
        total_rows += 1;
        let record = match result {
            Ok(record) => record,
            Err(err) => {
                let line = err.position().map_or(index + 2, |pos| pos.line() as usize);
                tracing::debug!("Skipping unreadable station row {}: {}", line, err);
                skipped.push(SkippedStation {
                    line,
                    station_id: String::new(),
                    reason: err.to_string(),
                });
                continue;
            }
        };
        let line_number = record.position().map_or(index + 2, |pos| pos.line() as usize);
        let station_id = record.get(0).unwrap_or_default();

        let mut skip = |reason: String| {
            tracing::debug!("Skipping station row {} ({}): {}", line_number, station_id, reason);
            skipped.push(SkippedStation {
                line: line_number,
                station_id: station_id.to_string(),
                reason,
            });
        };

        if record.len() < META_MIN_COLUMNS {
            skip(format!(
                "expected at least {} columns, found {}",
                META_MIN_COLUMNS,
                record.len()
            ));
            continue;
        }
        if station_id.is_empty() {
            skip("empty station id".to_string());
            continue;
        }

        let column = |index: usize| record.get(index).unwrap_or_default();
        let location = match (column(14).parse::<f64>(), column(15).parse::<f64>()) {
            (Ok(lat), Ok(lon)) if Location::new(lat, lon).is_valid() => Location::new(lat, lon),
            _ => {
                skip(format!("invalid coordinates '{}', '{}'", column(14), column(15)));
                continue;
            }
        };

        let name = match column(3) {
            "" => station_id.to_string(),
            name => name.to_string(),
        };
        let canton = Some(column(7))
            .filter(|canton| !canton.is_empty())
            .map(str::to_string);

        stations.push(StationMetadata {
            station_id: station_id.to_uppercase(),
            name,
            latitude: location.latitude,
            longitude: location.longitude,
            altitude_m: column(6).parse().ok(),
            canton,
        });
    }

    if stations.is_empty() {
        return Err(FetchError::parse(format!(
            "no valid station rows among {} rows",
            total_rows
        )));
    }

    if !skipped.is_empty() {
        tracing::warn!("Skipped {} malformed station rows", skipped.len());
    }
    tracing::info!("Parsed {} of {} stations", stations.len(), total_rows);

    Ok(StationCatalog {
        stations,
        total_rows,
        skipped,
    })
}

use crate::coordinator::default_interval;
use crate::model::{Category, Location};
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::env;
use std::time::Duration;

pub const DEFAULT_STAC_BASE_URL: &str = "https://data.geo.admin.ch/api/stac/v1";
pub const DEFAULT_STATIONS_META_URL: &str =
    "https://data.geo.admin.ch/ch.meteoschweiz.ogd-smn/ogd-smn_meta_stations.csv";
pub const DEFAULT_OPENMETEO_BASE_URL: &str = "https://api.open-meteo.com";
pub const DEFAULT_AIR_QUALITY_BASE_URL: &str = "https://air-quality-api.open-meteo.com";
pub const DEFAULT_APP_BASE_URL: &str = "https://app-prod-ws.meteoswiss-app.ch/v1";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

/// Where current conditions come from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CurrentSource {
    MeteoSwiss,
    OpenMeteo,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub station_id: String,
    pub postal_code: Option<String>,
    pub location: Option<Location>,
    pub current_source: CurrentSource,
    pub update_interval: Duration,
    pub forecast_interval: Duration,
    pub pollen_interval: Duration,
    pub categories: BTreeSet<Category>,
    pub bind_addr: String,
    pub stac_base_url: String,
    pub stations_meta_url: String,
    pub openmeteo_base_url: String,
    pub air_quality_base_url: String,
    pub app_base_url: String,
}

fn parse_secs(name: &str, raw: Option<String>, default: Duration) -> anyhow::Result<Duration> {
    match raw {
        Some(raw) => {
            let secs: u64 = raw
                .trim()
                .parse()
                .with_context(|| format!("{} must be a number of seconds, got {:?}", name, raw))?;
            Ok(Duration::from_secs(secs))
        }
        None => Ok(default),
    }
}

fn parse_coordinate(name: &str, raw: Option<String>) -> anyhow::Result<Option<f64>> {
    raw.map(|raw| {
        raw.trim()
            .parse::<f64>()
            .with_context(|| format!("{} must be a decimal number, got {:?}", name, raw))
    })
    .transpose()
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from any variable lookup, so tests need not
    /// touch the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let station_id = var("METEOSWISS_STATION_ID")
            .map(|id| id.trim().to_uppercase())
            .ok_or_else(|| anyhow::anyhow!("METEOSWISS_STATION_ID not set"))?;
        let postal_code = var("METEOSWISS_POSTAL_CODE").map(|plz| plz.trim().to_string());

        let latitude = parse_coordinate("METEOSWISS_LATITUDE", var("METEOSWISS_LATITUDE"))?;
        let longitude = parse_coordinate("METEOSWISS_LONGITUDE", var("METEOSWISS_LONGITUDE"))?;
        let location = match (latitude, longitude) {
            (Some(lat), Some(lon)) => {
                let location = Location::new(lat, lon);
                if !location.is_valid() {
                    bail!("Coordinates {}, {} are out of range", lat, lon);
                }
                Some(location)
            }
            (None, None) => None,
            _ => bail!("METEOSWISS_LATITUDE and METEOSWISS_LONGITUDE must be set together"),
        };

        let current_source = match var("METEOSWISS_DATA_SOURCE")
            .map(|source| source.trim().to_lowercase())
            .as_deref()
        {
            None | Some("meteoswiss") => CurrentSource::MeteoSwiss,
            Some("openmeteo") => CurrentSource::OpenMeteo,
            Some(other) => bail!("Unknown METEOSWISS_DATA_SOURCE {:?}", other),
        };

        let mut categories = match var("METEOSWISS_CATEGORIES") {
            Some(list) => list
                .split(',')
                .filter(|name| !name.trim().is_empty())
                .map(|name| name.parse::<Category>().map_err(anyhow::Error::msg))
                .collect::<anyhow::Result<BTreeSet<_>>>()
                .context("Invalid METEOSWISS_CATEGORIES")?,
            None => Category::ALL.into_iter().collect(),
        };
        if categories.contains(&Category::Alerts) && postal_code.is_none() {
            tracing::warn!("Alerts need METEOSWISS_POSTAL_CODE, disabling the alerts category");
            categories.remove(&Category::Alerts);
        }

        Ok(Config {
            station_id,
            postal_code,
            location,
            current_source,
            update_interval: parse_secs(
                "METEOSWISS_UPDATE_INTERVAL",
                var("METEOSWISS_UPDATE_INTERVAL"),
                default_interval(Category::Current),
            )?,
            forecast_interval: parse_secs(
                "METEOSWISS_FORECAST_INTERVAL",
                var("METEOSWISS_FORECAST_INTERVAL"),
                default_interval(Category::Forecast),
            )?,
            pollen_interval: parse_secs(
                "METEOSWISS_POLLEN_INTERVAL",
                var("METEOSWISS_POLLEN_INTERVAL"),
                default_interval(Category::Pollen),
            )?,
            categories,
            bind_addr: var("METEOSWISS_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            stac_base_url: var("METEOSWISS_STAC_BASE_URL")
                .unwrap_or_else(|| DEFAULT_STAC_BASE_URL.to_string()),
            stations_meta_url: var("METEOSWISS_STATIONS_META_URL")
                .unwrap_or_else(|| DEFAULT_STATIONS_META_URL.to_string()),
            openmeteo_base_url: var("OPENMETEO_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENMETEO_BASE_URL.to_string()),
            air_quality_base_url: var("OPENMETEO_AIR_QUALITY_BASE_URL")
                .unwrap_or_else(|| DEFAULT_AIR_QUALITY_BASE_URL.to_string()),
            app_base_url: var("METEOSWISS_APP_BASE_URL")
                .unwrap_or_else(|| DEFAULT_APP_BASE_URL.to_string()),
        })
    }

    pub fn is_enabled(&self, category: Category) -> bool {
        self.categories.contains(&category)
    }

    /// Refresh period for `category`, before clamping.
    pub fn interval(&self, category: Category) -> Duration {
        match category {
            Category::Current | Category::Alerts => self.update_interval,
            Category::Forecast => self.forecast_interval,
            Category::Pollen => self.pollen_interval,
        }
    }

    /// Minimal configuration, used by tests and embedders.
    pub fn for_station(station_id: &str) -> Self {
        Self {
            station_id: station_id.to_uppercase(),
            postal_code: None,
            location: None,
            current_source: CurrentSource::MeteoSwiss,
            update_interval: default_interval(Category::Current),
            forecast_interval: default_interval(Category::Forecast),
            pollen_interval: default_interval(Category::Pollen),
            categories: Category::ALL.into_iter().filter(|c| *c != Category::Alerts).collect(),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            stac_base_url: DEFAULT_STAC_BASE_URL.to_string(),
            stations_meta_url: DEFAULT_STATIONS_META_URL.to_string(),
            openmeteo_base_url: DEFAULT_OPENMETEO_BASE_URL.to_string(),
            air_quality_base_url: DEFAULT_AIR_QUALITY_BASE_URL.to_string(),
            app_base_url: DEFAULT_APP_BASE_URL.to_string(),
        }
    }
}

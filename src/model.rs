use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// A data category served by one coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Current,
    Forecast,
    Alerts,
    Pollen,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Current,
        Category::Forecast,
        Category::Alerts,
        Category::Pollen,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Current => "current",
            Category::Forecast => "forecast",
            Category::Alerts => "alerts",
            Category::Pollen => "pollen",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "current" | "current_weather" => Ok(Category::Current),
            "forecast" => Ok(Category::Forecast),
            "alerts" => Ok(Category::Alerts),
            "pollen" => Ok(Category::Pollen),
            other => Err(format!("Unknown category: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationObservation {
    pub station_id: String,
    pub timestamp: DateTime<Utc>,
    pub temperature_c: Option<f64>,
    pub humidity_pct: Option<f64>,
    pub wind_speed_kmh: Option<f64>,
    pub wind_direction_deg: Option<f64>,
    pub precipitation_mm: Option<f64>,
    pub pressure_hpa: Option<f64>,
    pub symbol_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_parameters: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationMetadata {
    pub station_id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_m: Option<f64>,
    pub canton: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedStation {
    pub line: usize,
    pub station_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationCatalog {
    pub stations: Vec<StationMetadata>,
    pub total_rows: usize,
    pub skipped: Vec<SkippedStation>,
}

impl StationCatalog {
    pub fn find(&self, station_id: &str) -> Option<&StationMetadata> {
        self.stations
            .iter()
            .find(|station| station.station_id.eq_ignore_ascii_case(station_id))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentPoint {
    pub time: DateTime<Utc>,
    pub temperature_c: Option<f64>,
    pub humidity_pct: Option<f64>,
    pub wind_speed_kmh: Option<f64>,
    pub wind_direction_deg: Option<f64>,
    pub pressure_hpa: Option<f64>,
    pub precipitation_mm: Option<f64>,
    pub weather_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyPoint {
    pub time: DateTime<Utc>,
    pub temperature_c: f64,
    pub precipitation_probability_pct: Option<f64>,
    pub weather_code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyPoint {
    pub date: NaiveDate,
    pub temp_high_c: f64,
    pub temp_low_c: f64,
    pub weather_code: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastSnapshot {
    pub location: Location,
    pub generated_at: DateTime<Utc>,
    pub current: Option<CurrentPoint>,
    pub hourly: Vec<HourlyPoint>,
    pub daily: Vec<DailyPoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnType {
    Thunderstorm,
    Rain,
    Snow,
    Wind,
    ForestFire,
    Flood,
}

impl WarnType {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(WarnType::Thunderstorm),
            2 => Some(WarnType::Rain),
            3 => Some(WarnType::Snow),
            4 => Some(WarnType::Wind),
            10 => Some(WarnType::ForestFire),
            11 => Some(WarnType::Flood),
            _ => None,
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            WarnType::Thunderstorm => 1,
            WarnType::Rain => 2,
            WarnType::Snow => 3,
            WarnType::Wind => 4,
            WarnType::ForestFire => 10,
            WarnType::Flood => 11,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            WarnType::Thunderstorm => "Thunderstorm",
            WarnType::Rain => "Rain",
            WarnType::Snow => "Snow",
            WarnType::Wind => "Wind",
            WarnType::ForestFire => "Forest Fire",
            WarnType::Flood => "Flood",
        }
    }
}

pub fn warn_level_label(level: u8) -> &'static str {
    match level {
        1 => "Level 1 - No/minor danger",
        2 => "Level 2 - Moderate danger",
        3 => "Level 3 - Significant danger",
        4 => "Level 4 - High danger",
        _ => "Level 5 - Very high danger",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertState {
    Outlook,
    Critical,
    Warning,
    Clear,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: String,
    pub warn_type: WarnType,
    pub warn_level: u8,
    pub title: String,
    pub description: String,
    pub valid_from: DateTime<Utc>,
    pub valid_to: Option<DateTime<Utc>>,
    pub is_outlook: bool,
}

impl Alert {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        if self.is_outlook || now < self.valid_from {
            return false;
        }
        self.valid_to.map_or(true, |valid_to| now <= valid_to)
    }

    pub fn is_critical(&self) -> bool {
        self.warn_level >= 3
    }

    pub fn sensor_state(&self, now: DateTime<Utc>) -> AlertState {
        if self.is_outlook {
            AlertState::Outlook
        } else if !self.is_active(now) {
            AlertState::Clear
        } else if self.is_critical() {
            AlertState::Critical
        } else {
            AlertState::Warning
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertSet {
    pub postal_code: String,
    pub alerts: Vec<Alert>,
    pub fetched_at: DateTime<Utc>,
}

impl AlertSet {
    pub fn active(&self, now: DateTime<Utc>) -> Vec<&Alert> {
        self.alerts.iter().filter(|alert| alert.is_active(now)).collect()
    }

    pub fn any_alert(&self, now: DateTime<Utc>) -> bool {
        self.alerts.iter().any(|alert| alert.is_active(now))
    }

    pub fn critical_alert(&self, now: DateTime<Utc>) -> bool {
        self.alerts
            .iter()
            .any(|alert| alert.is_active(now) && alert.is_critical())
    }

    /// Highest level among active alerts, 0 when none.
    pub fn max_active_level(&self, now: DateTime<Utc>) -> u8 {
        self.active(now)
            .into_iter()
            .map(|alert| alert.warn_level)
            .max()
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollenType {
    Birch,
    Hazel,
    Alder,
    Grass,
    Ambrosia,
    Mugwort,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollenReading {
    pub pollen_type: PollenType,
    pub level: u8,
    pub concentration: f64,
    pub measured_at: DateTime<Utc>,
}

impl PollenReading {
    pub fn is_high_risk(&self) -> bool {
        self.level >= 3
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollenReport {
    pub station: String,
    pub location: Location,
    pub readings: Vec<PollenReading>,
    pub measured_at: DateTime<Utc>,
}

impl PollenReport {
    pub fn reading(&self, pollen_type: PollenType) -> Option<&PollenReading> {
        self.readings
            .iter()
            .find(|reading| reading.pollen_type == pollen_type)
    }
}

/// A fetch result annotated with staleness.
#[derive(Debug, PartialEq, Serialize)]
pub struct Fetched<T> {
    pub value: Arc<T>,
    pub fetched_at: DateTime<Utc>,
    pub stale: bool,
}

impl<T> Clone for Fetched<T> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            fetched_at: self.fetched_at,
            stale: self.stale,
        }
    }
}

impl<T> Fetched<T> {
    pub fn fresh(value: Arc<T>, fetched_at: DateTime<Utc>) -> Self {
        Self {
            value,
            fetched_at,
            stale: false,
        }
    }
}

/// Every record kind the caches hold.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Observation(Arc<StationObservation>),
    Forecast(Arc<ForecastSnapshot>),
    Alerts(Arc<AlertSet>),
    Pollen(Arc<PollenReport>),
    Stations(Arc<StationCatalog>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedRecord {
    pub payload: Payload,
    pub fetched_at: DateTime<Utc>,
}

/// Conversion between a typed record and its cache payload.
pub trait Record: Send + Sync + 'static {
    fn wrap(value: Arc<Self>) -> Payload;
    fn unwrap(payload: Payload) -> Option<Arc<Self>>;
}

macro_rules! impl_record {
    ($ty:ty, $variant:ident) => {
        impl Record for $ty {
            fn wrap(value: Arc<Self>) -> Payload {
                Payload::$variant(value)
            }

            fn unwrap(payload: Payload) -> Option<Arc<Self>> {
                match payload {
                    Payload::$variant(value) => Some(value),
                    _ => None,
                }
            }
        }
    };
}

impl_record!(StationObservation, Observation);
impl_record!(ForecastSnapshot, Forecast);
impl_record!(AlertSet, Alerts);
impl_record!(PollenReport, Pollen);
impl_record!(StationCatalog, Stations);

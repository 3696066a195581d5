use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Deserialize)]
pub struct StacItem {
    #[serde(default)]
    pub assets: HashMap<String, StacAsset>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StacAsset {
    pub href: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenMeteoForecastResponse {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub current: Option<OpenMeteoCurrent>,
    #[serde(default)]
    pub hourly: Option<OpenMeteoHourly>,
    #[serde(default)]
    pub daily: Option<OpenMeteoDaily>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenMeteoCurrent {
    pub time: String,
    pub temperature_2m: Option<f64>,
    pub relative_humidity_2m: Option<f64>,
    pub pressure_msl: Option<f64>,
    pub wind_speed_10m: Option<f64>,
    pub wind_direction_10m: Option<f64>,
    pub precipitation: Option<f64>,
    pub weather_code: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenMeteoHourly {
    #[serde(default)]
    pub time: Vec<String>,
    #[serde(default)]
    pub temperature_2m: Vec<Option<f64>>,
    #[serde(default)]
    pub precipitation_probability: Vec<Option<f64>>,
    #[serde(default)]
    pub weather_code: Vec<Option<f64>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenMeteoDaily {
    #[serde(default)]
    pub time: Vec<String>,
    #[serde(default)]
    pub weather_code: Vec<Option<f64>>,
    #[serde(default)]
    pub temperature_2m_max: Vec<Option<f64>>,
    #[serde(default)]
    pub temperature_2m_min: Vec<Option<f64>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AirQualityResponse {
    #[serde(default)]
    pub hourly: Option<AirQualityHourly>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AirQualityHourly {
    #[serde(default)]
    pub time: Vec<String>,
    #[serde(flatten)]
    pub series: HashMap<String, Vec<Option<f64>>>,
}

/// `plzDetail` from the MeteoSwiss app backend. `warnings` is usually a
/// list but a lone object shows up too, so it stays untyped here.
#[derive(Debug, Clone, Deserialize)]
pub struct PlzDetailResponse {
    #[serde(default, rename = "currentWeather")]
    pub current_weather: Option<PlzCurrentWeather>,
    #[serde(default)]
    pub warnings: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlzCurrentWeather {
    pub icon: Option<i32>,
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlzWarning {
    pub warn_type: Option<i64>,
    pub warn_level: Option<i64>,
    pub valid_from: Option<i64>,
    pub valid_to: Option<i64>,
    #[serde(default)]
    pub outlook: bool,
    #[serde(default)]
    pub text: String,
}

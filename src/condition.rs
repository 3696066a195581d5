use crate::model::{ForecastSnapshot, StationObservation};
use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Condition vocabulary of the host's weather entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Condition {
    #[serde(rename = "sunny")]
    Sunny,
    #[serde(rename = "clear-night")]
    ClearNight,
    #[serde(rename = "partlycloudy")]
    PartlyCloudy,
    #[serde(rename = "cloudy")]
    Cloudy,
    #[serde(rename = "fog")]
    Fog,
    #[serde(rename = "rainy")]
    Rainy,
    #[serde(rename = "pouring")]
    Pouring,
    #[serde(rename = "snowy")]
    Snowy,
    #[serde(rename = "snowy-rainy")]
    SnowyRainy,
    #[serde(rename = "lightning")]
    Lightning,
    #[serde(rename = "lightning-rainy")]
    LightningRainy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionSource {
    ForecastCurrent,
    StationSymbol,
    Heuristic,
    SafeDefault,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedCondition {
    pub condition: Condition,
    pub source: ConditionSource,
}

pub const SAFE_DEFAULT: Condition = Condition::PartlyCloudy;

/// How far a forecast point may be from now and still count as current.
pub const NEAR_NOW_WINDOW_MINUTES: i64 = 90;

/// Fixed UTC+1, no DST.
const LOCAL_OFFSET_SECS: i64 = 3600;

#[derive(Debug, Clone, Copy)]
pub struct ResolverInput<'a> {
    pub observation: Option<&'a StationObservation>,
    pub forecast: Option<&'a ForecastSnapshot>,
    pub now: DateTime<Utc>,
}

impl ResolverInput<'_> {
    fn precipitation_present(&self) -> bool {
        self.observation
            .and_then(|obs| obs.precipitation_mm)
            .is_some_and(|mm| mm > 0.0)
    }

    fn is_night(&self) -> bool {
        is_night(self.now, self.precipitation_present())
    }
}

/// Night is local [20:00, 07:00). The [07:00, 08:00) band counts as night
/// only while it is raining.
pub fn is_night(now: DateTime<Utc>, precipitation_present: bool) -> bool {
    let hour = (now + Duration::seconds(LOCAL_OFFSET_SECS)).hour();
    match hour {
        20..=23 | 0..=6 => true,
        7 => precipitation_present,
        _ => false,
    }
}

/// WMO weather interpretation codes. Unknown codes yield `None`.
pub fn wmo_condition(code: i32, night: bool) -> Option<Condition> {
    let condition = match code {
        0 if night => Condition::ClearNight,
        0 => Condition::Sunny,
        1..=3 => Condition::PartlyCloudy,
        45 | 48 => Condition::Fog,
        51..=67 => Condition::Rainy,
        71..=77 | 85 | 86 => Condition::Snowy,
        80..=82 => Condition::Pouring,
        95..=99 => Condition::Lightning,
        _ => return None,
    };
    Some(condition)
}

/// Human readable text for a WMO code, `None` for codes outside the table.
pub fn wmo_description(code: i32) -> Option<&'static str> {
    let description = match code {
        0 => "Clear sky",
        1 => "Mainly clear",
        2 => "Partly cloudy",
        3 => "Overcast",
        45 => "Fog",
        48 => "Depositing rime fog",
        51 => "Light drizzle",
        53 => "Moderate drizzle",
        55 => "Dense drizzle",
        56 => "Light freezing drizzle",
        57 => "Dense freezing drizzle",
        61 => "Slight rain",
        63 => "Moderate rain",
        65 => "Heavy rain",
        66 => "Light freezing rain",
        67 => "Heavy freezing rain",
        71 => "Slight snow fall",
        73 => "Moderate snow fall",
        75 => "Heavy snow fall",
        77 => "Snow grains",
        80 => "Slight rain showers",
        81 => "Moderate rain showers",
        82 => "Violent rain showers",
        85 => "Slight snow showers",
        86 => "Heavy snow showers",
        95 => "Thunderstorm",
        96 => "Thunderstorm with slight hail",
        99 => "Thunderstorm with heavy hail",
        _ => return None,
    };
    Some(description)
}

/// MeteoSwiss pictogram codes: 1..=35 by day, the same plus 100 by night.
pub fn symbol_condition(code: i32) -> Option<Condition> {
    let (base, night) = match code {
        1..=35 => (code, false),
        101..=135 => (code - 100, true),
        _ => return None,
    };

    let condition = match base {
        1 if night => Condition::ClearNight,
        1 => Condition::Sunny,
        2 | 3 | 26 => Condition::PartlyCloudy,
        4 | 5 | 27 => Condition::Cloudy,
        28 => Condition::Fog,
        6 | 9 | 14 | 17 | 20 | 29 | 32 | 33 => Condition::Rainy,
        7 | 10 | 15 | 18 | 21 | 31 => Condition::SnowyRainy,
        8 | 11 | 16 | 19 | 22 | 30 | 34 => Condition::Snowy,
        12 | 13 | 23 | 24 | 25 | 35 => Condition::LightningRainy,
        _ => return None,
    };
    Some(condition)
}

fn near_now_code(forecast: &ForecastSnapshot, now: DateTime<Utc>) -> Option<i32> {
    let window = Duration::minutes(NEAR_NOW_WINDOW_MINUTES);
    let near = |time: DateTime<Utc>| now - time <= window && time - now <= window;

    let current = forecast
        .current
        .as_ref()
        .filter(|current| near(current.time))
        .and_then(|current| current.weather_code);
    if current.is_some() {
        return current;
    }

    let covering = forecast
        .hourly
        .iter()
        .find(|point| point.time <= now && now < point.time + Duration::hours(1));
    if let Some(point) = covering {
        return Some(point.weather_code);
    }

    forecast
        .hourly
        .first()
        .filter(|point| near(point.time))
        .map(|point| point.weather_code)
}

fn forecast_current(input: &ResolverInput<'_>) -> Option<Condition> {
    let code = near_now_code(input.forecast?, input.now)?;
    let condition = wmo_condition(code, input.is_night());
    if condition.is_none() {
        tracing::debug!("Ignoring unknown WMO code {}", code);
    }
    condition
}

fn station_symbol(input: &ResolverInput<'_>) -> Option<Condition> {
    let code = input.observation?.symbol_code?;
    let condition = symbol_condition(code);
    if condition.is_none() {
        tracing::debug!("Ignoring unknown station symbol {}", code);
    }
    condition
}

fn heuristic(input: &ResolverInput<'_>) -> Option<Condition> {
    let observation = input.observation?;
    if input.precipitation_present() {
        return Some(Condition::Rainy);
    }
    if observation.humidity_pct.is_some_and(|humidity| humidity >= 90.0) {
        return Some(Condition::PartlyCloudy);
    }
    Some(if input.is_night() {
        Condition::ClearNight
    } else {
        Condition::Sunny
    })
}

fn safe_default(_: &ResolverInput<'_>) -> Option<Condition> {
    Some(SAFE_DEFAULT)
}

type Strategy = fn(&ResolverInput<'_>) -> Option<Condition>;

const STRATEGIES: [(ConditionSource, Strategy); 4] = [
    (ConditionSource::ForecastCurrent, forecast_current),
    (ConditionSource::StationSymbol, station_symbol),
    (ConditionSource::Heuristic, heuristic),
    (ConditionSource::SafeDefault, safe_default),
];

/// First strategy with a usable signal wins; the safe default always answers.
pub fn resolve(input: &ResolverInput<'_>) -> ResolvedCondition {
    for (source, strategy) in STRATEGIES {
        if let Some(condition) = strategy(input) {
            tracing::debug!("Resolved condition {:?} via {:?}", condition, source);
            return ResolvedCondition { condition, source };
        }
    }
    ResolvedCondition {
        condition: SAFE_DEFAULT,
        source: ConditionSource::SafeDefault,
    }
}

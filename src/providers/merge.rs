use super::parse_utc_minutes;
use super::types::{OpenMeteoCurrent, OpenMeteoDaily, OpenMeteoHourly};
use crate::condition::wmo_description;
use crate::model::{CurrentPoint, DailyPoint, HourlyPoint};
use chrono::{DateTime, Duration, DurationRound, NaiveDate, Utc};

pub const OPENMETEO_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M";
pub const MAX_HOURLY_POINTS: usize = 48;
pub const MAX_DAILY_POINTS: usize = 7;

fn shortest(label: &str, lengths: &[usize]) -> usize {
    let min = lengths.iter().copied().min().unwrap_or(0);
    let max = lengths.iter().copied().max().unwrap_or(0);
    if min != max {
        tracing::warn!(
            "{} arrays differ in length ({:?}), using the first {}",
            label,
            lengths,
            min
        );
    }
    min
}

/// Keeps only points strictly later than the previous kept one.
fn strictly_ascending<T, K: PartialOrd + Copy + std::fmt::Debug>(
    label: &str,
    points: Vec<T>,
    key: impl Fn(&T) -> K,
) -> Vec<T> {
    let mut kept: Vec<T> = Vec::with_capacity(points.len());
    for point in points {
        let k = key(&point);
        match kept.last().map(&key) {
            Some(last) if k <= last => {
                tracing::warn!("Dropping out-of-order or duplicate {} point at {:?}", label, k);
            }
            _ => kept.push(point),
        }
    }
    kept
}

fn code(raw: Option<f64>) -> Option<i32> {
    raw.filter(|value| value.is_finite()).map(|value| value.round() as i32)
}

/// Hourly points from the hour containing `now`, at most 48.
pub fn merge_hourly(hourly: &OpenMeteoHourly, now: DateTime<Utc>) -> Vec<HourlyPoint> {
    let len = shortest(
        "Hourly",
        &[
            hourly.time.len(),
            hourly.temperature_2m.len(),
            hourly.precipitation_probability.len(),
            hourly.weather_code.len(),
        ],
    );

    let mut points = Vec::with_capacity(len);
    for i in 0..len {
        let Some(time) = parse_utc_minutes(&hourly.time[i], OPENMETEO_TIME_FORMAT) else {
            tracing::warn!("Skipping hourly point with bad time {:?}", hourly.time[i]);
            continue;
        };
        let (Some(temperature_c), Some(weather_code)) =
            (hourly.temperature_2m[i], code(hourly.weather_code[i]))
        else {
            tracing::debug!("Skipping incomplete hourly point at {}", time);
            continue;
        };
        points.push(HourlyPoint {
            time,
            temperature_c,
            precipitation_probability_pct: hourly.precipitation_probability[i],
            weather_code,
            description: wmo_description(weather_code).map(str::to_string),
        });
    }

    let hour_start = now.duration_trunc(Duration::hours(1)).unwrap_or(now);
    strictly_ascending("hourly", points, |point| point.time)
        .into_iter()
        .filter(|point| point.time >= hour_start)
        .take(MAX_HOURLY_POINTS)
        .collect()
}

/// Daily points from today, at most 7.
pub fn merge_daily(daily: &OpenMeteoDaily, now: DateTime<Utc>) -> Vec<DailyPoint> {
    let len = shortest(
        "Daily",
        &[
            daily.time.len(),
            daily.weather_code.len(),
            daily.temperature_2m_max.len(),
            daily.temperature_2m_min.len(),
        ],
    );

    let mut points = Vec::with_capacity(len);
    for i in 0..len {
        let Ok(date) = NaiveDate::parse_from_str(daily.time[i].trim(), "%Y-%m-%d") else {
            tracing::warn!("Skipping daily point with bad date {:?}", daily.time[i]);
            continue;
        };
        let (Some(temp_high_c), Some(temp_low_c), Some(weather_code)) = (
            daily.temperature_2m_max[i],
            daily.temperature_2m_min[i],
            code(daily.weather_code[i]),
        ) else {
            tracing::debug!("Skipping incomplete daily point for {}", date);
            continue;
        };
        points.push(DailyPoint {
            date,
            temp_high_c,
            temp_low_c,
            weather_code,
        });
    }

    let today = now.date_naive();
    strictly_ascending("daily", points, |point| point.date)
        .into_iter()
        .filter(|point| point.date >= today)
        .take(MAX_DAILY_POINTS)
        .collect()
}

pub fn convert_current(current: &OpenMeteoCurrent) -> Option<CurrentPoint> {
    let time = parse_utc_minutes(&current.time, OPENMETEO_TIME_FORMAT)?;
    let weather_code = code(current.weather_code);
    Some(CurrentPoint {
        time,
        temperature_c: current.temperature_2m,
        humidity_pct: current.relative_humidity_2m,
        wind_speed_kmh: current.wind_speed_10m,
        wind_direction_deg: current.wind_direction_10m,
        pressure_hpa: current.pressure_msl,
        precipitation_mm: current.precipitation,
        weather_code,
        description: weather_code.and_then(wmo_description).map(str::to_string),
    })
}

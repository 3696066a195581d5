use super::fetch::{fetch_cached, FetchPlan};
use super::station::fetch_plz_detail;
use super::types::{PlzDetailResponse, PlzWarning};
use super::Upstream;
use crate::cache::{cache_key, RecordCache, ALERTS_TTL};
use crate::error::FetchError;
use crate::model::{warn_level_label, Alert, AlertSet, Fetched, WarnType};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// MeteoSwiss warnings for one postal code.
#[derive(Debug, Clone)]
pub struct AlertFetcher {
    upstream: Upstream,
    cache: Arc<RecordCache>,
    app_base_url: String,
    postal_code: String,
}

impl AlertFetcher {
    pub fn new(
        upstream: Upstream,
        cache: Arc<RecordCache>,
        app_base_url: impl Into<String>,
        postal_code: impl Into<String>,
    ) -> Self {
        Self {
            upstream,
            cache,
            app_base_url: app_base_url.into(),
            postal_code: postal_code.into(),
        }
    }

    pub fn cache_key(&self) -> String {
        cache_key("alerts", &[&self.postal_code])
    }

    pub async fn fetch(&self, cancel: &CancellationToken) -> Result<Fetched<AlertSet>, FetchError> {
        let key = self.cache_key();
        fetch_cached(
            FetchPlan {
                cache: &self.cache,
                key: &key,
                ttl: ALERTS_TTL,
                retry: &self.upstream.retry,
                cancel,
            },
            || async {
                let detail =
                    fetch_plz_detail(&self.upstream, &self.app_base_url, &self.postal_code).await?;
                let alerts = parse_alerts(&detail, &self.postal_code, Utc::now());
                tracing::info!(
                    "Found {} alerts for postal code {}",
                    alerts.alerts.len(),
                    self.postal_code
                );
                Ok(alerts)
            },
        )
        .await
    }
}

fn epoch_ms(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

fn parse_warning(warning: &PlzWarning, postal_code: &str, now: DateTime<Utc>) -> Option<Alert> {
    let type_code = warning.warn_type.unwrap_or(0);
    let Some(warn_type) = WarnType::from_code(type_code) else {
        tracing::warn!("Skipping warning with unknown type {}", type_code);
        return None;
    };

    let level = warning.warn_level.unwrap_or(0);
    if !(1..=5).contains(&level) {
        tracing::warn!("Skipping {} warning with level {}", warn_type.label(), level);
        return None;
    }
    let warn_level = level as u8;

    let valid_from_ms = warning.valid_from.filter(|&ms| ms > 0);
    let valid_from = valid_from_ms.and_then(epoch_ms).unwrap_or(now);
    let valid_to = warning.valid_to.filter(|&ms| ms > 0).and_then(epoch_ms);

    let alert_id = format!(
        "{}_{}_{}_{}",
        postal_code,
        warn_level,
        type_code,
        valid_from_ms.map_or_else(|| "now".to_string(), |ms| ms.to_string())
    );

    Some(Alert {
        alert_id,
        warn_type,
        warn_level,
        title: format!("{} - {}", warn_type.label(), warn_level_label(warn_level)),
        description: warning.text.trim().to_string(),
        valid_from,
        valid_to,
        is_outlook: warning.outlook,
    })
}

/// `warnings` may be absent, a list, or a single object.
pub fn parse_alerts(detail: &PlzDetailResponse, postal_code: &str, now: DateTime<Utc>) -> AlertSet {
    let records: Vec<&Value> = match &detail.warnings {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().collect(),
        Some(object @ Value::Object(_)) => vec![object],
        Some(other) => {
            tracing::warn!("Unexpected warnings format: {}", other);
            Vec::new()
        }
    };

    let mut seen = HashSet::new();
    let mut alerts = Vec::new();
    for record in records {
        let warning: PlzWarning = match serde_json::from_value(record.clone()) {
            Ok(warning) => warning,
            Err(err) => {
                tracing::warn!("Skipping malformed warning: {}", err);
                continue;
            }
        };
        if let Some(alert) = parse_warning(&warning, postal_code, now) {
            if seen.insert(alert.alert_id.clone()) {
                alerts.push(alert);
            } else {
                tracing::debug!("Dropping duplicate alert {}", alert.alert_id);
            }
        }
    }

    AlertSet {
        postal_code: postal_code.to_string(),
        alerts,
        fetched_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn detail(warnings: Value) -> PlzDetailResponse {
        serde_json::from_value(json!({ "warnings": warnings })).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_list_of_warnings() {
        let from = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap().timestamp_millis();
        let to = Utc.with_ymd_and_hms(2024, 6, 1, 18, 0, 0).unwrap().timestamp_millis();
        let set = parse_alerts(
            &detail(json!([
                { "warnType": 2, "warnLevel": 3, "validFrom": from, "validTo": to, "text": "Heavy rain" },
                { "warnType": 1, "warnLevel": 2, "validFrom": from, "outlook": true },
            ])),
            "8001",
            now(),
        );

        assert_eq!(set.alerts.len(), 2);
        let rain = &set.alerts[0];
        assert_eq!(rain.alert_id, format!("8001_3_2_{}", from));
        assert_eq!(rain.warn_type, WarnType::Rain);
        assert_eq!(rain.title, "Rain - Level 3 - Significant danger");
        assert_eq!(rain.description, "Heavy rain");
        assert!(set.critical_alert(now()));
        assert!(set.alerts[1].is_outlook);
    }

    #[test]
    fn test_single_object_is_tolerated() {
        let set = parse_alerts(&detail(json!({ "warnType": 4, "warnLevel": 2 })), "3000", now());
        assert_eq!(set.alerts.len(), 1);
        assert_eq!(set.alerts[0].alert_id, "3000_2_4_now");
        assert_eq!(set.alerts[0].valid_from, now());
        assert!(set.any_alert(now()));
        assert!(!set.critical_alert(now()));
    }

    #[test]
    fn test_invalid_records_are_skipped() {
        let set = parse_alerts(
            &detail(json!([
                { "warnType": 7, "warnLevel": 3 },
                { "warnType": 2, "warnLevel": 9 },
                { "warnType": "rain" },
                { "warnType": 11, "warnLevel": 5, "validFrom": 1717236000000i64 },
                { "warnType": 11, "warnLevel": 5, "validFrom": 1717236000000i64 },
            ])),
            "8001",
            now(),
        );
        assert_eq!(set.alerts.len(), 1);
        assert_eq!(set.alerts[0].warn_type, WarnType::Flood);
    }

    #[test]
    fn test_missing_warnings_means_no_alerts() {
        let detail: PlzDetailResponse = serde_json::from_value(json!({})).unwrap();
        let set = parse_alerts(&detail, "8001", now());
        assert!(set.alerts.is_empty());
        assert!(!set.any_alert(now()));
    }
}

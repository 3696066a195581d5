pub mod alerts;
pub mod fetch;
pub mod merge;
pub mod openmeteo;
pub mod pollen;
pub mod station;
pub mod types;

use crate::error::FetchError;
use crate::retry::RetryPolicy;
use crate::transport::Transport;
use serde::de::DeserializeOwned;
use std::sync::Arc;

pub use alerts::AlertFetcher;
pub use openmeteo::{OpenMeteoCurrentFetcher, OpenMeteoForecastFetcher};
pub use pollen::PollenFetcher;
pub use station::{StationCatalogFetcher, StationFetcher};

/// What every fetcher needs to reach its upstream.
#[derive(Clone)]
pub struct Upstream {
    pub transport: Arc<dyn Transport>,
    pub retry: RetryPolicy,
}

impl Upstream {
    pub fn new(transport: Arc<dyn Transport>, retry: RetryPolicy) -> Self {
        Self { transport, retry }
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, FetchError> {
        let body = self.transport.get(url, query).await?;
        let parsed = serde_json::from_slice(&body)?;
        Ok(parsed)
    }

    pub async fn get_bytes(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<u8>, FetchError> {
        self.transport.get(url, query).await
    }
}

impl std::fmt::Debug for Upstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upstream").field("retry", &self.retry).finish()
    }
}

/// Fixed-format reference timestamps and Open-Meteo ISO times carry no zone;
/// both are UTC.
pub(crate) fn parse_utc_minutes(raw: &str, format: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    chrono::NaiveDateTime::parse_from_str(raw.trim(), format)
        .ok()
        .map(|naive| naive.and_utc())
}

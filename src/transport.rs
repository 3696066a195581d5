use crate::error::FetchError;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = "MeteoSwissCore/0.1";

/// One HTTP GET returning the raw body. Non-2xx statuses are errors.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<Vec<u8>, FetchError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_timeout(REQUEST_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

fn classify(err: reqwest::Error, url: &str) -> FetchError {
    if err.is_timeout() {
        FetchError::NetworkTimeout(url.to_string())
    } else if let Some(status) = err.status() {
        FetchError::UpstreamHttp {
            status: status.as_u16(),
            url: url.to_string(),
        }
    } else {
        FetchError::Network(err.to_string())
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<Vec<u8>, FetchError> {
        tracing::debug!("GET {} {:?}", url, query);

        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|err| classify(err, url))?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!("HTTP {} from {}", status, url);
            return Err(FetchError::UpstreamHttp {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response.bytes().await.map_err(|err| classify(err, url))?;
        Ok(body.to_vec())
    }
}

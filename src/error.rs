use thiserror::Error;

/// Errors raised while talking to an upstream provider.
///
/// The type is `Clone` so coordinators can keep the last failure around
/// next to the last good snapshot.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("Request to {0} timed out")]
    NetworkTimeout(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP {status} from {url}")]
    UpstreamHttp { status: u16, url: String },
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("No data available for '{key}': {source}")]
    NoDataAvailable {
        key: String,
        #[source]
        source: Box<FetchError>,
    },
    #[error("Fetch cancelled")]
    Cancelled,
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl FetchError {
    /// Timeouts, connection failures, 5xx, 408 and 429 are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NetworkTimeout(_) | Self::Network(_) => true,
            Self::UpstreamHttp { status, .. } => {
                (500..=599).contains(status) || *status == 408 || *status == 429
            }
            _ => false,
        }
    }

    pub fn parse(detail: impl Into<String>) -> Self {
        Self::Parse(detail.into())
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(format!("JSON parsing failed: {}", err))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Invalid cache key: {0:?}")]
    InvalidKey(String),
}

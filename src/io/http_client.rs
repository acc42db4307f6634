use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::trace;

use crate::error::FetchError;

/// Default User-Agent string for page and tile requests.
///
/// Some tile servers reject requests that carry no User-Agent at all.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (compatible; deepzoom-harvest/0.1; +https://crates.io/crates/deepzoom-harvest)";

/// Minimal HTTP capability consumed by detection, probing and download.
///
/// Every call carries its own timeout: probes use short ones, tile downloads
/// long ones. Implementations must be thread-safe; the downloader shares one
/// client across all of its workers.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Issue a HEAD request. `Ok(())` means the resource exists (2xx).
    async fn head(&self, url: &str, timeout: Duration) -> Result<(), FetchError>;

    /// Issue a GET request and return the full body of a 2xx response.
    async fn get(&self, url: &str, timeout: Duration) -> Result<Bytes, FetchError>;
}

/// [`HttpClient`] backed by `reqwest`.
#[derive(Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    /// Create a client with the default User-Agent.
    pub fn new() -> Result<Self, FetchError> {
        Self::with_user_agent(DEFAULT_USER_AGENT)
    }

    /// Create a client with a custom User-Agent.
    pub fn with_user_agent(user_agent: &str) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| FetchError::Connection(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

fn map_reqwest_error(url: &str, timeout: Duration, err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }
    } else {
        FetchError::Connection(err.to_string())
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn head(&self, url: &str, timeout: Duration) -> Result<(), FetchError> {
        let response = self
            .client
            .head(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| map_reqwest_error(url, timeout, e))?;

        let status = response.status();
        trace!(url = url, status = status.as_u16(), "HEAD");

        if status.is_success() {
            Ok(())
        } else {
            Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            })
        }
    }

    async fn get(&self, url: &str, timeout: Duration) -> Result<Bytes, FetchError> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| map_reqwest_error(url, timeout, e))?;

        let status = response.status();
        trace!(url = url, status = status.as_u16(), "GET");

        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response
            .bytes()
            .await
            .map_err(|e| map_reqwest_error(url, timeout, e))
    }
}

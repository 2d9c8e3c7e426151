//! The seam between the politeness engine and whatever performs HTTP requests.
//!
//! [`crate::crawl_politely`] only needs something that implements
//! [`Fetcher`]. [`ReqwestFetcher`] is the default; tests and embedders can
//! plug in their own.

mod retry;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub(crate) use retry::RetryExt;

use crate::{ErrorKind, PolitenessConfig, Response, Result};

/// Why a fetch produced no response
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FetchError {
    /// The HTTP client failed
    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),

    /// No response arrived in time
    #[error("Request timed out")]
    Timeout,

    /// A failure that may go away on its own, e.g. a dropped connection
    #[error("Transient failure: {0}")]
    Transient(String),

    /// A failure that retrying will not fix
    #[error("{0}")]
    Fatal(String),
}

impl FetchError {
    /// Whether another attempt could succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.should_retry()
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(e)
        }
    }
}

/// Performs a single GET request
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch `url` and read the whole response.
    ///
    /// Any status code is a successful fetch; only transport failures are
    /// errors.
    async fn fetch(&self, url: &Url) -> std::result::Result<Response, FetchError>;
}

/// [`Fetcher`] backed by a `reqwest` client
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    /// Build a client with the configured user agent and fetch timeout
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &PolitenessConfig) -> Result<Self> {
        let client = http_client(&config.robots.user_agent, config.fetch_timeout)?;
        Ok(Self { client })
    }

    /// Use an existing client, e.g. one with a proxy or cookie store
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, url: &Url) -> std::result::Result<Response, FetchError> {
        let response = self.client.get(url.clone()).send().await?;
        Ok(Response::from_reqwest(response).await?)
    }
}

/// The HTTP client used for robots.txt and page fetches
pub(crate) fn http_client(user_agent: &str, timeout: Duration) -> Result<reqwest::Client> {
    reqwest::ClientBuilder::new()
        .gzip(true)
        .user_agent(user_agent)
        .timeout(timeout)
        .build()
        .map_err(ErrorKind::BuildClient)
}

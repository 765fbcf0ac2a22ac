//! Upstream HTTP client.

use std::time::Duration;

use axum::http::{HeaderMap, Method};
use url::Url;

use crate::config::{TimeoutConfig, UpstreamConfig};

/// Shared client for every request to a remote origin.
///
/// Cheap to clone; all clones share one connection pool.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    inner: reqwest::Client,
}

impl UpstreamClient {
    pub fn new(upstream: &UpstreamConfig, timeouts: &TimeoutConfig) -> Result<Self, reqwest::Error> {
        let inner = reqwest::Client::builder()
            .user_agent(upstream.user_agent.clone())
            .connect_timeout(Duration::from_secs(timeouts.connect_secs))
            .pool_idle_timeout(Duration::from_secs(timeouts.idle_secs))
            .build()?;
        Ok(Self { inner })
    }

    /// Issue `method url` with exactly `headers`; the body is left unread.
    pub async fn request(
        &self,
        method: Method,
        url: &Url,
        headers: HeaderMap,
    ) -> Result<reqwest::Response, reqwest::Error> {
        tracing::debug!(method = %method, url = %url, "Upstream request");
        self.inner
            .request(method, url.clone())
            .headers(headers)
            .send()
            .await
    }
}

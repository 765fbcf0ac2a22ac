//! Objects under a remote base URL.
//!
//! Each resolution issues one HEAD to learn the object's size and
//! modification time; the bytes are fetched later by the dispatcher. When the
//! HEAD carries no `Content-Length`, a one-byte ranged GET recovers the total
//! from `Content-Range`. An object whose size stays unknown is only ever
//! passed through, since every other strategy serves exactly `size` bytes.

use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use axum::http::header::{CONTENT_LENGTH, CONTENT_RANGE, LAST_MODIFIED, RANGE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use url::Url;

use crate::error::{ProxyError, Result};
use crate::net::UpstreamClient;
use crate::proxy::{FileObject, Link, ParallelHints, RangeSupport, RemoteLink};
use crate::storage::{safe_segments, LinkResolver, Resolved};

#[derive(Debug, Clone)]
pub struct HttpStorage {
    client: UpstreamClient,
    base: Url,
    headers: HeaderMap,
    parallel: Option<ParallelHints>,
    range: RangeSupport,
}

impl HttpStorage {
    pub fn new(client: UpstreamClient, base: Url, headers: HeaderMap) -> Self {
        Self {
            client,
            base,
            headers,
            parallel: None,
            range: RangeSupport::Unresolved,
        }
    }

    pub fn with_parallel(mut self, parallel: Option<ParallelHints>) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_range(mut self, range: RangeSupport) -> Self {
        self.range = range;
        self
    }

    /// `base` with the segments of `path` appended, each percent-encoded.
    fn object_url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ProxyError::Config(format!("{} cannot be a base URL", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Total size from a `bytes=0-0` GET, for origins whose HEAD omits it.
    async fn ranged_size(&self, url: &Url) -> Result<Option<u64>> {
        let mut headers = self.headers.clone();
        headers.insert(RANGE, HeaderValue::from_static("bytes=0-0"));
        let response = self.client.request(Method::GET, url, headers).await?;
        // The body is dropped unread, closing the connection.
        let size = match response.status() {
            StatusCode::PARTIAL_CONTENT | StatusCode::RANGE_NOT_SATISFIABLE => {
                header_u64(response.headers(), CONTENT_RANGE, complete_length)
            }
            StatusCode::OK => header_u64(response.headers(), CONTENT_LENGTH, |v| v.parse().ok()),
            _ => None,
        };
        Ok(size)
    }
}

fn header_u64(headers: &HeaderMap, name: HeaderName, parse: impl Fn(&str) -> Option<u64>) -> Option<u64> {
    headers.get(name).and_then(|v| v.to_str().ok()).and_then(parse)
}

/// The complete length in `bytes 0-0/1234` or `bytes */1234`.
fn complete_length(content_range: &str) -> Option<u64> {
    let (_, total) = content_range.strip_prefix("bytes ")?.split_once('/')?;
    total.trim().parse().ok()
}

#[async_trait]
impl LinkResolver for HttpStorage {
    async fn resolve(&self, path: &str) -> Result<Resolved> {
        let segments = safe_segments(path)?;
        let url = self.object_url(&segments)?;

        let response = self.client.request(Method::HEAD, &url, self.headers.clone()).await?;
        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND | StatusCode::GONE => return Err(ProxyError::NotFound(path.to_string())),
            status => return Err(ProxyError::UpstreamStatus { status, url: url.to_string() }),
        }

        // HEAD bodies are empty, so the size comes from the header itself.
        let size = match header_u64(response.headers(), CONTENT_LENGTH, |v| v.parse().ok()) {
            Some(size) => Some(size),
            None => self.ranged_size(&url).await?,
        };
        let mod_time = response
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| httpdate::parse_http_date(v).ok())
            .unwrap_or(UNIX_EPOCH);

        let name = segments.last().copied().unwrap_or(path);
        let link = RemoteLink::new(url.clone()).with_headers(self.headers.clone());
        let (link, size) = match size {
            Some(size) => (link.with_hints(self.parallel).with_range(self.range), size),
            None => {
                tracing::warn!(url = %url, "Origin reports no object size, serving by passthrough");
                (link.with_range(RangeSupport::Disabled), 0)
            }
        };

        Ok(Resolved {
            link: Link::Remote(link),
            file: FileObject::new(name, size, mod_time),
            proxy_range: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{TimeoutConfig, UpstreamConfig};

    fn storage(base: &str) -> HttpStorage {
        let client = UpstreamClient::new(&UpstreamConfig::default(), &TimeoutConfig::default()).unwrap();
        HttpStorage::new(client, Url::parse(base).unwrap(), HeaderMap::new())
    }

    #[test]
    fn test_object_url_encodes_segments() {
        let url = storage("https://cdn.test/files/").object_url(&["a dir", "report #1.pdf"]).unwrap();
        assert_eq!(url.as_str(), "https://cdn.test/files/a%20dir/report%20%231.pdf");

        let url = storage("https://cdn.test/files").object_url(&["x.bin"]).unwrap();
        assert_eq!(url.as_str(), "https://cdn.test/files/x.bin");
    }

    #[test]
    fn test_complete_length() {
        assert_eq!(complete_length("bytes 0-0/5000"), Some(5000));
        assert_eq!(complete_length("bytes */0"), Some(0));
        assert_eq!(complete_length("bytes 0-0/*"), None);
        assert_eq!(complete_length("items 0-0/10"), None);
    }
}

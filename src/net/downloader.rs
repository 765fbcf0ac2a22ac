//! Parallel chunked downloads.
//!
//! # Responsibilities
//! - Split a requested byte range into fixed-size parts
//! - Fetch up to `concurrency` parts at once with ranged GETs
//! - Hand parts back strictly in range order
//!
//! # Design Decisions
//! - `buffered` keeps at most `concurrency` parts in flight and yields them in
//!   submission order, so completion order never leaks into the body
//! - The first part is awaited before returning so connect/status errors
//!   surface before any response head is written
//! - Fetches are plain futures owned by the stream: dropping the stream
//!   cancels every in-flight part and closes its connection

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::header::RANGE;
use axum::http::{HeaderMap, Method, StatusCode};
use bytes::Bytes;
use futures_util::stream::{self, StreamExt, TryStreamExt};
use url::Url;

use crate::error::{ProxyError, Result};
use crate::net::client::UpstreamClient;
use crate::net::range_reader::{ByteStream, HttpRange, RangeReader};

pub const DEFAULT_CONCURRENCY: usize = 2;
pub const DEFAULT_PART_SIZE: u64 = 10 * 1024 * 1024;

/// One part of a download: `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Part {
    pub start: u64,
    pub end: u64,
}

impl Part {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    fn range(&self) -> HttpRange {
        HttpRange::new(self.start, self.len())
    }
}

/// Split `[start, end)` into consecutive parts of at most `part_size` bytes.
pub fn plan_parts(start: u64, end: u64, part_size: u64) -> Vec<Part> {
    if start >= end || part_size == 0 {
        return Vec::new();
    }
    let mut parts = Vec::with_capacity(((end - start) / part_size + 1) as usize);
    let mut offset = start;
    while offset < end {
        let next = offset.saturating_add(part_size).min(end);
        parts.push(Part { start: offset, end: next });
        offset = next;
    }
    parts
}

/// Parameters of a single download job.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: Url,
    pub range: HttpRange,
    /// Total object size, used to clamp open-ended ranges.
    pub size: u64,
    pub headers: HeaderMap,
}

/// A configured parallel download job.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: UpstreamClient,
    concurrency: usize,
    part_size: u64,
}

impl Downloader {
    /// Zero values fall back to [`DEFAULT_CONCURRENCY`] / [`DEFAULT_PART_SIZE`].
    pub fn new(client: UpstreamClient, concurrency: usize, part_size: u64) -> Self {
        Self {
            client,
            concurrency: if concurrency == 0 { DEFAULT_CONCURRENCY } else { concurrency },
            part_size: if part_size == 0 { DEFAULT_PART_SIZE } else { part_size },
        }
    }

    pub async fn download(&self, request: DownloadRequest) -> Result<ByteStream> {
        let (start, end) = request.range.bounds(request.size);
        let parts = plan_parts(start, end, self.part_size);
        tracing::debug!(
            url = %request.url,
            start,
            end,
            parts = parts.len(),
            concurrency = self.concurrency,
            "Starting parallel download"
        );

        let client = self.client.clone();
        let target = Arc::new((request.url, request.headers, request.size));
        let mut fetches = stream::iter(parts)
            .map(move |part| {
                let client = client.clone();
                let target = target.clone();
                async move { fetch_part(&client, &target.0, &target.1, target.2, part).await }
            })
            .buffered(self.concurrency)
            .boxed();

        match fetches.next().await {
            None => Ok(stream::empty().boxed()),
            Some(Err(e)) => Err(e),
            Some(Ok(first)) => Ok(stream::once(async move { Ok::<_, io::Error>(first) })
                .chain(fetches.map_err(io::Error::other))
                .boxed()),
        }
    }
}

async fn fetch_part(
    client: &UpstreamClient,
    url: &Url,
    headers: &HeaderMap,
    size: u64,
    part: Part,
) -> Result<Bytes> {
    let mut headers = headers.clone();
    headers.insert(RANGE, part.range().header_value());
    let response = client.request(Method::GET, url, headers).await?;

    let status = response.status();
    let whole = status == StatusCode::OK && part.range().covers(size);
    if status != StatusCode::PARTIAL_CONTENT && !whole {
        return Err(ProxyError::UpstreamStatus { status, url: url.to_string() });
    }

    let body = response.bytes().await?;
    if body.len() as u64 != part.len() {
        return Err(ProxyError::Upstream(format!(
            "part {}-{} of {} returned {} bytes",
            part.start,
            part.end - 1,
            url,
            body.len()
        )));
    }
    Ok(body)
}

/// Range reader backed by a fresh parallel download job per range.
///
/// The request headers are fixed at construction; the dispatcher merges the
/// client's headers with the link's before building one.
pub struct ParallelRangeReader {
    downloader: Downloader,
    url: Url,
    headers: HeaderMap,
    size: u64,
}

impl ParallelRangeReader {
    pub fn new(downloader: Downloader, url: Url, headers: HeaderMap, size: u64) -> Self {
        Self { downloader, url, headers, size }
    }
}

#[async_trait]
impl RangeReader for ParallelRangeReader {
    async fn range_read(&self, range: HttpRange) -> Result<ByteStream> {
        self.downloader
            .download(DownloadRequest {
                url: self.url.clone(),
                range,
                size: self.size,
                headers: self.headers.clone(),
            })
            .await
    }
}

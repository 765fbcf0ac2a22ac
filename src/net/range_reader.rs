//! Range-readable sources.
//!
//! # Responsibilities
//! - Define the byte-range read contract used by the range server
//! - Adapt exclusively-owned seekable handles into range readers
//! - Read ranges from a remote URL with a single ranged GET
//!
//! # Design Decisions
//! - Streams are `'static` boxed streams so they can back a response body
//! - A seekable handle is guarded by an owned mutex held for the lifetime of
//!   the stream it produced; ranges of one handle are read sequentially

use std::io::{self, SeekFrom};
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::header::RANGE;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use bytes::Bytes;
use futures_util::stream::{self, BoxStream};
use futures_util::{StreamExt, TryStreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};
use tokio::sync::{Mutex, OwnedMutexGuard};
use url::Url;

use crate::error::{ProxyError, Result};
use crate::net::client::UpstreamClient;

/// Body chunks flowing from a source to the client.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

const READ_CHUNK: usize = 64 * 1024;

/// A contiguous byte range. `length: None` reads to the end of the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpRange {
    pub start: u64,
    pub length: Option<u64>,
}

impl HttpRange {
    pub fn new(start: u64, length: u64) -> Self {
        Self { start, length: Some(length) }
    }

    /// The whole object, `[0, end)`.
    pub fn full() -> Self {
        Self { start: 0, length: None }
    }

    /// Half-open `[start, end)` bounds clamped to `size`.
    pub fn bounds(&self, size: u64) -> (u64, u64) {
        let start = self.start.min(size);
        let end = match self.length {
            Some(len) => start.saturating_add(len).min(size),
            None => size,
        };
        (start, end)
    }

    /// True when this range covers `[0, size)`.
    pub fn covers(&self, size: u64) -> bool {
        self.start == 0 && self.length.map_or(true, |len| len >= size)
    }

    /// `bytes=start-end` (inclusive end) or `bytes=start-`.
    pub fn header_value(&self) -> HeaderValue {
        let text = match self.length {
            Some(0) | None => format!("bytes={}-", self.start),
            Some(len) => format!("bytes={}-{}", self.start, self.start + len - 1),
        };
        HeaderValue::from_str(&text).expect("range header is ASCII")
    }
}

/// A source that can produce arbitrary byte-range streams.
#[async_trait]
pub trait RangeReader: Send + Sync {
    async fn range_read(&self, range: HttpRange) -> Result<ByteStream>;
}

/// Readable and seekable handle.
pub trait SeekableRead: AsyncRead + AsyncSeek + Send + Unpin {}

impl<T: AsyncRead + AsyncSeek + Send + Unpin> SeekableRead for T {}

/// Range reader over an exclusively owned seekable handle.
pub struct SeekableRangeReader<R> {
    handle: Arc<Mutex<R>>,
    size: u64,
}

impl<R: SeekableRead + 'static> SeekableRangeReader<R> {
    /// Take ownership of `handle`, measuring its size by seeking to the end.
    pub async fn new(mut handle: R) -> io::Result<Self> {
        let size = handle.seek(SeekFrom::End(0)).await?;
        handle.seek(SeekFrom::Start(0)).await?;
        Ok(Self {
            handle: Arc::new(Mutex::new(handle)),
            size,
        })
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

#[async_trait]
impl<R: SeekableRead + 'static> RangeReader for SeekableRangeReader<R> {
    async fn range_read(&self, range: HttpRange) -> Result<ByteStream> {
        let (start, end) = range.bounds(self.size);
        let mut handle = self.handle.clone().lock_owned().await;
        handle.seek(SeekFrom::Start(start)).await?;
        Ok(read_exact_stream(handle, end - start))
    }
}

/// Stream exactly `remaining` bytes out of a locked handle.
fn read_exact_stream<R>(handle: OwnedMutexGuard<R>, remaining: u64) -> ByteStream
where
    R: AsyncRead + Unpin + Send + 'static,
{
    stream::try_unfold((handle, remaining), |(mut handle, remaining)| async move {
        if remaining == 0 {
            return Ok(None);
        }
        let want = remaining.min(READ_CHUNK as u64) as usize;
        let mut buf = vec![0u8; want];
        let n = handle.read(&mut buf).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "source ended before the requested range",
            ));
        }
        buf.truncate(n);
        Ok(Some((Bytes::from(buf), (handle, remaining - n as u64))))
    })
    .boxed()
}

/// Range reader issuing one ranged GET per range against a remote URL.
pub struct HttpRangeReader {
    client: UpstreamClient,
    url: Url,
    headers: HeaderMap,
    size: u64,
}

impl HttpRangeReader {
    pub fn new(client: UpstreamClient, url: Url, headers: HeaderMap, size: u64) -> Self {
        Self { client, url, headers, size }
    }
}

#[async_trait]
impl RangeReader for HttpRangeReader {
    async fn range_read(&self, range: HttpRange) -> Result<ByteStream> {
        let (start, end) = range.bounds(self.size);
        if start >= end {
            // Origins reject any Range on an empty selection with 416.
            return Ok(stream::empty().boxed());
        }
        let mut headers = self.headers.clone();
        headers.insert(RANGE, range.header_value());
        let response = self.client.request(Method::GET, &self.url, headers).await?;

        let status = response.status();
        let accepted = status == StatusCode::PARTIAL_CONTENT
            || (status == StatusCode::OK && range.covers(self.size));
        if !accepted {
            return Err(ProxyError::UpstreamStatus {
                status,
                url: self.url.to_string(),
            });
        }
        Ok(response.bytes_stream().map_err(io::Error::other).boxed())
    }
}

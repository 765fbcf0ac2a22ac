//! Strategy selection and execution.
//!
//! # Responsibilities
//! - Route markdown objects to the render pipeline when enabled
//! - Run exactly one serving strategy per link variant
//! - Apply the shared egress throttle everywhere except OS files
//!
//! # Design Decisions
//! - The markdown flag and the throttle are injected at construction
//! - Strategies 1–3 hand HEAD and conditionals to the range server;
//!   passthrough forwards the method and lets the origin answer
//! - Every handle is owned by the link or the stream built from it and is
//!   released when either is dropped

use std::io;
use std::sync::Arc;

use axum::body::Body;
use axum::http::header::{
    ACCEPT_ENCODING, CONTENT_TYPE, IF_MATCH, IF_MODIFIED_SINCE, IF_NONE_MATCH, IF_RANGE,
    IF_UNMODIFIED_SINCE, RANGE,
};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderName, Method};
use axum::response::Response;
use futures_util::{StreamExt, TryStreamExt};

use crate::config::ProxyConfig;
use crate::error::Result;
use crate::http::headers::attach_headers;
use crate::http::request::merge_headers;
use crate::http::response::{build_response, copy_upstream_headers, log_body_errors};
use crate::http::serve::serve_range;
use crate::net::{Downloader, ParallelRangeReader, RangeReader, SeekableRangeReader, UpstreamClient};
use crate::proxy::link::{LocalFile, LocalLink, ParallelHints, RangedLink, RemoteLink};
use crate::proxy::markdown::MarkdownPipeline;
use crate::proxy::{FileObject, Link};
use crate::render::{AmmoniaSanitizer, PulldownRenderer, Renderer, Sanitizer};
use crate::security::{throttle_stream, RateLimitedRangeReader, Throttle};

pub const DEFAULT_MARKDOWN_MAX_BYTES: usize = 8 * 1024 * 1024;

/// Read-only settings shared by every request.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Serve `.md` objects as sanitized HTML.
    pub render_markdown: bool,
    pub markdown_max_bytes: usize,
    /// Client headers never forwarded upstream.
    pub ignore_headers: Vec<HeaderName>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            render_markdown: false,
            markdown_max_bytes: DEFAULT_MARKDOWN_MAX_BYTES,
            ignore_headers: vec![HeaderName::from_static("authorization"), HeaderName::from_static("referer")],
        }
    }
}

impl DispatcherConfig {
    /// Header names were checked by config validation; any that still fail
    /// to parse are skipped.
    pub fn from_config(config: &ProxyConfig) -> Self {
        let ignore_headers = config
            .upstream
            .ignore_headers
            .iter()
            .filter_map(|name| HeaderName::from_bytes(name.to_ascii_lowercase().as_bytes()).ok())
            .collect();
        Self {
            render_markdown: config.markdown.render,
            markdown_max_bytes: config.markdown.max_bytes,
            ignore_headers,
        }
    }
}

/// Serves one object per call according to its link.
#[derive(Clone)]
pub struct Dispatcher {
    config: DispatcherConfig,
    client: UpstreamClient,
    throttle: Arc<dyn Throttle>,
    markdown: MarkdownPipeline,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig, client: UpstreamClient, throttle: Arc<dyn Throttle>) -> Self {
        let markdown = MarkdownPipeline::new(
            Arc::new(PulldownRenderer::new()),
            Arc::new(AmmoniaSanitizer),
            config.markdown_max_bytes,
        );
        Self { config, client, throttle, markdown }
    }

    /// Replace the markdown renderer and sanitizer.
    pub fn with_markdown(mut self, renderer: Arc<dyn Renderer>, sanitizer: Arc<dyn Sanitizer>) -> Self {
        self.markdown = MarkdownPipeline::new(renderer, sanitizer, self.config.markdown_max_bytes);
        self
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Serve `file` through `link` in answer to `request`.
    ///
    /// Errors before the response head become `Err`; once the head is
    /// produced, a failing source ends the body early.
    pub async fn serve(&self, link: Link, file: &FileObject, request: &Parts) -> Result<Response> {
        if self.config.render_markdown && file.extension().as_deref() == Some("md") {
            tracing::debug!(object = %file.name, "Serving markdown as HTML");
            return self
                .markdown
                .serve(link, file, request, &self.client, &self.config.ignore_headers)
                .await;
        }

        tracing::debug!(object = %file.name, strategy = %link.strategy(), "Dispatching");
        match link {
            Link::Local(local) => self.serve_local(local, file, request).await,
            Link::Ranged(ranged) => self.serve_ranged(ranged, file, request).await,
            Link::Remote(remote) => match remote.parallel {
                Some(hints) => self.serve_parallel(remote, hints, file, request).await,
                None => self.serve_passthrough(remote, file, request).await,
            },
        }
    }

    async fn serve_local(&self, local: LocalLink, file: &FileObject, request: &Parts) -> Result<Response> {
        let mut headers = HeaderMap::new();
        attach_headers(&mut headers, file);
        if let Some(content_type) = local.content_type {
            headers.insert(CONTENT_TYPE, content_type);
        }

        let (source, size): (Arc<dyn RangeReader>, u64) = match local.file {
            LocalFile::Os(handle) => {
                let reader = SeekableRangeReader::new(handle).await?;
                let size = reader.size();
                (Arc::new(reader), size)
            }
            LocalFile::Other(handle) => {
                let reader = SeekableRangeReader::new(handle).await?;
                let size = reader.size();
                (Arc::new(RateLimitedRangeReader::new(Arc::new(reader), self.throttle.clone())), size)
            }
        };
        serve_range(request, headers, &file.name, file.mod_time, size, source).await
    }

    async fn serve_ranged(&self, ranged: RangedLink, file: &FileObject, request: &Parts) -> Result<Response> {
        let mut headers = HeaderMap::new();
        attach_headers(&mut headers, file);
        let source = Arc::new(RateLimitedRangeReader::new(ranged.source, self.throttle.clone()));
        serve_range(request, headers, &file.name, file.mod_time, file.size, source).await
    }

    async fn serve_parallel(
        &self,
        remote: RemoteLink,
        hints: ParallelHints,
        file: &FileObject,
        request: &Parts,
    ) -> Result<Response> {
        let mut headers = HeaderMap::new();
        attach_headers(&mut headers, file);

        let upstream_headers = part_headers(merge_headers(
            &request.headers,
            &remote.headers,
            &self.config.ignore_headers,
        ));
        let downloader = Downloader::new(self.client.clone(), hints.concurrency, hints.part_size);
        let parallel = ParallelRangeReader::new(downloader, remote.url, upstream_headers, file.size);
        let source = Arc::new(RateLimitedRangeReader::new(Arc::new(parallel), self.throttle.clone()));
        serve_range(request, headers, &file.name, file.mod_time, file.size, source).await
    }

    async fn serve_passthrough(&self, remote: RemoteLink, file: &FileObject, request: &Parts) -> Result<Response> {
        let upstream_headers = merge_headers(&request.headers, &remote.headers, &self.config.ignore_headers);
        let upstream = self
            .client
            .request(request.method.clone(), &remote.url, upstream_headers)
            .await?;

        let status = upstream.status();
        let headers = copy_upstream_headers(upstream.headers());
        tracing::debug!(object = %file.name, status = %status, "Passing through origin response");
        if request.method == Method::HEAD {
            return Ok(build_response(status, headers, Body::empty()));
        }

        let stream = upstream.bytes_stream().map_err(io::Error::other).boxed();
        let body = log_body_errors(throttle_stream(stream, self.throttle.clone()), &file.name);
        Ok(build_response(status, headers, Body::from_stream(body)))
    }
}

/// Part fetches carry their own Range; the client's range and validators
/// were already evaluated by the range server, and parts must arrive
/// unencoded for their lengths to check out.
fn part_headers(mut headers: HeaderMap) -> HeaderMap {
    for name in [
        RANGE,
        IF_RANGE,
        IF_MATCH,
        IF_NONE_MATCH,
        IF_MODIFIED_SINCE,
        IF_UNMODIFIED_SINCE,
        ACCEPT_ENCODING,
    ] {
        headers.remove(name);
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{TimeoutConfig, UpstreamConfig};
    use crate::net::{ByteStream, HttpRange};
    use crate::render::RenderError;
    use crate::security::Unlimited;
    use async_trait::async_trait;
    use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, ETAG};
    use axum::http::{HeaderValue, Request, StatusCode};
    use bytes::Bytes;
    use futures_util::stream;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, UNIX_EPOCH};

    struct Memory(Vec<u8>);

    #[async_trait]
    impl RangeReader for Memory {
        async fn range_read(&self, range: HttpRange) -> Result<ByteStream> {
            let (start, end) = range.bounds(self.0.len() as u64);
            let chunk = Bytes::copy_from_slice(&self.0[start as usize..end as usize]);
            Ok(stream::iter(vec![Ok(chunk)]).boxed())
        }
    }

    struct Counting(AtomicUsize);

    #[async_trait]
    impl Throttle for Counting {
        async fn consume(&self, _bytes: usize) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Upper;

    impl Renderer for Upper {
        fn render(&self, markdown: &[u8]) -> std::result::Result<String, RenderError> {
            let text = std::str::from_utf8(markdown).map_err(|_| RenderError::InvalidUtf8)?;
            Ok(format!("<p>{}</p><script>x</script>", text.to_uppercase()))
        }
    }

    struct StripScripts;

    impl Sanitizer for StripScripts {
        fn sanitize(&self, html: &str) -> String {
            html.replace("<script>x</script>", "")
        }
    }

    fn dispatcher(render_markdown: bool, throttle: Arc<dyn Throttle>) -> Dispatcher {
        let client = UpstreamClient::new(&UpstreamConfig::default(), &TimeoutConfig::default()).unwrap();
        let config = DispatcherConfig { render_markdown, ..Default::default() };
        Dispatcher::new(config, client, throttle)
    }

    fn get(headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().method("GET").uri("/x");
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        builder.body(()).unwrap().into_parts().0
    }

    fn object(name: &str, size: u64) -> FileObject {
        FileObject::new(name, size, UNIX_EPOCH + Duration::from_secs(1_700_000_000))
    }

    async fn body(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
    }

    #[tokio::test]
    async fn test_local_handle_is_throttled_and_range_served() {
        let throttle = Arc::new(Counting(AtomicUsize::new(0)));
        let dispatcher = dispatcher(false, throttle.clone());
        let link = Link::Local(LocalLink::new(LocalFile::Other(Box::new(Cursor::new(b"0123456789".to_vec())))));

        let response = dispatcher
            .serve(link, &object("digits.txt", 10), &get(&[("range", "bytes=3-5")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/plain");
        assert!(response.headers().contains_key(CONTENT_DISPOSITION));
        assert_eq!(body(response).await, b"345");
        assert!(throttle.0.load(Ordering::SeqCst) > 0);
    }

    #[tokio::test]
    async fn test_local_content_type_override() {
        let dispatcher = dispatcher(false, Arc::new(Unlimited));
        let link = Link::Local(
            LocalLink::new(LocalFile::Other(Box::new(Cursor::new(b"{}".to_vec()))))
                .with_content_type(HeaderValue::from_static("application/json")),
        );
        let response = dispatcher.serve(link, &object("data.bin", 2), &get(&[])).await.unwrap();
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
    }

    #[tokio::test]
    async fn test_ranged_source_uses_declared_size() {
        let throttle = Arc::new(Counting(AtomicUsize::new(0)));
        let dispatcher = dispatcher(false, throttle.clone());
        let link = Link::Ranged(RangedLink::new(Arc::new(Memory(b"abcdefghij".to_vec()))));
        let file = object("letters.bin", 10).with_hash("sha1", "beef");

        let response = dispatcher.serve(link, &file, &get(&[("range", "bytes=-4")])).await.unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[ETAG], "\"beef\"");
        assert_eq!(body(response).await, b"ghij");
        assert_eq!(throttle.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_markdown_rendered_when_enabled() {
        let dispatcher = dispatcher(true, Arc::new(Unlimited))
            .with_markdown(Arc::new(Upper), Arc::new(StripScripts));
        let link = Link::Ranged(RangedLink::new(Arc::new(Memory(b"hello".to_vec()))));

        let response = dispatcher
            .serve(link, &object("README.MD", 5), &get(&[("range", "bytes=0-1")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/html; charset=utf-8");
        assert_eq!(response.headers()[CONTENT_LENGTH], "12");
        assert_eq!(body(response).await, b"<p>HELLO</p>");
    }

    #[tokio::test]
    async fn test_markdown_raw_when_disabled() {
        let dispatcher = dispatcher(false, Arc::new(Unlimited))
            .with_markdown(Arc::new(Upper), Arc::new(StripScripts));
        let link = Link::Ranged(RangedLink::new(Arc::new(Memory(b"# hi".to_vec()))));

        let response = dispatcher.serve(link, &object("notes.md", 4), &get(&[])).await.unwrap();
        assert_ne!(response.headers()[CONTENT_TYPE], "text/html; charset=utf-8");
        assert_eq!(body(response).await, b"# hi");
    }

    #[tokio::test]
    async fn test_markdown_invalid_utf8_is_render_error() {
        let dispatcher = dispatcher(true, Arc::new(Unlimited));
        let link = Link::Ranged(RangedLink::new(Arc::new(Memory(vec![0xff, 0xfe]))));
        let err = dispatcher.serve(link, &object("bad.md", 2), &get(&[])).await.unwrap_err();
        assert!(matches!(err, crate::error::ProxyError::Render(RenderError::InvalidUtf8)));
    }

    #[test]
    fn test_part_headers_strip_validators() {
        let mut headers = HeaderMap::new();
        headers.insert(RANGE, HeaderValue::from_static("bytes=0-1"));
        headers.insert(IF_NONE_MATCH, HeaderValue::from_static("\"a\""));
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
        headers.insert("x-token", HeaderValue::from_static("t"));
        let headers = part_headers(headers);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers["x-token"], "t");
    }

    #[test]
    fn test_config_from_proxy_config() {
        let mut config = ProxyConfig::default();
        config.markdown.render = true;
        config.upstream.ignore_headers = vec!["Authorization".into(), "X-Forwarded-For".into()];
        let dispatcher_config = DispatcherConfig::from_config(&config);
        assert!(dispatcher_config.render_markdown);
        assert_eq!(
            dispatcher_config.ignore_headers,
            vec![HeaderName::from_static("authorization"), HeaderName::from_static("x-forwarded-for")]
        );
    }
}

//! The markdown short-circuit.
//!
//! Markdown objects are delivered as sanitized HTML instead of raw bytes.
//! The whole document is materialized from whatever source the link offers,
//! rendered, sanitized and sent as one `text/html` body. No range or
//! conditional negotiation happens on this path.

use std::io;
use std::sync::Arc;

use axum::body::Body;
use axum::http::header::{ACCEPT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, IF_RANGE, RANGE};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::Response;
use futures_util::{StreamExt, TryStreamExt};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::Result;
use crate::http::headers::attach_headers;
use crate::http::request::merge_headers;
use crate::http::response::{build_response, copy_upstream_headers};
use crate::net::{ByteStream, HttpRange, UpstreamClient};
use crate::observability::metrics;
use crate::proxy::link::{Link, LocalFile};
use crate::proxy::object::FileObject;
use crate::render::{RenderError, Renderer, Sanitizer};

/// Render and sanitize stages plus the input size cap.
#[derive(Clone)]
pub struct MarkdownPipeline {
    renderer: Arc<dyn Renderer>,
    sanitizer: Arc<dyn Sanitizer>,
    max_bytes: usize,
}

impl MarkdownPipeline {
    pub fn new(renderer: Arc<dyn Renderer>, sanitizer: Arc<dyn Sanitizer>, max_bytes: usize) -> Self {
        Self { renderer, sanitizer, max_bytes }
    }

    /// Serve `link` as rendered HTML.
    ///
    /// Local and range sources answer 200 with the object's identity headers.
    /// Remote links are fetched once and keep the origin's status and
    /// headers; a HEAD stops after the origin's head.
    pub async fn serve(
        &self,
        link: Link,
        file: &FileObject,
        request: &Parts,
        client: &UpstreamClient,
        ignore: &[HeaderName],
    ) -> Result<Response> {
        let (status, mut headers, markdown) = match link {
            Link::Local(local) => {
                let mut headers = HeaderMap::new();
                attach_headers(&mut headers, file);
                let markdown = match local.file {
                    LocalFile::Os(file) => read_capped(file, self.max_bytes).await?,
                    LocalFile::Other(handle) => read_capped(handle, self.max_bytes).await?,
                };
                (StatusCode::OK, headers, markdown)
            }
            Link::Ranged(ranged) => {
                let mut headers = HeaderMap::new();
                attach_headers(&mut headers, file);
                let stream = ranged.source.range_read(HttpRange::full()).await?;
                (StatusCode::OK, headers, collect_capped(stream, self.max_bytes).await?)
            }
            Link::Remote(remote) => {
                let mut upstream_headers = merge_headers(&request.headers, &remote.headers, ignore);
                // The whole, unencoded document is needed to render it.
                upstream_headers.remove(RANGE);
                upstream_headers.remove(IF_RANGE);
                upstream_headers.remove(ACCEPT_ENCODING);

                let upstream = client
                    .request(request.method.clone(), &remote.url, upstream_headers)
                    .await?;
                let status = upstream.status();
                let headers = copy_upstream_headers(upstream.headers());
                if request.method == Method::HEAD {
                    return Ok(build_response(status, headers, Body::empty()));
                }
                let stream: ByteStream = upstream.bytes_stream().map_err(io::Error::other).boxed();
                (status, headers, collect_capped(stream, self.max_bytes).await?)
            }
        };

        let html = match self.render(&markdown) {
            Ok(html) => {
                metrics::record_markdown_render("ok");
                html
            }
            Err(e) => {
                metrics::record_markdown_render("error");
                return Err(e.into());
            }
        };
        tracing::debug!(object = %file.name, markdown_bytes = markdown.len(), html_bytes = html.len(), "Rendered markdown");

        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"));
        headers.insert(CONTENT_LENGTH, HeaderValue::from(html.len()));
        let body = if request.method == Method::HEAD {
            Body::empty()
        } else {
            Body::from(html)
        };
        Ok(build_response(status, headers, body))
    }

    fn render(&self, markdown: &[u8]) -> std::result::Result<String, RenderError> {
        let html = self.renderer.render(markdown)?;
        Ok(self.sanitizer.sanitize(&html))
    }
}

async fn read_capped<R>(reader: R, limit: usize) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    reader.take(limit as u64 + 1).read_to_end(&mut buf).await?;
    if buf.len() > limit {
        return Err(RenderError::TooLarge { limit }.into());
    }
    Ok(buf)
}

async fn collect_capped(mut stream: ByteStream, limit: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if buf.len() + chunk.len() > limit {
            return Err(RenderError::TooLarge { limit }.into());
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf)
}

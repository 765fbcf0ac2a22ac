//! Response assembly.
//!
//! # Responsibilities
//! - Build responses from a status, a header map and a body
//! - Copy an origin's end-to-end headers for passthrough
//! - Log body errors that happen after the response head was sent
//!
//! # Design Decisions
//! - Streaming responses avoid buffering entire body
//! - Hop-by-hop headers stripped automatically

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use futures_util::TryStreamExt;

use crate::http::request::is_hop_by_hop;
use crate::net::ByteStream;

pub fn build_response(status: StatusCode, headers: HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// End-to-end headers of an upstream response, in order, duplicates kept.
pub fn copy_upstream_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(upstream.len());
    for (name, value) in upstream {
        if !is_hop_by_hop(name) {
            headers.append(name.clone(), value.clone());
        }
    }
    headers
}

/// Once the head is out, a failing body can only abort the connection; make
/// sure the cause reaches the logs first.
pub fn log_body_errors(stream: ByteStream, name: &str) -> ByteStream {
    let name = name.to_string();
    Box::pin(stream.inspect_err(move |e| {
        tracing::warn!(object = %name, error = %e, "Transfer aborted mid-body");
    }))
}

//! Inbound request handling.
//!
//! # Responsibilities
//! - Tag every request with an `x-request-id` (UUID v4) and echo it back
//! - Build the header set forwarded to a remote origin
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - Hop-by-hop headers and `Host` never cross the proxy
//! - Link headers (credentials, referer the origin expects) override the
//!   client's

use axum::http::header::{
    CONNECTION, HOST, PROXY_AUTHENTICATE, PROXY_AUTHORIZATION, TE, TRAILER, TRANSFER_ENCODING,
    UPGRADE,
};
use axum::http::{HeaderMap, HeaderName};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Assigns a request ID to requests that arrive without one.
pub fn set_request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid)
}

/// Copies the request ID onto the response.
pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::new(X_REQUEST_ID)
}

/// The request ID, or `"unknown"` outside the request-id layer.
pub fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}

/// True for headers that describe a single connection, not the message.
pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    name == CONNECTION
        || name == TE
        || name == TRAILER
        || name == TRANSFER_ENCODING
        || name == UPGRADE
        || name == PROXY_AUTHENTICATE
        || name == PROXY_AUTHORIZATION
        || name.as_str() == "keep-alive"
}

/// Headers listed in `Connection` are hop-by-hop as well.
fn connection_tokens(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
        .collect()
}

/// Headers sent upstream: the client's, minus `ignore`, hop-by-hop headers
/// and `Host`, with every header of the link replacing the client's value.
pub fn merge_headers(client: &HeaderMap, link: &HeaderMap, ignore: &[HeaderName]) -> HeaderMap {
    let listed = connection_tokens(client);
    let mut merged = HeaderMap::with_capacity(client.len() + link.len());

    for (name, value) in client {
        if name == HOST
            || is_hop_by_hop(name)
            || ignore.contains(name)
            || listed.iter().any(|token| token == name.as_str())
        {
            continue;
        }
        merged.append(name.clone(), value.clone());
    }

    for name in link.keys() {
        merged.remove(name);
        for value in link.get_all(name) {
            merged.append(name.clone(), value.clone());
        }
    }
    merged
}

//! Range and conditional-request negotiation for a range-readable source.
//!
//! # Responsibilities
//! - Evaluate If-Match / If-Unmodified-Since / If-None-Match /
//!   If-Modified-Since / If-Range against the ETag and modification time
//! - Answer 200, 206 (single or `multipart/byteranges`), 304, 412 or 416
//! - Open the source only for the ranges actually sent; never for HEAD
//!
//! # Design Decisions
//! - The ETag is read from the headers already attached for the object
//! - Range sets larger than the object are served as full content
//! - Single-range bodies are opened before the head is produced, so source
//!   errors still become an error response; multipart parts open lazily

use std::io;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::http::header::{
    ACCEPT_RANGES, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, ETAG,
    IF_MATCH, IF_MODIFIED_SINCE, IF_NONE_MATCH, IF_RANGE, IF_UNMODIFIED_SINCE, LAST_MODIFIED,
    RANGE,
};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use futures_util::stream::{self, StreamExt, TryStreamExt};

use crate::error::Result;
use crate::http::headers::mime_type_for;
use crate::http::range::{parse_range, total_length, RangeError};
use crate::http::response::{build_response, log_body_errors};
use crate::net::{HttpRange, RangeReader};

/// Outcome of a single precondition header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cond {
    None,
    True,
    False,
}

/// Serve `source` (`size` bytes) honoring Range and conditional headers.
///
/// `headers` carries the identity headers attached for the object and is
/// extended with Accept-Ranges, Last-Modified, Content-Length and, for
/// partial responses, Content-Range.
pub async fn serve_range(
    request: &Parts,
    mut headers: HeaderMap,
    name: &str,
    mod_time: SystemTime,
    size: u64,
    source: Arc<dyn RangeReader>,
) -> Result<Response> {
    let modified = truncate_to_secs(mod_time);
    let etag = headers
        .get(ETAG)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let honor_range = match check_preconditions(request, etag.as_deref(), modified) {
        Precondition::Failed => {
            return Ok(build_response(StatusCode::PRECONDITION_FAILED, HeaderMap::new(), Body::empty()));
        }
        Precondition::NotModified => return Ok(not_modified(headers)),
        Precondition::Proceed { honor_range } => honor_range,
    };

    if let Some(modified) = modified {
        if let Ok(value) = HeaderValue::from_str(&httpdate::fmt_http_date(modified)) {
            headers.insert(LAST_MODIFIED, value);
        }
    }
    if !headers.contains_key(CONTENT_TYPE) {
        if let Ok(value) = HeaderValue::from_str(&mime_type_for(name)) {
            headers.insert(CONTENT_TYPE, value);
        }
    }
    headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));

    let range_header = if honor_range {
        request
            .headers
            .get(RANGE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
    } else {
        ""
    };

    let mut ranges = match parse_range(range_header, size) {
        Ok(ranges) => ranges,
        Err(e) => return Ok(range_not_satisfiable(e, size)),
    };
    if total_length(&ranges) > size {
        // The client asked for more than the object itself; send it whole.
        ranges.clear();
    }

    let is_head = request.method == Method::HEAD;
    match ranges.as_slice() {
        [] => {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(size));
            // An empty object has no byte a source could be asked for.
            let body = if is_head || size == 0 {
                Body::empty()
            } else {
                open_body(&source, HttpRange::new(0, size), name).await?
            };
            Ok(build_response(StatusCode::OK, headers, body))
        }
        [range] => {
            let length = range.length.unwrap_or(0);
            headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
            headers.insert(CONTENT_RANGE, content_range(range.start, length, size));
            let body = if is_head {
                Body::empty()
            } else {
                open_body(&source, *range, name).await?
            };
            Ok(build_response(StatusCode::PARTIAL_CONTENT, headers, body))
        }
        _ => {
            let part_type = headers
                .get(CONTENT_TYPE)
                .cloned()
                .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
            let multipart = Multipart::new(&ranges, size, &part_type);

            headers.insert(CONTENT_LENGTH, HeaderValue::from(multipart.content_length()));
            if let Ok(value) = HeaderValue::from_str(&format!(
                "multipart/byteranges; boundary={}",
                multipart.boundary
            )) {
                headers.insert(CONTENT_TYPE, value);
            }
            let body = if is_head {
                Body::empty()
            } else {
                Body::from_stream(log_body_errors(multipart.into_stream(source), name))
            };
            Ok(build_response(StatusCode::PARTIAL_CONTENT, headers, body))
        }
    }
}

async fn open_body(source: &Arc<dyn RangeReader>, range: HttpRange, name: &str) -> Result<Body> {
    let stream = source.range_read(range).await?;
    Ok(Body::from_stream(log_body_errors(stream, name)))
}

fn content_range(start: u64, length: u64, size: u64) -> HeaderValue {
    let end = (start + length).saturating_sub(1);
    HeaderValue::from_str(&format!("bytes {}-{}/{}", start, end, size))
        .unwrap_or_else(|_| HeaderValue::from_static("bytes */0"))
}

fn range_not_satisfiable(err: RangeError, size: u64) -> Response {
    let mut headers = HeaderMap::new();
    if err == RangeError::NoOverlap {
        if let Ok(value) = HeaderValue::from_str(&format!("bytes */{}", size)) {
            headers.insert(CONTENT_RANGE, value);
        }
    }
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    build_response(StatusCode::RANGE_NOT_SATISFIABLE, headers, Body::from(err.to_string()))
}

fn not_modified(mut headers: HeaderMap) -> Response {
    headers.remove(CONTENT_TYPE);
    headers.remove(CONTENT_LENGTH);
    headers.remove(CONTENT_ENCODING);
    if headers.contains_key(ETAG) {
        headers.remove(LAST_MODIFIED);
    }
    build_response(StatusCode::NOT_MODIFIED, headers, Body::empty())
}

/// A `multipart/byteranges` body plan.
struct Multipart {
    boundary: String,
    /// Part preamble and range, in order.
    parts: Vec<(Bytes, HttpRange)>,
    closing: Bytes,
}

impl Multipart {
    fn new(ranges: &[HttpRange], size: u64, part_type: &HeaderValue) -> Self {
        let boundary = uuid::Uuid::new_v4().simple().to_string();
        let part_type = String::from_utf8_lossy(part_type.as_bytes()).into_owned();
        let parts = ranges
            .iter()
            .enumerate()
            .map(|(i, range)| {
                let length = range.length.unwrap_or(0);
                let lead = if i == 0 { "" } else { "\r\n" };
                let preamble = format!(
                    "{lead}--{boundary}\r\nContent-Range: bytes {}-{}/{}\r\nContent-Type: {}\r\n\r\n",
                    range.start,
                    (range.start + length).saturating_sub(1),
                    size,
                    part_type,
                );
                (Bytes::from(preamble), *range)
            })
            .collect();
        let closing = Bytes::from(format!("\r\n--{}--\r\n", boundary));
        Self { boundary, parts, closing }
    }

    fn content_length(&self) -> u64 {
        let parts: u64 = self
            .parts
            .iter()
            .map(|(preamble, range)| preamble.len() as u64 + range.length.unwrap_or(0))
            .sum();
        parts + self.closing.len() as u64
    }

    fn into_stream(self, source: Arc<dyn RangeReader>) -> crate::net::ByteStream {
        let closing = self.closing;
        stream::iter(self.parts)
            .then(move |(preamble, range)| {
                let source = source.clone();
                async move {
                    let data = source.range_read(range).await.map_err(io::Error::other)?;
                    Ok::<_, io::Error>(stream::once(async move { Ok(preamble) }).chain(data))
                }
            })
            .try_flatten()
            .chain(stream::once(async move { Ok(closing) }))
            .boxed()
    }
}

enum Precondition {
    Proceed { honor_range: bool },
    NotModified,
    Failed,
}

fn check_preconditions(request: &Parts, etag: Option<&str>, modified: Option<SystemTime>) -> Precondition {
    let headers = &request.headers;
    let mut cond = check_if_match(headers, etag);
    if cond == Cond::None {
        cond = check_if_unmodified_since(headers, modified);
    }
    if cond == Cond::False {
        return Precondition::Failed;
    }

    let safe = request.method == Method::GET || request.method == Method::HEAD;
    match check_if_none_match(headers, etag) {
        Cond::False => {
            return if safe { Precondition::NotModified } else { Precondition::Failed };
        }
        Cond::None => {
            if safe && check_if_modified_since(headers, modified) == Cond::False {
                return Precondition::NotModified;
            }
        }
        Cond::True => {}
    }

    let honor_range = !(safe
        && headers.contains_key(RANGE)
        && check_if_range(headers, etag, modified) == Cond::False);
    Precondition::Proceed { honor_range }
}

fn header_str<'a>(headers: &'a HeaderMap, name: axum::http::HeaderName) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
}

fn check_if_match(headers: &HeaderMap, etag: Option<&str>) -> Cond {
    let Some(list) = header_str(headers, IF_MATCH) else {
        return Cond::None;
    };
    for candidate in etag_list(list) {
        match candidate {
            EtagItem::Any => return Cond::True,
            EtagItem::Tag(tag) => {
                if etag.is_some_and(|current| strong_match(tag, current)) {
                    return Cond::True;
                }
            }
            EtagItem::Malformed => break,
        }
    }
    Cond::False
}

fn check_if_none_match(headers: &HeaderMap, etag: Option<&str>) -> Cond {
    let Some(list) = header_str(headers, IF_NONE_MATCH) else {
        return Cond::None;
    };
    for candidate in etag_list(list) {
        match candidate {
            EtagItem::Any => return Cond::False,
            EtagItem::Tag(tag) => {
                if etag.is_some_and(|current| weak_match(tag, current)) {
                    return Cond::False;
                }
            }
            EtagItem::Malformed => break,
        }
    }
    Cond::True
}

fn check_if_unmodified_since(headers: &HeaderMap, modified: Option<SystemTime>) -> Cond {
    let (Some(value), Some(modified)) = (header_str(headers, IF_UNMODIFIED_SINCE), modified) else {
        return Cond::None;
    };
    match httpdate::parse_http_date(value) {
        Ok(since) if modified <= since => Cond::True,
        Ok(_) => Cond::False,
        Err(_) => Cond::None,
    }
}

fn check_if_modified_since(headers: &HeaderMap, modified: Option<SystemTime>) -> Cond {
    let (Some(value), Some(modified)) = (header_str(headers, IF_MODIFIED_SINCE), modified) else {
        return Cond::None;
    };
    match httpdate::parse_http_date(value) {
        Ok(since) if modified <= since => Cond::False,
        Ok(_) => Cond::True,
        Err(_) => Cond::None,
    }
}

fn check_if_range(headers: &HeaderMap, etag: Option<&str>, modified: Option<SystemTime>) -> Cond {
    let Some(value) = header_str(headers, IF_RANGE) else {
        return Cond::None;
    };
    if let Some((tag, _)) = scan_etag(value) {
        return if etag.is_some_and(|current| strong_match(tag, current)) {
            Cond::True
        } else {
            Cond::False
        };
    }
    let Some(modified) = modified else {
        return Cond::False;
    };
    match httpdate::parse_http_date(value) {
        Ok(date) if date == modified => Cond::True,
        _ => Cond::False,
    }
}

enum EtagItem<'a> {
    Any,
    Tag(&'a str),
    Malformed,
}

/// Iterate a comma-separated ETag list (`"a", W/"b"` or `*`).
fn etag_list(list: &str) -> impl Iterator<Item = EtagItem<'_>> {
    let mut rest = list;
    std::iter::from_fn(move || loop {
        rest = rest.trim_start_matches([' ', '\t', ',']);
        if rest.is_empty() {
            return None;
        }
        if let Some(after) = rest.strip_prefix('*') {
            rest = after;
            return Some(EtagItem::Any);
        }
        match scan_etag(rest) {
            Some((tag, remain)) => {
                rest = remain;
                return Some(EtagItem::Tag(tag));
            }
            None => {
                rest = "";
                return Some(EtagItem::Malformed);
            }
        }
    })
}

/// Split one entity tag (optionally weak) off the front of `s`.
fn scan_etag(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start_matches([' ', '\t']);
    let start = if s.starts_with("W/") { 2 } else { 0 };
    let bytes = s.as_bytes();
    if bytes.len() < start + 2 || bytes[start] != b'"' {
        return None;
    }
    for (i, &c) in bytes.iter().enumerate().skip(start + 1) {
        match c {
            b'"' => return Some((&s[..=i], &s[i + 1..])),
            0x21 | 0x23..=0x7e | 0x80..=0xff => {}
            _ => return None,
        }
    }
    None
}

fn strong_match(a: &str, b: &str) -> bool {
    a == b && a.starts_with('"')
}

fn weak_match(a: &str, b: &str) -> bool {
    a.trim_start_matches("W/") == b.trim_start_matches("W/")
}

/// Modification times are compared at one-second resolution; the Unix epoch
/// means "unknown".
fn truncate_to_secs(time: SystemTime) -> Option<SystemTime> {
    let secs = time.duration_since(UNIX_EPOCH).ok()?.as_secs();
    if secs == 0 {
        return None;
    }
    Some(UNIX_EPOCH + Duration::from_secs(secs))
}

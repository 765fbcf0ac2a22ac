//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::State;
use axum::http::header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, LAST_MODIFIED, RANGE};
use axum::http::{HeaderMap, HeaderValue, Method, Request, StatusCode};
use axum::response::Response;
use axum::routing::any;
use axum::Router;
use bytes::Bytes;
use futures_util::stream;
use tokio::net::TcpListener;

use link_proxy::security::Throttle;

/// Modification time every mock object reports.
pub const ORIGIN_MTIME: u64 = 1_700_000_000;

/// Deterministic, non-repeating-looking test data.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + i / 251) % 256) as u8).collect()
}

#[derive(Debug, Clone, Copy, Default)]
pub enum BodyMode {
    /// Send the whole body at once.
    #[default]
    Normal,
    /// Send 1 KiB every 100 ms forever.
    Drip,
    /// `Normal` for ranges starting before the offset, `Drip` from it on.
    DripFrom(usize),
}

#[derive(Debug, Clone, Default)]
pub struct OriginOptions {
    /// Upper bound of a random delay before answering ranged GETs.
    pub jitter_ms: u64,
    pub body: BodyMode,
    /// Never send `Content-Length`; HEAD gets a streamed empty body.
    pub hide_length: bool,
    /// Answer every GET with the whole object.
    pub ignore_range: bool,
}

/// Counters and captured requests of a mock origin.
#[derive(Debug, Default)]
pub struct OriginStats {
    pub requests: AtomicUsize,
    pub ranged_requests: AtomicUsize,
    /// Responses whose body has not been dropped yet.
    pub in_flight: AtomicUsize,
    pub headers: Mutex<Vec<(Method, HeaderMap)>>,
}

impl OriginStats {
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn last_headers(&self) -> HeaderMap {
        self.headers.lock().unwrap().last().map(|(_, h)| h.clone()).unwrap_or_default()
    }
}

/// Decrements `in_flight` when the response body is dropped.
struct InFlight(Arc<OriginStats>);

impl InFlight {
    fn new(stats: Arc<OriginStats>) -> Self {
        stats.in_flight.fetch_add(1, Ordering::SeqCst);
        Self(stats)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Clone)]
struct OriginState {
    objects: Arc<HashMap<String, Bytes>>,
    options: OriginOptions,
    stats: Arc<OriginStats>,
}

pub struct Origin {
    pub addr: SocketAddr,
    pub stats: Arc<OriginStats>,
}

impl Origin {
    pub fn url(&self, path: &str) -> url::Url {
        url::Url::parse(&format!("http://{}{}", self.addr, path)).unwrap()
    }
}

/// Start a Range-aware origin serving `objects` (path → bytes) on an
/// ephemeral port. Unknown paths are 404.
pub async fn start_origin(objects: Vec<(&str, Vec<u8>)>, options: OriginOptions) -> Origin {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let stats = Arc::new(OriginStats::default());
    let state = OriginState {
        objects: Arc::new(objects.into_iter().map(|(p, b)| (p.to_string(), Bytes::from(b))).collect()),
        options,
        stats: stats.clone(),
    };

    let app = Router::new().route("/{*path}", any(origin_handler)).with_state(state);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Origin { addr, stats }
}

async fn origin_handler(State(state): State<OriginState>, request: Request<Body>) -> Response {
    let stats = state.stats.clone();
    stats.requests.fetch_add(1, Ordering::SeqCst);
    stats
        .headers
        .lock()
        .unwrap()
        .push((request.method().clone(), request.headers().clone()));

    let Some(data) = state.objects.get(request.uri().path()).cloned() else {
        return Response::builder()
            .status(StatusCode::NOT_FOUND)
            .header("x-origin", "mock")
            .body(Body::from("no such object"))
            .unwrap();
    };

    let mut builder = Response::builder()
        .header("x-origin", "mock")
        .header(LAST_MODIFIED, httpdate::fmt_http_date(UNIX_EPOCH + Duration::from_secs(ORIGIN_MTIME)))
        .header(CONTENT_TYPE, "application/octet-stream");

    let requested = request.headers().get(RANGE).filter(|_| !state.options.ignore_range);
    let range = requested
        .and_then(|v| v.to_str().ok())
        .and_then(|v| parse_simple_range(v, data.len()));

    if range.is_none() && requested.is_some() && data.is_empty() {
        // An empty object can satisfy no range.
        return builder
            .status(StatusCode::RANGE_NOT_SATISFIABLE)
            .header(CONTENT_RANGE, "bytes */0")
            .body(Body::empty())
            .unwrap();
    }

    let offset = range.map_or(0, |(start, _)| start);
    let (status, slice) = match range {
        Some((start, end)) => {
            stats.ranged_requests.fetch_add(1, Ordering::SeqCst);
            if state.options.jitter_ms > 0 {
                tokio::time::sleep(Duration::from_millis(fastrand::u64(0..=state.options.jitter_ms))).await;
            }
            builder = builder.header(CONTENT_RANGE, format!("bytes {}-{}/{}", start, end - 1, data.len()));
            (StatusCode::PARTIAL_CONTENT, data.slice(start..end))
        }
        None => (StatusCode::OK, data),
    };

    builder = builder.status(status);
    if request.method() == Method::HEAD {
        if state.options.hide_length {
            return builder
                .body(Body::from_stream(stream::empty::<Result<Bytes, std::io::Error>>()))
                .unwrap();
        }
        return builder.header(CONTENT_LENGTH, slice.len()).body(Body::empty()).unwrap();
    }
    if !state.options.hide_length {
        builder = builder.header(CONTENT_LENGTH, slice.len());
    }

    let guard = InFlight::new(stats);
    let drip = match state.options.body {
        BodyMode::Normal => false,
        BodyMode::Drip => true,
        BodyMode::DripFrom(from) => offset >= from,
    };
    let body = if drip {
        Body::from_stream(stream::unfold((guard, slice), |(guard, slice)| async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let chunk = slice.slice(..slice.len().min(1024));
            Some((Ok::<_, std::io::Error>(chunk), (guard, slice)))
        }))
    } else {
        Body::from_stream(stream::once(async move {
            let _guard = guard;
            Ok::<_, std::io::Error>(slice)
        }))
    };
    builder.body(body).unwrap()
}

/// `bytes=a-b` or `bytes=a-` only; returns half-open bounds.
fn parse_simple_range(value: &str, len: usize) -> Option<(usize, usize)> {
    let bounds = value.strip_prefix("bytes=")?;
    let (start, end) = bounds.split_once('-')?;
    let start: usize = start.parse().ok()?;
    let end = if end.is_empty() { len } else { end.parse::<usize>().ok()? + 1 };
    (start < end && end <= len).then_some((start, end))
}

/// Counts `consume` calls without ever waiting.
#[derive(Debug, Default)]
pub struct CountingThrottle {
    pub calls: AtomicUsize,
    pub bytes: AtomicUsize,
}

#[async_trait]
impl Throttle for CountingThrottle {
    async fn consume(&self, bytes: usize) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.bytes.fetch_add(bytes, Ordering::SeqCst);
    }
}

/// A throttle whose waits never finish; tracks how many are pending.
#[derive(Debug, Default)]
pub struct BlockingThrottle {
    pub started: AtomicUsize,
    pub pending: Arc<AtomicUsize>,
}

struct Pending(Arc<AtomicUsize>);

impl Drop for Pending {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Throttle for BlockingThrottle {
    async fn consume(&self, _bytes: usize) {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.pending.fetch_add(1, Ordering::SeqCst);
        let _pending = Pending(self.pending.clone());
        std::future::pending::<()>().await;
    }
}

/// Poll `check` until it holds or `limit` passes.
pub async fn eventually(limit: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

pub fn parts(method: &str, uri: &str, headers: &[(&str, &str)]) -> axum::http::request::Parts {
    let mut builder = Request::builder().method(method).uri(uri);
    for (k, v) in headers {
        builder = builder.header(*k, *v);
    }
    builder.body(()).unwrap().into_parts().0
}

pub async fn read_body(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
}

pub fn origin_mtime() -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(ORIGIN_MTIME)
}

pub fn header(value: &'static str) -> HeaderValue {
    HeaderValue::from_static(value)
}

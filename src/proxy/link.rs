//! Per-request link descriptors.
//!
//! A [`Link`] says how the bytes of one object can be reached. Exactly one
//! variant exists per request, so the serving strategy follows from the type
//! rather than from which optional fields happen to be set.

use std::fmt;
use std::sync::Arc;

use axum::http::{HeaderMap, HeaderValue};
use url::Url;

use crate::net::{RangeReader, SeekableRead};

/// How to reach an object's bytes for a single request.
pub enum Link {
    /// An exclusively owned local handle.
    Local(LocalLink),
    /// A shared source able to read arbitrary ranges.
    Ranged(RangedLink),
    /// A remote URL, fetched in parallel parts or passed through.
    Remote(RemoteLink),
}

impl Link {
    /// The strategy the dispatcher will run for this link.
    pub fn strategy(&self) -> Strategy {
        match self {
            Link::Local(_) => Strategy::Local,
            Link::Ranged(_) => Strategy::Ranged,
            Link::Remote(remote) if remote.parallel.is_some() => Strategy::Parallel,
            Link::Remote(_) => Strategy::Passthrough,
        }
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Link::Local(local) => f.debug_tuple("Local").field(local).finish(),
            Link::Ranged(_) => f.write_str("Ranged(..)"),
            Link::Remote(remote) => f.debug_tuple("Remote").field(remote).finish(),
        }
    }
}

/// A local handle.
pub struct LocalLink {
    pub file: LocalFile,
    /// Replaces the MIME lookup when the storage knows better.
    pub content_type: Option<HeaderValue>,
}

impl LocalLink {
    pub fn new(file: LocalFile) -> Self {
        Self { file, content_type: None }
    }

    pub fn with_content_type(mut self, content_type: HeaderValue) -> Self {
        self.content_type = Some(content_type);
        self
    }
}

impl fmt::Debug for LocalLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalLink")
            .field("file", &self.file)
            .field("content_type", &self.content_type)
            .finish()
    }
}

/// Local handles. Only OS files are served without throttling.
pub enum LocalFile {
    Os(tokio::fs::File),
    Other(Box<dyn SeekableRead>),
}

impl fmt::Debug for LocalFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocalFile::Os(_) => f.write_str("Os"),
            LocalFile::Other(_) => f.write_str("Other"),
        }
    }
}

/// A resolved range-capable source.
pub struct RangedLink {
    pub source: Arc<dyn RangeReader>,
}

impl RangedLink {
    pub fn new(source: Arc<dyn RangeReader>) -> Self {
        Self { source }
    }
}

/// A remote object.
#[derive(Debug, Clone)]
pub struct RemoteLink {
    pub url: Url,
    /// Sent on every upstream request, overriding the client's headers.
    pub headers: HeaderMap,
    pub parallel: Option<ParallelHints>,
    pub range: RangeSupport,
}

impl RemoteLink {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            headers: HeaderMap::new(),
            parallel: None,
            range: RangeSupport::Unresolved,
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Enable parallel fetching; both hints zero leaves it disabled.
    pub fn with_parallel(mut self, concurrency: usize, part_size: u64) -> Self {
        self.with_hints(ParallelHints::new(concurrency, part_size))
    }

    pub fn with_hints(mut self, parallel: Option<ParallelHints>) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_range(mut self, range: RangeSupport) -> Self {
        self.range = range;
        self
    }
}

/// Concurrency and part size for parallel fetching. Zero means "default".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParallelHints {
    pub concurrency: usize,
    pub part_size: u64,
}

impl ParallelHints {
    /// `None` when both hints are zero.
    pub fn new(concurrency: usize, part_size: u64) -> Option<Self> {
        if concurrency == 0 && part_size == 0 {
            None
        } else {
            Some(Self { concurrency, part_size })
        }
    }
}

/// Range capability of a remote link that has not been upgraded.
///
/// The resolved state is [`Link::Ranged`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RangeSupport {
    /// A range source may be synthesized.
    #[default]
    Unresolved,
    /// Synthesis was explicitly refused for the next upgrade attempt.
    Disabled,
}

/// The four serving strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Local,
    Ranged,
    Parallel,
    Passthrough,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Local => "local",
            Strategy::Ranged => "ranged",
            Strategy::Parallel => "parallel",
            Strategy::Passthrough => "passthrough",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//! Storage mounts.
//!
//! # Data Flow
//! ```text
//! Request path
//!     → MountTable (longest matching prefix)
//!     → local.rs (open a file under the mount root)
//!       or http.rs (HEAD the remote object, build a remote link)
//!     → Resolved { link, file, proxy_range }
//! ```
//!
//! # Design Decisions
//! - Mount prefixes are matched on whole path segments
//! - Resolution failures surface as 404 unless the origin misbehaved

pub mod http;
pub mod local;

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderName, HeaderValue};

use crate::config::{MountKind, ProxyConfig};
use crate::error::{ProxyError, Result};
use crate::net::UpstreamClient;
use crate::proxy::{FileObject, Link, ParallelHints, RangeSupport};

pub use self::http::HttpStorage;
pub use self::local::LocalStorage;

/// A link ready for dispatch.
#[derive(Debug)]
pub struct Resolved {
    pub link: Link,
    pub file: FileObject,
    /// Run range enablement before dispatching.
    pub proxy_range: bool,
}

/// Turns a path into a link and the metadata of the object behind it.
#[async_trait]
pub trait LinkResolver: Send + Sync {
    async fn resolve(&self, path: &str) -> Result<Resolved>;
}

struct Mount {
    name: String,
    prefix: String,
    proxy_range: bool,
    storage: Arc<dyn LinkResolver>,
}

impl Mount {
    /// The path below this mount, if `path` is inside it.
    fn relative<'a>(&self, path: &'a str) -> Option<&'a str> {
        let rest = path.strip_prefix(self.prefix.as_str())?;
        if self.prefix.is_empty() || rest.is_empty() || rest.starts_with('/') {
            Some(rest.trim_start_matches('/'))
        } else {
            None
        }
    }
}

/// Mounts keyed by path prefix; the longest prefix wins.
#[derive(Default)]
pub struct MountTable {
    mounts: Vec<Mount>,
}

impl MountTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a mount. A trailing slash on `prefix` is ignored.
    pub fn mount(mut self, name: impl Into<String>, prefix: &str, proxy_range: bool, storage: Arc<dyn LinkResolver>) -> Self {
        self.mounts.push(Mount {
            name: name.into(),
            prefix: prefix.trim_end_matches('/').to_string(),
            proxy_range,
            storage,
        });
        self.mounts.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        self
    }

    pub fn from_config(config: &ProxyConfig, client: &UpstreamClient) -> Result<Self> {
        let mut table = Self::new();
        for mount in &config.mounts {
            let storage: Arc<dyn LinkResolver> = match mount.kind {
                MountKind::Local => {
                    let root = mount
                        .root
                        .as_deref()
                        .ok_or_else(|| ProxyError::Config(format!("mount {} has no root", mount.name)))?;
                    Arc::new(LocalStorage::new(root))
                }
                MountKind::Http => {
                    let url = mount
                        .url
                        .as_deref()
                        .ok_or_else(|| ProxyError::Config(format!("mount {} has no url", mount.name)))?;
                    let base = url::Url::parse(url).map_err(|e| ProxyError::Config(format!("mount {}: {}", mount.name, e)))?;

                    let concurrency = if mount.concurrency == 0 {
                        config.upstream.default_concurrency
                    } else {
                        mount.concurrency
                    };
                    let part_size = if mount.part_size == 0 {
                        config.upstream.default_part_size
                    } else {
                        mount.part_size
                    };
                    let range = if mount.range_disabled {
                        RangeSupport::Disabled
                    } else {
                        RangeSupport::Unresolved
                    };
                    Arc::new(
                        HttpStorage::new(client.clone(), base, header_map(&mount.headers)?)
                            .with_parallel(ParallelHints::new(concurrency, part_size))
                            .with_range(range),
                    )
                }
            };
            tracing::info!(mount = %mount.name, prefix = %mount.path_prefix, kind = ?mount.kind, "Mounted");
            table = table.mount(mount.name.clone(), &mount.path_prefix, mount.proxy_range, storage);
        }
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.mounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mounts.is_empty()
    }
}

#[async_trait]
impl LinkResolver for MountTable {
    async fn resolve(&self, path: &str) -> Result<Resolved> {
        for mount in &self.mounts {
            if let Some(relative) = mount.relative(path) {
                tracing::debug!(mount = %mount.name, path = %relative, "Resolving");
                let mut resolved = mount.storage.resolve(relative).await?;
                resolved.proxy_range |= mount.proxy_range;
                return Ok(resolved);
            }
        }
        Err(ProxyError::NotFound(path.to_string()))
    }
}

fn header_map(headers: &std::collections::BTreeMap<String, String>) -> Result<HeaderMap> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| ProxyError::Config(e.to_string()))?;
        let value = HeaderValue::from_str(value).map_err(|e| ProxyError::Config(e.to_string()))?;
        map.append(name, value);
    }
    Ok(map)
}

/// Split a relative path into its segments, refusing anything that could
/// climb out of a mount.
pub(crate) fn safe_segments(path: &str) -> Result<Vec<&str>> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return Err(ProxyError::NotFound(path.to_string()));
    }
    if segments
        .iter()
        .any(|s| *s == "." || *s == ".." || s.contains('\\') || s.contains('\0'))
    {
        return Err(ProxyError::NotFound(path.to_string()));
    }
    Ok(segments)
}

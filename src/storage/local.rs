//! Files under a local directory.

use std::io;
use std::path::PathBuf;
use std::time::UNIX_EPOCH;

use async_trait::async_trait;

use crate::error::{ProxyError, Result};
use crate::proxy::{FileObject, Link, LocalFile, LocalLink};
use crate::storage::{safe_segments, LinkResolver, Resolved};

#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl LinkResolver for LocalStorage {
    async fn resolve(&self, path: &str) -> Result<Resolved> {
        let segments = safe_segments(path)?;
        let mut full = self.root.clone();
        full.extend(&segments);

        let metadata = tokio::fs::metadata(&full).await.map_err(|e| not_found(e, path))?;
        if !metadata.is_file() {
            return Err(ProxyError::NotFound(path.to_string()));
        }
        let handle = tokio::fs::File::open(&full).await.map_err(|e| not_found(e, path))?;

        let name = segments.last().copied().unwrap_or(path);
        let mod_time = metadata.modified().unwrap_or(UNIX_EPOCH);
        Ok(Resolved {
            link: Link::Local(LocalLink::new(LocalFile::Os(handle))),
            file: FileObject::new(name, metadata.len(), mod_time),
            proxy_range: false,
        })
    }
}

fn not_found(err: io::Error, path: &str) -> ProxyError {
    match err.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => ProxyError::NotFound(path.to_string()),
        _ => ProxyError::Read(err),
    }
}

//! Object metadata handed to the dispatcher alongside a link.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Metadata of the object being served.
#[derive(Debug, Clone)]
pub struct FileObject {
    /// Display name, used for Content-Disposition and MIME lookup.
    pub name: String,
    /// Total size in bytes.
    pub size: u64,
    /// Last modification time.
    pub mod_time: SystemTime,
    /// Hash kind (e.g. `md5`, `sha1`) → hex digest. May be empty.
    pub hashes: HashMap<String, String>,
}

impl FileObject {
    pub fn new(name: impl Into<String>, size: u64, mod_time: SystemTime) -> Self {
        Self {
            name: name.into(),
            size,
            mod_time,
            hashes: HashMap::new(),
        }
    }

    pub fn with_hash(mut self, kind: impl Into<String>, digest: impl Into<String>) -> Self {
        self.hashes.insert(kind.into(), digest.into());
        self
    }

    /// Seconds since the Unix epoch; negative for pre-epoch timestamps.
    pub fn mod_time_unix(&self) -> i64 {
        match self.mod_time.duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_secs() as i64,
            Err(e) => {
                let before = e.duration();
                // Round toward negative infinity like a floor division would.
                let secs = before.as_secs() as i64;
                if before.subsec_nanos() > 0 { -secs - 1 } else { -secs }
            }
        }
    }

    /// Lowercased extension without the dot, if any.
    pub fn extension(&self) -> Option<String> {
        let (_, ext) = self.name.rsplit_once('.')?;
        Some(ext.to_ascii_lowercase())
    }
}

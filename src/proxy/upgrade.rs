//! Range enablement: turning a remote link into a range-capable one.
//!
//! A remote link whose range support is still unresolved is offered to a
//! [`RangeSourceFactory`]; if the factory produces a source the link becomes
//! [`Link::Ranged`]. Failure is never fatal, the link simply keeps its
//! remote strategy. An explicit opt-out is consumed by one call and reset.

use std::sync::Arc;

use crate::error::{ProxyError, Result};
use crate::net::{Downloader, HttpRangeReader, ParallelRangeReader, RangeReader, UpstreamClient};
use crate::observability::metrics;
use crate::proxy::link::{Link, RangeSupport, RangedLink, RemoteLink};

/// Builds a range source for a remote object.
pub trait RangeSourceFactory: Send + Sync {
    fn range_source(&self, link: &RemoteLink, size: u64) -> Result<Arc<dyn RangeReader>>;
}

/// Range sources over HTTP(S): parallel parts when the link carries hints,
/// otherwise one ranged GET per range.
#[derive(Debug, Clone)]
pub struct HttpRangeFactory {
    client: UpstreamClient,
}

impl HttpRangeFactory {
    pub fn new(client: UpstreamClient) -> Self {
        Self { client }
    }
}

impl RangeSourceFactory for HttpRangeFactory {
    fn range_source(&self, link: &RemoteLink, size: u64) -> Result<Arc<dyn RangeReader>> {
        match link.url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(ProxyError::Upstream(format!(
                    "cannot range-read scheme {:?} ({})",
                    other, link.url
                )))
            }
        }

        let source: Arc<dyn RangeReader> = match link.parallel {
            Some(hints) => Arc::new(ParallelRangeReader::new(
                Downloader::new(self.client.clone(), hints.concurrency, hints.part_size),
                link.url.clone(),
                link.headers.clone(),
                size,
            )),
            None => Arc::new(HttpRangeReader::new(
                self.client.clone(),
                link.url.clone(),
                link.headers.clone(),
                size,
            )),
        };
        Ok(source)
    }
}

/// Give `link` a range source if it can have one.
///
/// Local and ranged links come back unchanged. A remote link marked
/// [`RangeSupport::Disabled`] is reset to [`RangeSupport::Unresolved`]
/// without attempting synthesis.
pub fn maybe_upgrade(link: Link, size: u64, factory: &dyn RangeSourceFactory) -> Link {
    let remote = match link {
        Link::Remote(remote) => remote,
        other => return other,
    };

    match remote.range {
        RangeSupport::Disabled => {
            tracing::debug!(url = %remote.url, "Range synthesis opted out, resetting");
            metrics::record_range_upgrade("disabled");
            Link::Remote(remote.with_range(RangeSupport::Unresolved))
        }
        RangeSupport::Unresolved => match factory.range_source(&remote, size) {
            Ok(source) => {
                tracing::debug!(url = %remote.url, size, "Remote link upgraded to range source");
                metrics::record_range_upgrade("upgraded");
                Link::Ranged(RangedLink::new(source))
            }
            Err(e) => {
                tracing::warn!(url = %remote.url, error = %e, "Range enablement failed, keeping remote link");
                metrics::record_range_upgrade("failed");
                Link::Remote(remote)
            }
        },
    }
}

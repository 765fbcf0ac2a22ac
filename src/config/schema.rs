//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root configuration for the link proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Egress byte-rate limiting.
    pub rate_limit: RateLimitConfig,

    /// Markdown rendering.
    pub markdown: MarkdownConfig,

    /// Requests made to remote origins.
    pub upstream: UpstreamConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Storage mounts, matched by longest path prefix.
    pub mounts: Vec<MountConfig>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Time allowed to produce a response head, in seconds.
    pub request_secs: u64,

    /// Idle pooled upstream connection timeout in seconds.
    pub idle_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
            idle_secs: 60,
        }
    }
}

/// Process-wide egress limit shared by every transfer.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Sustained egress rate.
    pub bytes_per_second: u64,

    /// Bytes that may be sent at once before pacing starts.
    ///
    /// Must cover at least one millisecond of `bytes_per_second`: pacing
    /// sleeps cannot be shorter than the timer's 1 ms tick, and refill above
    /// the burst is discarded, so a smaller bucket caps throughput below the
    /// configured rate.
    pub burst_bytes: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bytes_per_second: 10 * 1024 * 1024,
            burst_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MarkdownConfig {
    /// Serve `.md` objects as sanitized HTML instead of raw bytes.
    pub render: bool,

    /// Largest markdown document that will be rendered.
    pub max_bytes: usize,
}

impl Default for MarkdownConfig {
    fn default() -> Self {
        Self {
            render: false,
            max_bytes: 8 * 1024 * 1024,
        }
    }
}

/// Upstream request settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// User-Agent of the proxy's own client.
    pub user_agent: String,

    /// Client headers that are never forwarded to an origin.
    pub ignore_headers: Vec<String>,

    /// Parallel fetch concurrency for http mounts that set none (0 = off).
    pub default_concurrency: usize,

    /// Parallel fetch part size for http mounts that set none (0 = off).
    pub default_part_size: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("link-proxy/", env!("CARGO_PKG_VERSION")).to_string(),
            ignore_headers: vec!["authorization".to_string(), "referer".to_string()],
            default_concurrency: 0,
            default_part_size: 0,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Storage behind a mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MountKind {
    /// Files under a local directory.
    Local,
    /// Objects under a remote base URL.
    Http,
}

/// A path prefix served from one storage.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MountConfig {
    /// Mount identifier for logging.
    pub name: String,

    /// Request path prefix (e.g., "/media").
    pub path_prefix: String,

    pub kind: MountKind,

    /// Root directory (local mounts).
    #[serde(default)]
    pub root: Option<String>,

    /// Base URL (http mounts).
    #[serde(default)]
    pub url: Option<String>,

    /// Headers sent with every request to the origin.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Parallel fetch concurrency (0 = upstream default).
    #[serde(default)]
    pub concurrency: usize,

    /// Parallel fetch part size in bytes (0 = upstream default).
    #[serde(default)]
    pub part_size: u64,

    /// Upgrade remote links to range sources before serving.
    #[serde(default)]
    pub proxy_range: bool,

    /// Refuse range synthesis for this mount's links.
    #[serde(default)]
    pub range_disabled: bool,
}

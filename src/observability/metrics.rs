//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by method, status, strategy
//! - `proxy_request_duration_seconds` (histogram): time to response head
//! - `proxy_range_upgrades_total` (counter): range enablement outcomes
//! - `proxy_markdown_renders_total` (counter): markdown renders by outcome
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed
//! - Labels stay low-cardinality: no paths, no object names

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus exporter with its own HTTP listener on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;

    describe_counter!("proxy_requests_total", "Requests served, by method, status and strategy");
    describe_histogram!("proxy_request_duration_seconds", "Time until the response head was ready");
    describe_counter!("proxy_range_upgrades_total", "Range enablement outcomes");
    describe_counter!("proxy_markdown_renders_total", "Markdown renders by outcome");

    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_request(method: &str, status: u16, strategy: &str, start: Instant) {
    counter!(
        "proxy_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "strategy" => strategy.to_string()
    )
    .increment(1);
    histogram!("proxy_request_duration_seconds", "strategy" => strategy.to_string())
        .record(start.elapsed().as_secs_f64());
}

/// `outcome` is one of `upgraded`, `failed`, `disabled`.
pub fn record_range_upgrade(outcome: &'static str) {
    counter!("proxy_range_upgrades_total", "outcome" => outcome).increment(1);
}

pub fn record_markdown_render(outcome: &'static str) {
    counter!("proxy_markdown_renders_total", "outcome" => outcome).increment(1);
}

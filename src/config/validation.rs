//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Check every mount is complete and reachable by a unique prefix
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use axum::http::{HeaderName, HeaderValue};
use thiserror::Error;
use url::Url;

use crate::config::schema::{MountConfig, MountKind, ProxyConfig};

/// One semantic problem in a configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new("listener.bind_address", "not a socket address"));
    }

    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::new("timeouts.connect_secs", "must be greater than 0"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }

    if config.rate_limit.enabled {
        if config.rate_limit.bytes_per_second == 0 {
            errors.push(ValidationError::new("rate_limit.bytes_per_second", "must be greater than 0"));
        }
        let min_burst = config.rate_limit.bytes_per_second.div_ceil(1000).max(1);
        if config.rate_limit.burst_bytes < min_burst {
            errors.push(ValidationError::new(
                "rate_limit.burst_bytes",
                format!("must be at least {} (one millisecond of bytes_per_second)", min_burst),
            ));
        }
    }

    if config.markdown.max_bytes == 0 {
        errors.push(ValidationError::new("markdown.max_bytes", "must be greater than 0"));
    }

    if HeaderValue::from_str(&config.upstream.user_agent).is_err() {
        errors.push(ValidationError::new("upstream.user_agent", "not a valid header value"));
    }
    for name in &config.upstream.ignore_headers {
        if HeaderName::from_bytes(name.as_bytes()).is_err() {
            errors.push(ValidationError::new(
                "upstream.ignore_headers",
                format!("{:?} is not a header name", name),
            ));
        }
    }

    if !matches!(
        config.observability.log_level.as_str(),
        "trace" | "debug" | "info" | "warn" | "error"
    ) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level {:?}", config.observability.log_level),
        ));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new("observability.metrics_address", "not a socket address"));
    }

    let mut names = HashSet::new();
    let mut prefixes = HashSet::new();
    for (i, mount) in config.mounts.iter().enumerate() {
        let field = format!("mounts[{}]", i);
        if mount.name.is_empty() {
            errors.push(ValidationError::new(format!("{}.name", field), "must not be empty"));
        } else if !names.insert(mount.name.as_str()) {
            errors.push(ValidationError::new(
                format!("{}.name", field),
                format!("duplicate mount name {:?}", mount.name),
            ));
        }

        if !mount.path_prefix.starts_with('/') {
            errors.push(ValidationError::new(format!("{}.path_prefix", field), "must start with '/'"));
        } else if !prefixes.insert(mount.path_prefix.trim_end_matches('/')) {
            errors.push(ValidationError::new(
                format!("{}.path_prefix", field),
                format!("duplicate prefix {:?}", mount.path_prefix),
            ));
        }

        validate_mount(&field, mount, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_mount(field: &str, mount: &MountConfig, errors: &mut Vec<ValidationError>) {
    match mount.kind {
        MountKind::Local => {
            if mount.root.as_deref().map_or(true, str::is_empty) {
                errors.push(ValidationError::new(format!("{}.root", field), "required for local mounts"));
            }
        }
        MountKind::Http => match mount.url.as_deref().map(Url::parse) {
            None => errors.push(ValidationError::new(format!("{}.url", field), "required for http mounts")),
            Some(Err(e)) => errors.push(ValidationError::new(format!("{}.url", field), e.to_string())),
            Some(Ok(url)) if !matches!(url.scheme(), "http" | "https") => {
                errors.push(ValidationError::new(format!("{}.url", field), "scheme must be http or https"))
            }
            Some(Ok(_)) => {}
        },
    }

    for (name, value) in &mount.headers {
        if HeaderName::from_bytes(name.as_bytes()).is_err() || HeaderValue::from_str(value).is_err() {
            errors.push(ValidationError::new(
                format!("{}.headers", field),
                format!("invalid header {:?}", name),
            ));
        }
    }
}

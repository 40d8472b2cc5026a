//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check the filesystem layout keeps every companion file next to the live file
//! - Validate value ranges (timeouts > 0, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ReloaderConfig → Result<(), Vec<ConfigValidationError>>
//! - Proxy parameters are checked separately by `params::validator`, which
//!   needs the filesystem and account database

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;

use crate::config::schema::ReloaderConfig;
use crate::params::placeholders;
use crate::render::template::{substitute, Template};

/// A single semantic problem found in a reloader configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ConfigValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ConfigValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ReloaderConfig) -> Result<(), Vec<ConfigValidationError>> {
    let mut errors = Vec::new();
    let paths = &config.paths;

    let live_dir = paths.live.parent().filter(|p| !p.as_os_str().is_empty());
    if paths.live.file_name().is_none() {
        errors.push(ConfigValidationError::new("paths.live", "must name a file"));
    }

    let companions: [(&'static str, &Path); 3] = [
        ("paths.staging", &paths.staging),
        ("paths.history", &paths.history),
        ("paths.lock", &paths.lock),
    ];
    for (field, path) in companions {
        if path == paths.live {
            errors.push(ConfigValidationError::new(field, "must differ from paths.live"));
        }
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
        if dir != live_dir {
            errors.push(ConfigValidationError::new(
                field,
                format!("must be in the same directory as {}", paths.live.display()),
            ));
        }
    }
    if paths.staging == paths.history
        || paths.staging == paths.lock
        || paths.history == paths.lock
    {
        errors.push(ConfigValidationError::new(
            "paths",
            "staging, history and lock must be distinct files",
        ));
    }

    let proxy = &config.proxy;
    if proxy.binary.as_os_str().is_empty() {
        errors.push(ConfigValidationError::new("proxy.binary", "must not be empty"));
    }
    if let Err(message) = check_health_url(&proxy.health_url) {
        errors.push(ConfigValidationError::new("proxy.health_url", message));
    }
    for (field, value) in [
        ("proxy.check_timeout_secs", proxy.check_timeout_secs),
        ("proxy.reload_timeout_secs", proxy.reload_timeout_secs),
        ("proxy.health_timeout_secs", proxy.health_timeout_secs),
        ("proxy.poll_base_ms", proxy.poll_base_ms),
        ("limits.lock_timeout_secs", config.limits.lock_timeout_secs),
        ("limits.max_body_size_ceiling_kb", config.limits.max_body_size_ceiling_kb),
    ] {
        if value == 0 {
            errors.push(ConfigValidationError::new(field, "must be greater than 0"));
        }
    }
    if proxy.poll_max_ms < proxy.poll_base_ms {
        errors.push(ConfigValidationError::new(
            "proxy.poll_max_ms",
            "must be at least proxy.poll_base_ms",
        ));
    }

    let obs = &config.observability;
    if obs.metrics_enabled && obs.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ConfigValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", obs.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// The URL must parse once every placeholder is filled in.
fn check_health_url(source: &str) -> Result<(), String> {
    let sample: BTreeMap<&'static str, String> = placeholders::ALL
        .iter()
        .map(|name| (*name, "1".to_string()))
        .collect();
    let rendered = substitute(&Template::new("proxy.health_url", source), &sample).map_err(|e| e.to_string())?;
    url::Url::parse(&String::from_utf8_lossy(rendered.as_bytes()))
        .map(|_| ())
        .map_err(|e| e.to_string())
}

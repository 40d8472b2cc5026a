//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the reloader.
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::params::ProxyParameters;

/// Root configuration for the reloader.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ReloaderConfig {
    /// Filesystem layout (live, staging, history, lock).
    pub paths: PathsConfig,

    /// Proxy control surface (binary, pid file, health check).
    pub proxy: ProxyControlConfig,

    /// Validation ceilings and lock wait.
    pub limits: LimitsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Parameters substituted into the template.
    pub parameters: ProxyParameters,
}

/// Where the live configuration and its companions live on disk.
///
/// Staging, history and lock must share the live file's directory so the
/// final swap is a same-volume rename.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Configuration file the proxy loads.
    pub live: PathBuf,

    /// Candidate written before the syntax check.
    pub staging: PathBuf,

    /// Single-slot history of the previously live configuration.
    pub history: PathBuf,

    /// Exclusive lock serializing install/reload cycles.
    pub lock: PathBuf,

    /// Custom template; the embedded nginx template is used when unset.
    pub template: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            live: PathBuf::from("/etc/nginx/nginx.conf"),
            staging: PathBuf::from("/etc/nginx/.nginx.conf.staged"),
            history: PathBuf::from("/etc/nginx/.nginx.conf.previous"),
            lock: PathBuf::from("/etc/nginx/.nginx.conf.lock"),
            template: None,
        }
    }
}

/// How the reloader talks to the running proxy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyControlConfig {
    /// Proxy binary used for `-t -c <path>` syntax checks.
    pub binary: PathBuf,

    /// Extra arguments placed before `-t` (e.g. `-p <prefix>`).
    pub check_args: Vec<String>,

    /// Pid file of the proxy master process.
    pub pid_file: PathBuf,

    /// URL requested to confirm the proxy is serving. Template placeholders
    /// such as `${proxy_ssl_port}` are filled from the parameters of the
    /// configuration being applied.
    pub health_url: String,

    /// Syntax check timeout in seconds.
    pub check_timeout_secs: u64,

    /// Bounded wait for reload confirmation in seconds.
    pub reload_timeout_secs: u64,

    /// Timeout for a single health check in seconds.
    pub health_timeout_secs: u64,

    /// Base delay between health polls in milliseconds.
    pub poll_base_ms: u64,

    /// Maximum delay between health polls in milliseconds.
    pub poll_max_ms: u64,
}

impl Default for ProxyControlConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("nginx"),
            check_args: Vec::new(),
            pid_file: PathBuf::from("/run/nginx.pid"),
            health_url: "https://127.0.0.1:${proxy_ssl_port}/".to_string(),
            check_timeout_secs: 30,
            reload_timeout_secs: 10,
            health_timeout_secs: 2,
            poll_base_ms: 100,
            poll_max_ms: 1000,
        }
    }
}

/// Safety ceilings applied during validation.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest accepted `max_body_size_kb`.
    pub max_body_size_ceiling_kb: u64,

    /// How long a caller waits for the install lock, in seconds.
    pub lock_timeout_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_size_ceiling_kb: 1024 * 1024, // 1GB
            lock_timeout_secs: 30,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint (watch mode only).
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

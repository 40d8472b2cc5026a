//! Proxy parameters and their validation.
//!
//! # Data Flow
//! ```text
//! ProxyParameters (raw, from config or CLI)
//!     → validator.rs (ports, body size, cert/key files, account)
//!     → ValidatedParameters (only constructible by the validator)
//!     → render::render
//! ```
//!
//! # Design Decisions
//! - Raw ports are `u32` so out-of-range values surface as `InvalidParameter`
//!   rather than a deserialization error
//! - Validation stops at the first failing field

pub mod users;
pub mod validator;

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use users::{NssRegistry, SystemUser, UserRegistry};
pub use validator::{ParameterValidator, ValidationError};

/// Runtime parameters for the proxy configuration, as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyParameters {
    /// Account the proxy workers run as.
    pub run_as_user: String,

    /// Request body ceiling in KiB.
    pub max_body_size_kb: u64,

    /// TLS listener port.
    pub ssl_port: u32,

    /// Plaintext listener port (redirects to TLS).
    pub plain_port: u32,

    /// Local upstream the proxy forwards to.
    pub upstream_port: u32,

    /// Certificate chain (PEM).
    pub cert_path: PathBuf,

    /// Private key (PEM).
    pub key_path: PathBuf,
}

impl Default for ProxyParameters {
    fn default() -> Self {
        Self {
            run_as_user: "nginx".to_string(),
            max_body_size_kb: 4 * 1024,
            ssl_port: 8001,
            plain_port: 8000,
            upstream_port: 8010,
            cert_path: PathBuf::from("/etc/kimchi/kimchi-cert.pem"),
            key_path: PathBuf::from("/etc/kimchi/kimchi-key.pem"),
        }
    }
}

/// Template placeholder names. Adding one requires a parameter to back it.
pub mod placeholders {
    pub const USER: &str = "user";
    pub const MAX_BODY_SIZE: &str = "max_body_size";
    pub const PROXY_SSL_PORT: &str = "proxy_ssl_port";
    pub const CERT_PEM: &str = "cert_pem";
    pub const CERT_KEY: &str = "cert_key";
    pub const KIMCHID_PORT: &str = "kimchid_port";
    pub const PROXY_PORT: &str = "proxy_port";

    pub const ALL: [&str; 7] = [
        USER,
        MAX_BODY_SIZE,
        PROXY_SSL_PORT,
        CERT_PEM,
        CERT_KEY,
        KIMCHID_PORT,
        PROXY_PORT,
    ];
}

/// Parameters that passed every validation check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedParameters {
    user: SystemUser,
    max_body_size_kb: u64,
    ssl_port: u16,
    plain_port: u16,
    upstream_port: u16,
    cert_path: PathBuf,
    key_path: PathBuf,
}

impl ValidatedParameters {
    pub fn user(&self) -> &SystemUser {
        &self.user
    }

    pub fn ssl_port(&self) -> u16 {
        self.ssl_port
    }

    pub fn plain_port(&self) -> u16 {
        self.plain_port
    }

    pub fn upstream_port(&self) -> u16 {
        self.upstream_port
    }

    /// Placeholder name → substitution value.
    pub fn variables(&self) -> BTreeMap<&'static str, String> {
        use placeholders::*;
        BTreeMap::from([
            (USER, self.user.name.clone()),
            (MAX_BODY_SIZE, self.max_body_size_kb.to_string()),
            (PROXY_SSL_PORT, self.ssl_port.to_string()),
            (CERT_PEM, self.cert_path.display().to_string()),
            (CERT_KEY, self.key_path.display().to_string()),
            (KIMCHID_PORT, self.upstream_port.to_string()),
            (PROXY_PORT, self.plain_port.to_string()),
        ])
    }

    /// Build without consulting the filesystem or account database.
    #[cfg(test)]
    pub(crate) fn new_unchecked(params: &ProxyParameters, uid: u32) -> Self {
        Self {
            user: SystemUser {
                name: params.run_as_user.clone(),
                uid,
                gid: uid,
            },
            max_body_size_kb: params.max_body_size_kb,
            ssl_port: params.ssl_port as u16,
            plain_port: params.plain_port as u16,
            upstream_port: params.upstream_port as u16,
            cert_path: params.cert_path.clone(),
            key_path: params.key_path.clone(),
        }
    }
}

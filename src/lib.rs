//! Reverse proxy configuration generator and reloader.
//!
//! Turns a set of proxy parameters into an nginx configuration, installs it
//! atomically next to the live file, and reloads the running proxy,
//! rolling back to the previous configuration when the reload fails.

pub mod config;
pub mod install;
pub mod lifecycle;
pub mod observability;
pub mod params;
pub mod pipeline;
pub mod reload;
pub mod render;
pub mod resilience;
pub mod watch;

pub use config::ReloaderConfig;
pub use lifecycle::CancelToken;
pub use params::ProxyParameters;
pub use pipeline::{ApplyError, ApplyReport, ConfigPipeline};

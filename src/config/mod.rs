//! Reloader configuration subsystem.
//!
//! # Data Flow
//! ```text
//! reloader.toml
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (layout and range checks)
//!     → ReloaderConfig (validated, immutable)
//!     → pipeline built from it
//!
//! In watch mode:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → pipeline rebuilt and re-applied
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{LimitsConfig, ObservabilityConfig, PathsConfig, ProxyControlConfig, ReloaderConfig};

//! Reload coordination.
//!
//! # Data Flow
//! ```text
//! InstalledConfig
//!     → coordinator.rs pre-flight (syntax check of live file)
//!     → control.rs send_reload_signal (SIGHUP to the master)
//!     → control.rs query_health (polled with backoff, bounded)
//!     → ReloadOutcome
//!     → on failure: Installer::restore_previous + one more reload
//! ```
//!
//! # Design Decisions
//! - The proxy is reached only through the `ProxyControl` trait
//! - Rollback happens at most once per cycle

pub mod control;
pub mod coordinator;

pub use control::{ControlError, HealthStatus, NginxControl, ProxyControl};
pub use coordinator::{ReloadCoordinator, ReloadError, ReloadOutcome, RollbackFailure};

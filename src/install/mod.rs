//! Atomic installation of rendered configurations.
//!
//! # Data Flow
//! ```text
//! RenderedConfig
//!     → installer.rs stage (write + fsync to staging path)
//!     → installer.rs check (proxy syntax checker on staging path)
//!     → installer.rs commit (live → history, staging → live via rename)
//!     → InstalledConfig
//! ```
//!
//! The whole sequence, and the reload that follows it, runs under the
//! exclusive `lock.rs` lock.

pub mod installer;
pub mod lock;

pub use installer::{InstallError, InstallStatus, InstalledConfig, Installer, SlotStatus};
pub use lock::{InstallLock, LockError};

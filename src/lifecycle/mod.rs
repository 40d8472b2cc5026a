//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Cancellation (cancel.rs):
//!     caller holds a CancelToken
//!     → honoured while waiting for the install lock
//!     → and at the checkpoint before staging
//!
//! Signals (signals.rs, watch mode):
//!     SIGTERM/SIGINT → cancel the shared token, leave the loop
//!     SIGHUP → re-apply the current parameters
//! ```
//!
//! # Design Decisions
//! - Staging, swap and reload are never interrupted once started
//! - Shutdown reuses the cancel token so a queued apply stops at its checkpoint

pub mod cancel;
pub mod signals;

pub use cancel::CancelToken;
pub use signals::{SignalEvent, Signals};

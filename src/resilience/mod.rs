//! Resilience helpers.
//!
//! # Data Flow
//! ```text
//! Waiting on something external:
//!     → lock polling (install::lock)
//!     → health polling (reload::coordinator)
//!     → backoff.rs decides the next delay
//! ```
//!
//! # Design Decisions
//! - Every wait has a deadline; callers cap the delay at the time remaining
//! - Jitter keeps concurrent reloaders from polling in lockstep

pub mod backoff;

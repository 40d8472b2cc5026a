//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Validator, renderer, installer, coordinator produce:
//!     → logging.rs (structured log events, one span per apply attempt)
//!     → metrics.rs (counters and a duration histogram)
//!
//! Consumers:
//!     → stderr log stream
//!     → Metrics endpoint (Prometheus scrape, watch mode)
//! ```
//!
//! # Design Decisions
//! - Metrics go through the `metrics` facade and are no-ops until a recorder is installed
//! - Attempt IDs flow through every log line of a cycle

pub mod logging;
pub mod metrics;

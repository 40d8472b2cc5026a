//! Template rendering.
//!
//! # Data Flow
//! ```text
//! Template (embedded or from file) + ValidatedParameters
//!     → template.rs (single-pass ${name} substitution)
//!     → RenderedConfig (opaque bytes + UnusedVariable warnings)
//! ```
//!
//! # Design Decisions
//! - Substituted values are never rescanned, so parameters cannot inject
//!   further placeholders
//! - No parsing of the proxy's own syntax here; the installer runs the
//!   proxy's checker on the result

pub mod template;

pub use template::{render, render_value, RenderError, RenderWarning, RenderedConfig, Template};

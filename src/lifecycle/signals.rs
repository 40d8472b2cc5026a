//! OS signal handling.
//!
//! # Responsibilities
//! - Register signal handlers (SIGTERM, SIGINT, SIGHUP)
//! - Translate signals to internal events
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - SIGHUP triggers a re-apply, not shutdown

use std::io;

use tokio::signal::unix::{signal, Signal, SignalKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    Reapply,
    Shutdown,
}

/// Registered signal streams.
pub struct Signals {
    hangup: Signal,
    terminate: Signal,
    interrupt: Signal,
}

impl Signals {
    pub fn register() -> io::Result<Self> {
        Ok(Self {
            hangup: signal(SignalKind::hangup())?,
            terminate: signal(SignalKind::terminate())?,
            interrupt: signal(SignalKind::interrupt())?,
        })
    }

    /// Wait for the next signal of interest.
    pub async fn recv(&mut self) -> SignalEvent {
        tokio::select! {
            _ = self.hangup.recv() => {
                tracing::info!("SIGHUP received, re-applying configuration");
                SignalEvent::Reapply
            }
            _ = self.terminate.recv() => {
                tracing::info!("SIGTERM received, shutting down");
                SignalEvent::Shutdown
            }
            _ = self.interrupt.recv() => {
                tracing::info!("SIGINT received, shutting down");
                SignalEvent::Shutdown
            }
        }
    }
}

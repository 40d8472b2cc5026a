//! Reload state machine and one-shot rollback.
//!
//! # States
//! ```text
//! Idle → Signaling → AwaitingAck → Success
//!   │        │            └──────→ TimedOut
//!   │        └───────────────────→ SignalFailed
//!   └────────────────────────────→ ValidationFailed (pre-flight check of the live file)
//! ```
//!
//! Any outcome other than Success restores the history slot and reloads
//! once more. That second reload never triggers another rollback.
//!
//! The health check URL belongs to the configuration being applied. After a
//! rollback the restored file's parameters are unknown, so that reload is
//! confirmed by the worker generation and master liveness.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::ProxyControlConfig;
use crate::install::{InstallError, Installer};
use crate::observability::metrics;
use crate::reload::control::{HealthStatus, ProxyControl};
use crate::resilience::backoff::Backoff;

/// Result of one reload attempt. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadOutcome {
    Success,
    ValidationFailed { detail: String },
    SignalFailed { detail: String },
    TimedOut { waited: Duration, last_status: String },
}

impl ReloadOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ReloadOutcome::Success)
    }

    /// Short label used for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ReloadOutcome::Success => "success",
            ReloadOutcome::ValidationFailed { .. } => "validation_failed",
            ReloadOutcome::SignalFailed { .. } => "signal_failed",
            ReloadOutcome::TimedOut { .. } => "timed_out",
        }
    }
}

impl fmt::Display for ReloadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReloadOutcome::Success => write!(f, "reload succeeded"),
            ReloadOutcome::ValidationFailed { detail } => {
                write!(f, "live configuration failed validation: {}", detail)
            }
            ReloadOutcome::SignalFailed { detail } => write!(f, "reload signal failed: {}", detail),
            ReloadOutcome::TimedOut { waited, last_status } => write!(
                f,
                "proxy did not confirm the reload within {:?} (last status: {})",
                waited, last_status
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ReloadState {
    Idle,
    Signaling,
    AwaitingAck,
    Finished(ReloadOutcome),
}

/// Why the rollback itself could not bring back the previous configuration.
#[derive(Debug, thiserror::Error)]
pub enum RollbackFailure {
    #[error("restoring the previous configuration failed: {0}")]
    Restore(#[source] InstallError),
    #[error("reload after restore failed: {0}")]
    Reload(ReloadOutcome),
}

#[derive(Debug, thiserror::Error)]
pub enum ReloadError {
    #[error("{outcome}; rolled back to the previous configuration")]
    RolledBack {
        outcome: ReloadOutcome,
        restored: Option<PathBuf>,
    },
    #[error("{outcome}; rollback failed: {rollback}")]
    RollbackFailed {
        outcome: ReloadOutcome,
        #[source]
        rollback: RollbackFailure,
    },
}

pub struct ReloadCoordinator {
    control: Arc<dyn ProxyControl>,
    live: PathBuf,
    timeout: Duration,
    poll_base: Duration,
    poll_max: Duration,
}

impl ReloadCoordinator {
    pub fn new(control: Arc<dyn ProxyControl>, live: PathBuf, config: &ProxyControlConfig) -> Self {
        Self {
            control,
            live,
            timeout: Duration::from_secs(config.reload_timeout_secs),
            poll_base: Duration::from_millis(config.poll_base_ms),
            poll_max: Duration::from_millis(config.poll_max_ms),
        }
    }

    /// Override the acknowledgement timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Drive one reload through the state machine.
    pub async fn reload(&self, health_url: Option<&str>) -> ReloadOutcome {
        let mut state = ReloadState::Idle;

        if self.live.exists() {
            if let Err(e) = self.control.check_syntax(&self.live).await {
                return self.finish(
                    &mut state,
                    ReloadOutcome::ValidationFailed {
                        detail: e.to_string(),
                    },
                );
            }
        }

        transition(&mut state, ReloadState::Signaling);
        if let Err(e) = self.control.send_reload_signal().await {
            return self.finish(
                &mut state,
                ReloadOutcome::SignalFailed {
                    detail: e.to_string(),
                },
            );
        }

        transition(&mut state, ReloadState::AwaitingAck);
        let outcome = self.await_ack(health_url).await;
        self.finish(&mut state, outcome)
    }

    /// Reload; on failure restore the previous configuration and reload once more.
    pub async fn reload_with_rollback(
        &self,
        installer: &Installer,
        health_url: Option<&str>,
    ) -> Result<ReloadOutcome, ReloadError> {
        let outcome = self.reload(health_url).await;
        if outcome.is_success() {
            return Ok(outcome);
        }

        tracing::warn!(outcome = %outcome, "Reload failed, rolling back");
        let restored = match installer.restore_previous().await {
            Ok(restored) => restored.map(|r| r.live),
            Err(e) => {
                tracing::error!(error = %e, "Rollback could not restore the previous configuration");
                metrics::record_rollback("restore_failed");
                return Err(ReloadError::RollbackFailed {
                    outcome,
                    rollback: RollbackFailure::Restore(e),
                });
            }
        };

        let second = self.reload(None).await;
        if second.is_success() {
            metrics::record_rollback("success");
            tracing::warn!("Rolled back to the previous configuration");
            Err(ReloadError::RolledBack { outcome, restored })
        } else {
            metrics::record_rollback("reload_failed");
            tracing::error!(outcome = %second, "Reload after rollback failed");
            Err(ReloadError::RollbackFailed {
                outcome,
                rollback: RollbackFailure::Reload(second),
            })
        }
    }

    async fn await_ack(&self, health_url: Option<&str>) -> ReloadOutcome {
        let started = Instant::now();
        let deadline = started + self.timeout;
        let mut backoff = Backoff::new(self.poll_base, self.poll_max);
        let mut last_status = String::from("no response");

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, self.control.query_health(health_url)).await {
                Ok(HealthStatus::Serving) => {
                    tracing::debug!(elapsed = ?started.elapsed(), polls = backoff.attempts() + 1, "Proxy confirmed reload");
                    return ReloadOutcome::Success;
                }
                Ok(HealthStatus::NotServing(reason)) => {
                    tracing::debug!(reason = %reason, "Proxy not serving new generation yet");
                    last_status = reason;
                }
                Err(_) => break,
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            tokio::time::sleep(backoff.next_within(remaining)).await;
        }

        ReloadOutcome::TimedOut {
            waited: self.timeout,
            last_status,
        }
    }

    fn finish(&self, state: &mut ReloadState, outcome: ReloadOutcome) -> ReloadOutcome {
        transition(state, ReloadState::Finished(outcome.clone()));
        metrics::record_reload(outcome.label());
        if outcome.is_success() {
            tracing::info!(live = %self.live.display(), "Proxy reloaded");
        } else {
            tracing::error!(live = %self.live.display(), outcome = %outcome, "Proxy reload failed");
        }
        outcome
    }
}

fn transition(state: &mut ReloadState, next: ReloadState) {
    tracing::debug!(from = ?state, to = ?next, "Reload state transition");
    *state = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reload::control::ControlError;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedProxy {
        reject_syntax: bool,
        signal_fails: bool,
        /// Serving from this poll on; never when `None`.
        serving_after_polls: Option<u32>,
        /// Health queries never answer.
        hangs: bool,
        polls: AtomicU32,
        signals: AtomicU32,
        health_urls: Mutex<Vec<Option<String>>>,
    }

    impl ScriptedProxy {
        fn serving_after(polls: u32) -> Self {
            Self {
                serving_after_polls: Some(polls),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl ProxyControl for ScriptedProxy {
        async fn check_syntax(&self, path: &Path) -> Result<(), ControlError> {
            if self.reject_syntax {
                return Err(ControlError::SyntaxRejected {
                    path: path.to_path_buf(),
                    code: Some(1),
                    stderr: "nginx: [emerg] unknown directive".into(),
                });
            }
            Ok(())
        }

        async fn send_reload_signal(&self) -> Result<(), ControlError> {
            self.signals.fetch_add(1, Ordering::SeqCst);
            if self.signal_fails {
                Err(ControlError::NotRunning("no pid file".into()))
            } else {
                Ok(())
            }
        }

        async fn query_health(&self, health_url: Option<&str>) -> HealthStatus {
            self.health_urls.lock().unwrap().push(health_url.map(str::to_string));
            if self.hangs {
                return std::future::pending().await;
            }
            let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            match self.serving_after_polls {
                Some(target) if n >= target => HealthStatus::Serving,
                _ => HealthStatus::NotServing(format!("poll {}", n)),
            }
        }
    }

    fn coordinator_at(live: PathBuf, control: Arc<dyn ProxyControl>, timeout: Duration) -> ReloadCoordinator {
        let config = ProxyControlConfig {
            poll_base_ms: 10,
            poll_max_ms: 20,
            ..ProxyControlConfig::default()
        };
        ReloadCoordinator::new(control, live, &config).with_timeout(timeout)
    }

    fn coordinator(control: Arc<dyn ProxyControl>, timeout: Duration) -> ReloadCoordinator {
        coordinator_at(PathBuf::from("/nonexistent/nginx.conf"), control, timeout)
    }

    #[tokio::test]
    async fn test_success_after_a_few_polls() {
        let proxy = Arc::new(ScriptedProxy::serving_after(3));
        let outcome = coordinator(proxy.clone(), Duration::from_secs(5))
            .reload(Some("https://127.0.0.1:8001/"))
            .await;
        assert_eq!(outcome, ReloadOutcome::Success);
        assert_eq!(proxy.polls.load(Ordering::SeqCst), 3);

        let health_urls = proxy.health_urls.lock().unwrap();
        assert!(health_urls.iter().all(|p| p.as_deref() == Some("https://127.0.0.1:8001/")));
    }

    #[tokio::test]
    async fn test_signal_failure() {
        let proxy = Arc::new(ScriptedProxy {
            signal_fails: true,
            ..ScriptedProxy::serving_after(1)
        });
        let outcome = coordinator(proxy.clone(), Duration::from_secs(5)).reload(None).await;
        assert!(matches!(outcome, ReloadOutcome::SignalFailed { .. }));
        assert_eq!(proxy.polls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_times_out_with_last_status() {
        let proxy = Arc::new(ScriptedProxy::default());
        let outcome = coordinator(proxy, Duration::from_millis(100)).reload(None).await;
        match outcome {
            ReloadOutcome::TimedOut { waited, last_status } => {
                assert_eq!(waited, Duration::from_millis(100));
                assert!(last_status.starts_with("poll "));
            }
            other => panic!("unexpected outcome: {other}"),
        }
    }

    #[tokio::test]
    async fn test_unanswered_health_query_times_out() {
        let proxy = Arc::new(ScriptedProxy {
            hangs: true,
            ..ScriptedProxy::default()
        });
        let outcome = tokio::time::timeout(
            Duration::from_secs(2),
            coordinator(proxy.clone(), Duration::from_millis(100)).reload(None),
        )
        .await
        .unwrap();

        assert_eq!(
            outcome,
            ReloadOutcome::TimedOut {
                waited: Duration::from_millis(100),
                last_status: "no response".into(),
            }
        );
        assert_eq!(proxy.health_urls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_preflight_rejection_skips_signal() {
        let dir = tempfile::tempdir().unwrap();
        let live = dir.path().join("nginx.conf");
        std::fs::write(&live, "events {}").unwrap();
        let proxy = Arc::new(ScriptedProxy {
            reject_syntax: true,
            ..ScriptedProxy::serving_after(1)
        });

        let outcome = coordinator_at(live, proxy.clone(), Duration::from_secs(1)).reload(None).await;
        match outcome {
            ReloadOutcome::ValidationFailed { detail } => assert!(detail.contains("unknown directive")),
            other => panic!("unexpected outcome: {other}"),
        }
        assert_eq!(proxy.signals.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(ReloadOutcome::Success.label(), "success");
        let timed_out = ReloadOutcome::TimedOut {
            waited: Duration::from_secs(10),
            last_status: "down".into(),
        };
        assert_eq!(timed_out.label(), "timed_out");
        assert!(timed_out.to_string().contains("10s"));
    }
}

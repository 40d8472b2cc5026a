//! Proxy process control surface.
//!
//! # Responsibilities
//! - Run the proxy's configuration syntax checker on a file
//! - Deliver the graceful-reload signal to the master process
//! - Report whether a new worker generation is serving, optionally probing
//!   a URL derived from the configuration just installed
//!
//! # Design Decisions
//! - Injected as `Arc<dyn ProxyControl>` so tests drive a fake proxy
//! - Every subprocess and HTTP request has a timeout and is awaited on the caller's task

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::Command;

use crate::config::ProxyControlConfig;

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("syntax check of {} exited with {}: {}", .path.display(), exit_label(*.code), .stderr)]
    SyntaxRejected {
        path: PathBuf,
        code: Option<i32>,
        stderr: String,
    },
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} did not finish within {timeout:?}")]
    TimedOut { program: String, timeout: Duration },
    #[error("proxy is not running: {0}")]
    NotRunning(String),
    #[error("reload signal to pid {pid} failed: {reason}")]
    SignalRejected { pid: u32, reason: String },
    #[error("health client setup failed: {0}")]
    Client(String),
}

fn exit_label(code: Option<i32>) -> String {
    match code {
        Some(c) => format!("status {}", c),
        None => "no status (killed by signal)".to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    Serving,
    NotServing(String),
}

/// Operations the reloader needs from the running proxy.
#[async_trait]
pub trait ProxyControl: Send + Sync {
    /// Validate a configuration file without applying it.
    async fn check_syntax(&self, path: &Path) -> Result<(), ControlError>;

    /// Ask the proxy to gracefully reload its configuration.
    async fn send_reload_signal(&self) -> Result<(), ControlError>;

    /// Whether the proxy is serving with the generation started by the last
    /// signal. `health_url` is an HTTP URL that must answer when known.
    async fn query_health(&self, health_url: Option<&str>) -> HealthStatus;
}

/// Controls an nginx master process.
pub struct NginxControl {
    binary: PathBuf,
    check_args: Vec<String>,
    pid_file: PathBuf,
    check_timeout: Duration,
    client: reqwest::Client,
    /// Worker PIDs observed just before the last reload signal.
    workers_before: Mutex<Option<BTreeSet<u32>>>,
}

impl NginxControl {
    pub fn new(config: &ProxyControlConfig) -> Result<Self, ControlError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(Duration::from_secs(config.health_timeout_secs))
            // The health check targets the proxy on loopback, usually with a self-signed cert.
            .danger_accept_invalid_certs(true)
            .no_proxy()
            .build()
            .map_err(|e| ControlError::Client(e.to_string()))?;

        Ok(Self {
            binary: config.binary.clone(),
            check_args: config.check_args.clone(),
            pid_file: config.pid_file.clone(),
            check_timeout: Duration::from_secs(config.check_timeout_secs),
            client,
            workers_before: Mutex::new(None),
        })
    }

    fn read_pid(&self) -> Result<u32, ControlError> {
        let content = std::fs::read_to_string(&self.pid_file).map_err(|e| {
            ControlError::NotRunning(format!("cannot read {}: {}", self.pid_file.display(), e))
        })?;
        match content.trim().parse::<u32>() {
            // 0 and 1 would address our own process group or init.
            Ok(pid) if pid > 1 && i32::try_from(pid).is_ok() => Ok(pid),
            _ => Err(ControlError::NotRunning(format!(
                "{} does not contain a usable pid: {:?}",
                self.pid_file.display(),
                content.trim()
            ))),
        }
    }

    /// Children of the master, or `None` when they cannot be listed.
    async fn list_workers(&self, master: u32) -> Option<BTreeSet<u32>> {
        let output = run_with_timeout(
            Command::new("pgrep").arg("-P").arg(master.to_string()),
            "pgrep",
            self.check_timeout,
        )
        .await
        .ok()?;
        // pgrep exits 1 when nothing matched, >1 on real errors.
        if output.status.code().map_or(true, |c| c > 1) {
            return None;
        }
        Some(
            String::from_utf8_lossy(&output.stdout)
                .lines()
                .filter_map(|l| l.trim().parse().ok())
                .collect(),
        )
    }

    fn snapshot(&self) -> Option<BTreeSet<u32>> {
        self.workers_before
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl ProxyControl for NginxControl {
    async fn check_syntax(&self, path: &Path) -> Result<(), ControlError> {
        let program = self.binary.display().to_string();
        let mut cmd = Command::new(&self.binary);
        cmd.args(&self.check_args).arg("-t").arg("-c").arg(path);

        let output = run_with_timeout(&mut cmd, &program, self.check_timeout).await?;
        if output.status.success() {
            tracing::debug!(path = %path.display(), "Syntax check passed");
            Ok(())
        } else {
            Err(ControlError::SyntaxRejected {
                path: path.to_path_buf(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    async fn send_reload_signal(&self) -> Result<(), ControlError> {
        let pid = self.read_pid()?;
        let before = self.list_workers(pid).await;
        *self
            .workers_before
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = before;

        match kill(master_pid(pid), Signal::SIGHUP) {
            Ok(()) => {}
            Err(Errno::ESRCH) => {
                return Err(ControlError::NotRunning(format!("no process with pid {}", pid)))
            }
            Err(e) => {
                return Err(ControlError::SignalRejected {
                    pid,
                    reason: e.desc().to_string(),
                })
            }
        }
        tracing::info!(pid, "Reload signal delivered");
        Ok(())
    }

    async fn query_health(&self, health_url: Option<&str>) -> HealthStatus {
        let pid = match self.read_pid() {
            Ok(pid) => pid,
            Err(e) => return HealthStatus::NotServing(e.to_string()),
        };
        // Signal 0 only checks that the master still exists; EPERM means it
        // does but belongs to another user.
        match kill(master_pid(pid), None) {
            Ok(()) | Err(Errno::EPERM) => {}
            Err(e) => {
                return HealthStatus::NotServing(format!("master pid {} not reachable: {}", pid, e.desc()))
            }
        }

        if let Some(before) = self.snapshot().filter(|b| !b.is_empty()) {
            if let Some(current) = self.list_workers(pid).await {
                if current.difference(&before).next().is_none() {
                    return HealthStatus::NotServing("no new worker generation yet".into());
                }
            }
        }

        let Some(url) = health_url else {
            return HealthStatus::Serving;
        };
        match self.client.get(url).send().await {
            Ok(resp) if resp.status().is_server_error() => {
                HealthStatus::NotServing(format!("health check returned {}", resp.status()))
            }
            Ok(_) => HealthStatus::Serving,
            Err(e) => HealthStatus::NotServing(format!("health check failed: {}", e)),
        }
    }
}

fn master_pid(pid: u32) -> Pid {
    // read_pid only hands out values that fit in an i32.
    Pid::from_raw(pid as i32)
}

async fn run_with_timeout(
    cmd: &mut Command,
    program: &str,
    timeout: Duration,
) -> Result<Output, ControlError> {
    cmd.kill_on_drop(true);
    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(source)) => Err(ControlError::Spawn {
            program: program.to_string(),
            source,
        }),
        Err(_) => Err(ControlError::TimedOut {
            program: program.to_string(),
            timeout,
        }),
    }
}

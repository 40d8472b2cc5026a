//! Stage, check, swap.
//!
//! # Responsibilities
//! - Write candidate configs next to the live file
//! - Reject candidates the proxy's own checker refuses
//! - Replace the live file with a single rename, keeping one previous version
//!
//! # Design Decisions
//! - The live path is only ever touched by `rename(2)`, never written in place
//! - A rejected candidate stays on the staging path for inspection
//! - History is written through a temp file so it is never half-written either

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::config::PathsConfig;
use crate::observability::metrics;
use crate::reload::control::{ControlError, ProxyControl};
use crate::render::RenderedConfig;

#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error("failed to write staged config {}: {source}", .path.display())]
    StageWriteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("candidate {} rejected by the proxy: {detail}", .path.display())]
    SyntaxInvalid {
        path: PathBuf,
        exit_code: Option<i32>,
        detail: String,
    },
    #[error("failed to update history slot {}: {source}", .path.display())]
    HistoryFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to swap {} into {}: {source}", .from.display(), .to.display())]
    SwapFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// The configuration currently active on disk and its single-slot history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstalledConfig {
    pub live: PathBuf,
    pub previous: Option<PathBuf>,
    pub bytes: u64,
}

/// Presence of one file in the layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotStatus {
    pub path: PathBuf,
    pub present: bool,
    pub bytes: Option<u64>,
}

impl SlotStatus {
    fn of(path: &Path) -> Self {
        let metadata = fs::metadata(path).ok().filter(|m| m.is_file());
        Self {
            path: path.to_path_buf(),
            present: metadata.is_some(),
            bytes: metadata.map(|m| m.len()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallStatus {
    pub live: SlotStatus,
    pub previous: SlotStatus,
    pub staged: SlotStatus,
}

pub struct Installer {
    live: PathBuf,
    staging: PathBuf,
    history: PathBuf,
    control: Arc<dyn ProxyControl>,
}

impl Installer {
    pub fn new(paths: &PathsConfig, control: Arc<dyn ProxyControl>) -> Self {
        Self {
            live: paths.live.clone(),
            staging: paths.staging.clone(),
            history: paths.history.clone(),
            control,
        }
    }

    pub fn live_path(&self) -> &Path {
        &self.live
    }

    pub fn staging_path(&self) -> &Path {
        &self.staging
    }

    pub fn history_path(&self) -> &Path {
        &self.history
    }

    /// Stage, check and swap `rendered` into the live path.
    pub async fn install(&self, rendered: &RenderedConfig) -> Result<InstalledConfig, InstallError> {
        let started = Instant::now();
        self.stage(rendered.as_bytes())?;
        self.check_staged().await?;
        let installed = self.commit()?;
        metrics::record_install_duration(started.elapsed());
        tracing::info!(
            live = %installed.live.display(),
            bytes = installed.bytes,
            has_previous = installed.previous.is_some(),
            "Configuration installed"
        );
        Ok(installed)
    }

    /// Write `bytes` to the staging path and flush them to disk.
    pub fn stage(&self, bytes: &[u8]) -> Result<(), InstallError> {
        let stage_err = |source| InstallError::StageWriteFailed {
            path: self.staging.clone(),
            source,
        };
        let mut file = File::create(&self.staging).map_err(stage_err)?;
        file.write_all(bytes).map_err(stage_err)?;
        file.sync_all().map_err(stage_err)?;

        if let Ok(live_meta) = fs::metadata(&self.live) {
            if let Err(e) = fs::set_permissions(&self.staging, live_meta.permissions()) {
                tracing::warn!(path = %self.staging.display(), error = %e, "Could not copy live file permissions");
            }
        }
        tracing::debug!(path = %self.staging.display(), bytes = bytes.len(), "Candidate staged");
        Ok(())
    }

    /// Run the proxy's syntax checker on the staged file.
    pub async fn check_staged(&self) -> Result<(), InstallError> {
        self.control.check_syntax(&self.staging).await.map_err(|e| {
            let exit_code = match &e {
                ControlError::SyntaxRejected { code, .. } => *code,
                _ => None,
            };
            tracing::error!(
                path = %self.staging.display(),
                error = %e,
                "Staged configuration rejected; live configuration untouched"
            );
            InstallError::SyntaxInvalid {
                path: self.staging.clone(),
                exit_code,
                detail: e.to_string(),
            }
        })
    }

    /// Demote the live file into history, then rename the staged file over it.
    pub fn commit(&self) -> Result<InstalledConfig, InstallError> {
        let previous = self.demote_live()?;
        self.swap_staged(previous)
    }

    /// Re-install the history slot without touching history.
    ///
    /// Returns `None` when there was no previous version, in which case the
    /// live file is removed to restore the earlier absent state.
    pub async fn restore_previous(&self) -> Result<Option<InstalledConfig>, InstallError> {
        if !self.history.is_file() {
            match fs::remove_file(&self.live) {
                Ok(()) => {
                    sync_parent(&self.live);
                    tracing::warn!(live = %self.live.display(), "No previous configuration; live file removed");
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(InstallError::SwapFailed {
                        from: self.live.clone(),
                        to: self.live.clone(),
                        source,
                    })
                }
            }
            return Ok(None);
        }

        let bytes = fs::read(&self.history).map_err(|source| InstallError::HistoryFailed {
            path: self.history.clone(),
            source,
        })?;
        self.stage(&bytes)?;
        self.check_staged().await?;
        let restored = self.swap_staged(Some(self.history.clone()))?;
        tracing::info!(live = %restored.live.display(), "Previous configuration restored");
        Ok(Some(restored))
    }

    pub fn status(&self) -> InstallStatus {
        InstallStatus {
            live: SlotStatus::of(&self.live),
            previous: SlotStatus::of(&self.history),
            staged: SlotStatus::of(&self.staging),
        }
    }

    fn demote_live(&self) -> Result<Option<PathBuf>, InstallError> {
        let history_err = |source| InstallError::HistoryFailed {
            path: self.history.clone(),
            source,
        };

        if !self.live.is_file() {
            // Nothing was live, so an older history file no longer describes
            // the state to roll back to.
            match fs::remove_file(&self.history) {
                Ok(()) => tracing::warn!(path = %self.history.display(), "Discarded stale history slot"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(history_err(e)),
            }
            return Ok(None);
        }

        let tmp = sibling_tmp(&self.history);
        fs::copy(&self.live, &tmp).map_err(history_err)?;
        File::open(&tmp).and_then(|f| f.sync_all()).map_err(history_err)?;
        fs::rename(&tmp, &self.history).map_err(history_err)?;
        tracing::debug!(history = %self.history.display(), "Live configuration demoted to history");
        Ok(Some(self.history.clone()))
    }

    fn swap_staged(&self, previous: Option<PathBuf>) -> Result<InstalledConfig, InstallError> {
        let bytes = fs::metadata(&self.staging).map(|m| m.len()).unwrap_or(0);
        fs::rename(&self.staging, &self.live).map_err(|source| InstallError::SwapFailed {
            from: self.staging.clone(),
            to: self.live.clone(),
            source,
        })?;
        sync_parent(&self.live);

        Ok(InstalledConfig {
            live: self.live.clone(),
            previous,
            bytes,
        })
    }
}

fn sibling_tmp(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Persist a rename by syncing the containing directory.
fn sync_parent(path: &Path) {
    let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return;
    };
    if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
        tracing::warn!(dir = %dir.display(), error = %e, "Directory sync failed");
    }
}

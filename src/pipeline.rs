//! One install/reload cycle.
//!
//! ```text
//! ProxyParameters
//!     → validate            (no side effects)
//!     → render              (no side effects)
//!     → acquire lock        (bounded wait, cancellable)
//!     → checkpoint          (last point a cancel is honoured)
//!     → install             (stage, check, swap)
//!     → reload              (signal, await ack, rollback once on failure)
//!     → release lock
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::ReloaderConfig;
use crate::install::{InstallError, InstallLock, InstallStatus, InstalledConfig, Installer, LockError};
use crate::lifecycle::CancelToken;
use crate::observability::metrics;
use crate::params::{ParameterValidator, ProxyParameters, ValidatedParameters, ValidationError};
use crate::reload::{ControlError, NginxControl, ProxyControl, ReloadCoordinator, ReloadError, ReloadOutcome};
use crate::render::{render, render_value, RenderError, RenderedConfig, Template};

#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Lock(LockError),
    #[error("install request cancelled before staging")]
    Cancelled,
    #[error(transparent)]
    Install(#[from] InstallError),
    #[error(transparent)]
    Reload(#[from] ReloadError),
    #[error("no previous configuration at {} to roll back to", .0.display())]
    NothingToRollBack(PathBuf),
    #[error("reload after manual rollback failed: {0}")]
    ReloadFailed(ReloadOutcome),
    #[error(transparent)]
    Control(#[from] ControlError),
}

impl From<LockError> for ApplyError {
    fn from(e: LockError) -> Self {
        match e {
            LockError::Cancelled => ApplyError::Cancelled,
            other => ApplyError::Lock(other),
        }
    }
}

impl ApplyError {
    pub fn label(&self) -> &'static str {
        match self {
            ApplyError::Invalid(_) => "invalid_parameter",
            ApplyError::Render(_) => "render_failed",
            ApplyError::Lock(_) => "lock_failed",
            ApplyError::Cancelled => "cancelled",
            ApplyError::Install(InstallError::SyntaxInvalid { .. }) => "syntax_invalid",
            ApplyError::Install(_) => "install_failed",
            ApplyError::Reload(ReloadError::RolledBack { .. }) => "rolled_back",
            ApplyError::Reload(ReloadError::RollbackFailed { .. }) => "rollback_failed",
            ApplyError::NothingToRollBack(_) => "nothing_to_roll_back",
            ApplyError::ReloadFailed(_) => "reload_failed",
            ApplyError::Control(_) => "control_setup",
        }
    }
}

/// Summary of a successful apply.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyReport {
    pub attempt: Uuid,
    pub installed: InstalledConfig,
    pub warnings: Vec<String>,
}

pub struct ConfigPipeline {
    validator: ParameterValidator,
    template: Template,
    installer: Installer,
    coordinator: ReloadCoordinator,
    health_url: String,
    lock_path: PathBuf,
    lock_timeout: Duration,
}

impl ConfigPipeline {
    /// Build from configuration, using the system account database.
    pub fn from_config(config: &ReloaderConfig, control: Arc<dyn ProxyControl>) -> Result<Self, ApplyError> {
        let template = Template::load(config.paths.template.as_deref())?;
        let validator = ParameterValidator::system(config.limits.max_body_size_ceiling_kb);
        Ok(Self::new(config, template, validator, control))
    }

    /// Build against the nginx described in `config.proxy`.
    pub fn with_nginx(config: &ReloaderConfig) -> Result<Self, ApplyError> {
        let control = Arc::new(NginxControl::new(&config.proxy)?);
        Self::from_config(config, control)
    }

    pub fn new(
        config: &ReloaderConfig,
        template: Template,
        validator: ParameterValidator,
        control: Arc<dyn ProxyControl>,
    ) -> Self {
        Self {
            validator,
            template,
            installer: Installer::new(&config.paths, control.clone()),
            coordinator: ReloadCoordinator::new(control, config.paths.live.clone(), &config.proxy),
            health_url: config.proxy.health_url.clone(),
            lock_path: config.paths.lock.clone(),
            lock_timeout: Duration::from_secs(config.limits.lock_timeout_secs),
        }
    }

    pub fn validate(&self, params: &ProxyParameters) -> Result<ValidatedParameters, ApplyError> {
        Ok(self.validator.validate(params)?)
    }

    /// Validate and render without touching the live configuration.
    pub fn render(&self, params: &ProxyParameters) -> Result<RenderedConfig, ApplyError> {
        let validated = self.validate(params)?;
        Ok(render(&self.template, &validated)?)
    }

    /// Run a full cycle for `params`.
    pub async fn apply(&self, params: &ProxyParameters, cancel: &CancelToken) -> Result<ApplyReport, ApplyError> {
        let attempt = Uuid::new_v4();
        let span = tracing::info_span!("apply", %attempt);
        let result = self.apply_inner(params, cancel, attempt).instrument(span).await;
        match &result {
            Ok(_) => metrics::record_apply("success"),
            Err(e) => metrics::record_apply(e.label()),
        }
        result
    }

    async fn apply_inner(
        &self,
        params: &ProxyParameters,
        cancel: &CancelToken,
        attempt: Uuid,
    ) -> Result<ApplyReport, ApplyError> {
        let validated = self.validate(params)?;
        let rendered = render(&self.template, &validated)?;
        let health_url = render_value("proxy.health_url", &self.health_url, &validated)?;

        let _lock = InstallLock::acquire(&self.lock_path, self.lock_timeout, cancel).await?;
        if cancel.is_cancelled() {
            tracing::info!("Cancelled before staging");
            return Err(ApplyError::Cancelled);
        }

        let installed = self.installer.install(&rendered).await?;
        self.coordinator
            .reload_with_rollback(&self.installer, Some(&health_url))
            .await?;

        Ok(ApplyReport {
            attempt,
            installed,
            warnings: rendered.warnings().iter().map(|w| w.to_string()).collect(),
        })
    }

    /// Restore the history slot and reload, without any further rollback.
    pub async fn rollback(&self, cancel: &CancelToken) -> Result<ReloadOutcome, ApplyError> {
        let span = tracing::info_span!("rollback", attempt = %Uuid::new_v4());
        async {
            let _lock = InstallLock::acquire(&self.lock_path, self.lock_timeout, cancel).await?;
            if cancel.is_cancelled() {
                return Err(ApplyError::Cancelled);
            }
            if !self.installer.history_path().is_file() {
                return Err(ApplyError::NothingToRollBack(
                    self.installer.history_path().to_path_buf(),
                ));
            }

            self.installer.restore_previous().await?;
            let outcome = self.coordinator.reload(None).await;
            if outcome.is_success() {
                metrics::record_rollback("success");
                Ok(outcome)
            } else {
                metrics::record_rollback("reload_failed");
                Err(ApplyError::ReloadFailed(outcome))
            }
        }
        .instrument(span)
        .await
    }

    pub fn status(&self) -> InstallStatus {
        self.installer.status()
    }

    pub fn installer(&self) -> &Installer {
        &self.installer
    }
}

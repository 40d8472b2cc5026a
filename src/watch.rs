//! Watch mode: keep the proxy in line with the reloader config.
//!
//! Re-applies when the config file changes or on SIGHUP; SIGTERM/SIGINT
//! cancel any queued apply and end the loop.

use std::net::SocketAddr;
use std::path::Path;

use tokio::sync::mpsc;

use crate::config::watcher::ConfigWatcher;
use crate::config::ReloaderConfig;
use crate::lifecycle::{CancelToken, SignalEvent, Signals};
use crate::observability::metrics;
use crate::pipeline::{ApplyError, ConfigPipeline};

pub async fn run_watch(config_path: &Path, initial: ReloaderConfig) -> Result<(), Box<dyn std::error::Error>> {
    if initial.observability.metrics_enabled {
        let addr: SocketAddr = initial.observability.metrics_address.parse()?;
        metrics::init_metrics(addr);
    }

    let cancel = CancelToken::new();
    let (reapply_tx, mut reapply_rx) = mpsc::unbounded_channel();
    let mut signals = Signals::register()?;
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        loop {
            match signals.recv().await {
                SignalEvent::Reapply => {
                    if reapply_tx.send(()).is_err() {
                        break;
                    }
                }
                SignalEvent::Shutdown => {
                    signal_cancel.cancel();
                    break;
                }
            }
        }
    });

    let (_watch, mut updates) = ConfigWatcher::new(config_path).spawn()?;

    let mut config = initial;
    let mut pipeline = ConfigPipeline::with_nginx(&config)?;
    apply_logged(&pipeline, &config, &cancel).await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            Some(next) = updates.recv() => {
                match ConfigPipeline::with_nginx(&next) {
                    Ok(rebuilt) => {
                        pipeline = rebuilt;
                        config = next;
                        apply_logged(&pipeline, &config, &cancel).await;
                    }
                    Err(e) => tracing::error!(error = %e, "Changed config unusable, keeping current pipeline"),
                }
            }
            Some(()) = reapply_rx.recv() => {
                apply_logged(&pipeline, &config, &cancel).await;
            }
        }
    }

    tracing::info!("Watch loop stopped");
    Ok(())
}

async fn apply_logged(pipeline: &ConfigPipeline, config: &ReloaderConfig, cancel: &CancelToken) {
    match pipeline.apply(&config.parameters, cancel).await {
        Ok(report) => tracing::info!(
            attempt = %report.attempt,
            live = %report.installed.live.display(),
            "Configuration applied"
        ),
        Err(ApplyError::Cancelled) => tracing::info!("Apply cancelled"),
        Err(e) => tracing::error!(error = %e, result = e.label(), "Apply failed"),
    }
}

//! Reloader config file watching for watch mode.
//!
//! # Design Decisions
//! - The parent directory is watched and events are filtered on the file
//!   name, so saves that replace the file by rename keep triggering
//! - Bursts of events are collapsed: the file is loaded once things have
//!   been quiet for the debounce window
//! - A config that fails to load is logged and skipped; the previous one
//!   stays in effect

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::event::EventKind;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::loader::load_config;
use crate::config::schema::ReloaderConfig;

const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(250);

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("{} has no parent directory or file name", .0.display())]
    BadPath(PathBuf),
    #[error(transparent)]
    Notify(#[from] notify::Error),
}

pub struct ConfigWatcher {
    path: PathBuf,
    debounce: Duration,
}

/// Keeps the OS watch and the debounce task alive; both stop on drop.
pub struct WatchHandle {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl ConfigWatcher {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            debounce: DEFAULT_DEBOUNCE,
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Start watching. Each settled change yields one freshly loaded config.
    pub fn spawn(self) -> Result<(WatchHandle, mpsc::UnboundedReceiver<ReloaderConfig>), WatchError> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let file_name: OsString = self
            .path
            .file_name()
            .ok_or_else(|| WatchError::BadPath(self.path.clone()))?
            .to_os_string();

        let (touch_tx, touch_rx) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if touches(&event, &file_name) => {
                    if touch_tx.send(()).is_err() {
                        tracing::debug!("Config watcher shutting down, change ignored");
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Config watch error"),
            },
            Config::default(),
        )?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(debounce_loop(self.path.clone(), self.debounce, touch_rx, update_tx));

        tracing::info!(path = %self.path.display(), dir = %dir.display(), "Config watcher started");
        Ok((
            WatchHandle {
                _watcher: watcher,
                task,
            },
            update_rx,
        ))
    }
}

fn touches(event: &Event, file_name: &OsString) -> bool {
    !matches!(event.kind, EventKind::Access(_))
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(file_name.as_os_str()))
}

async fn debounce_loop(
    path: PathBuf,
    debounce: Duration,
    mut touches: mpsc::UnboundedReceiver<()>,
    updates: mpsc::UnboundedSender<ReloaderConfig>,
) {
    while touches.recv().await.is_some() {
        loop {
            match tokio::time::timeout(debounce, touches.recv()).await {
                Ok(Some(())) => continue,
                Ok(None) => return,
                Err(_) => break,
            }
        }

        // The file can be briefly absent mid-rename; the create event that
        // follows brings us back here.
        if !path.exists() {
            continue;
        }
        match load_config(&path) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "Reloader config change loaded");
                if updates.send(config).is_err() {
                    tracing::warn!("Config update receiver dropped, stopping watcher");
                    return;
                }
            }
            Err(e) => tracing::error!(error = %e, "Changed config rejected, keeping the current one"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn save_by_rename(path: &Path, content: &str) {
        let tmp = path.with_extension("toml.swp");
        std::fs::write(&tmp, content).unwrap();
        std::fs::rename(&tmp, path).unwrap();
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<ReloaderConfig>) -> ReloaderConfig {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no config update within 5s")
            .expect("watcher stopped")
    }

    #[tokio::test]
    async fn test_rename_saves_keep_triggering() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reloader.toml");
        std::fs::write(&path, "[parameters]\nssl_port = 8001\n").unwrap();

        let (_handle, mut rx) = ConfigWatcher::new(&path)
            .with_debounce(Duration::from_millis(50))
            .spawn()
            .unwrap();

        save_by_rename(&path, "[parameters]\nssl_port = 9001\n");
        assert_eq!(next(&mut rx).await.parameters.ssl_port, 9001);

        save_by_rename(&path, "[parameters]\nssl_port = 9002\n");
        assert_eq!(next(&mut rx).await.parameters.ssl_port, 9002);
    }

    #[tokio::test]
    async fn test_burst_collapses_to_latest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reloader.toml");
        std::fs::write(&path, "").unwrap();

        let (_handle, mut rx) = ConfigWatcher::new(&path)
            .with_debounce(Duration::from_millis(300))
            .spawn()
            .unwrap();

        for port in [9001, 9002, 9003] {
            std::fs::write(&path, format!("[parameters]\nssl_port = {}\n", port)).unwrap();
        }
        assert_eq!(next(&mut rx).await.parameters.ssl_port, 9003);
        assert!(tokio::time::timeout(Duration::from_millis(500), rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_other_files_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reloader.toml");
        std::fs::write(&path, "").unwrap();

        let (_handle, mut rx) = ConfigWatcher::new(&path)
            .with_debounce(Duration::from_millis(50))
            .spawn()
            .unwrap();

        std::fs::write(dir.path().join("unrelated.toml"), "x = 1").unwrap();
        assert!(tokio::time::timeout(Duration::from_millis(400), rx.recv()).await.is_err());
    }

    #[test]
    fn test_path_without_file_name() {
        let err = ConfigWatcher::new(Path::new("/")).spawn().err().unwrap();
        assert!(matches!(err, WatchError::BadPath(_)));
    }
}

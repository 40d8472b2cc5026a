//! Exclusive install lock.
//!
//! An advisory `flock` on a dedicated file. The kernel drops it when the
//! holder exits, so a crashed cycle never wedges later ones. The file itself
//! is never removed; it only records the holder's pid for diagnostics.

use std::fs::{File, OpenOptions, TryLockError};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;

use crate::lifecycle::CancelToken;
use crate::resilience::backoff::Backoff;

const POLL_BASE: Duration = Duration::from_millis(20);
const POLL_MAX: Duration = Duration::from_millis(500);

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("could not acquire {} within {waited:?} (held by {})", .path.display(), .holder.as_deref().unwrap_or("unknown"))]
    Timeout {
        path: PathBuf,
        waited: Duration,
        holder: Option<String>,
    },
    #[error("cancelled while waiting for the install lock")]
    Cancelled,
    #[error("lock file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Held for the whole install/reload cycle; released on drop.
#[derive(Debug)]
pub struct InstallLock {
    file: File,
    path: PathBuf,
}

impl InstallLock {
    /// Wait up to `timeout` for the lock, giving up early if `cancel` fires.
    pub async fn acquire(path: &Path, timeout: Duration, cancel: &CancelToken) -> Result<Self, LockError> {
        let io_err = |source: io::Error| LockError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .map_err(io_err)?;

        let deadline = Instant::now() + timeout;
        let mut backoff = Backoff::new(POLL_BASE, POLL_MAX);
        loop {
            if cancel.is_cancelled() {
                return Err(LockError::Cancelled);
            }
            match file.try_lock() {
                Ok(()) => {
                    record_holder(&mut file).map_err(io_err)?;
                    tracing::debug!(path = %path.display(), waits = backoff.attempts(), "Install lock acquired");
                    return Ok(Self {
                        file,
                        path: path.to_path_buf(),
                    });
                }
                Err(TryLockError::WouldBlock) => {}
                Err(TryLockError::Error(e)) => return Err(io_err(e)),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(LockError::Timeout {
                    path: path.to_path_buf(),
                    waited: timeout,
                    holder: read_holder(&mut file),
                });
            }
            if backoff.attempts() == 0 {
                tracing::info!(path = %path.display(), "Install lock busy, waiting");
            }
            let delay = backoff.next_within(deadline - now);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(LockError::Cancelled),
            }
        }
    }
}

impl Drop for InstallLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
        tracing::debug!(path = %self.path.display(), "Install lock released");
    }
}

fn record_holder(file: &mut File) -> io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    writeln!(file, "{}", std::process::id())?;
    file.sync_all()
}

fn read_holder(file: &mut File) -> Option<String> {
    let mut content = String::new();
    file.seek(SeekFrom::Start(0)).ok()?;
    file.read_to_string(&mut content).ok()?;
    let holder = content.trim();
    (!holder.is_empty()).then(|| format!("pid {}", holder))
}

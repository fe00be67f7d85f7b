//! Periodic removal of stale working directories.
//!
//! Jobs remove their own directory when they finish, but a process killed
//! mid-job leaves its directory behind. The sweeper deletes every entry of
//! the work root that has not been modified for longer than the configured
//! age. The age must comfortably exceed the longest build, otherwise a live
//! job's directory can be removed under it.

use carpenter_core::Result;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default time between sweeps (1 hour).
pub const DEFAULT_PURGE_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Default age after which an entry is removed (4 hours).
pub const DEFAULT_PURGE_AGE: Duration = Duration::from_secs(4 * 60 * 60);

/// Result of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeSummary {
    /// Entries removed.
    pub purged: usize,
    /// Entries that could not be inspected or removed.
    pub failed: usize,
}

/// Deletes stale entries under the work root.
#[derive(Debug, Clone)]
pub struct PurgeSweeper {
    root: PathBuf,
    age: Duration,
    interval: Duration,
}

impl PurgeSweeper {
    pub fn new(root: impl Into<PathBuf>, age: Duration) -> Self {
        Self {
            root: root.into(),
            age,
            interval: DEFAULT_PURGE_INTERVAL,
        }
    }

    /// Sets the time between sweeps. Zero is raised to one millisecond.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn age(&self) -> Duration {
        self.age
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Remove every immediate child of the root older than the age.
    ///
    /// Fails only when the root itself cannot be listed.
    pub async fn sweep(&self) -> Result<PurgeSummary> {
        let threshold = SystemTime::now()
            .checked_sub(self.age)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut summary = PurgeSummary::default();

        let mut entries = tokio::fs::read_dir(&self.root).await?;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(root = %self.root.display(), error = %e, "Failed to read work root entry");
                    summary.failed += 1;
                    break;
                }
            };

            let path = entry.path();
            match purge_entry(&path, threshold).await {
                Ok(true) => {
                    debug!(path = %path.display(), "Purged stale entry");
                    summary.purged += 1;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to purge entry");
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }

    /// Sweep on every interval tick until `shutdown` is cancelled.
    ///
    /// The first sweep happens one interval after start.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            root = %self.root.display(),
            interval_secs = self.interval.as_secs(),
            age_secs = self.age.as_secs(),
            "Purge daemon starting"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Purge daemon shutting down");
                    break;
                }

                _ = interval.tick() => {
                    match self.sweep().await {
                        Ok(summary) => info!(
                            purged = summary.purged,
                            failed = summary.failed,
                            "Purged stale working directories"
                        ),
                        Err(e) => error!(root = %self.root.display(), error = %e, "Purge sweep failed"),
                    }
                }
            }
        }
    }

    /// Run in a background task owned by the returned handle.
    pub fn spawn(self, shutdown: CancellationToken) -> PurgeDaemon {
        let token = shutdown.child_token();
        let handle = tokio::spawn(self.run(token.clone()));
        PurgeDaemon { token, handle }
    }
}

/// Handle to a running purge task.
pub struct PurgeDaemon {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl PurgeDaemon {
    /// Stop the task and wait for it to finish its current sweep.
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            error!(error = %e, "Purge daemon task failed");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Remove `path` if it was last modified before `threshold`.
async fn purge_entry(path: &Path, threshold: SystemTime) -> std::io::Result<bool> {
    let metadata = tokio::fs::metadata(path).await?;
    if metadata.modified()? >= threshold {
        return Ok(false);
    }

    if metadata.is_dir() {
        tokio::fs::remove_dir_all(path).await?;
    } else {
        tokio::fs::remove_file(path).await?;
    }
    Ok(true)
}

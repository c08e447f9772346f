//! Recursive discovery of supported files under a source root.

mod fs;
mod queue;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub use fs::{FileSystem, FsMetadata, InMemoryFs, ReadDirStream, RealFs};
pub use queue::{BatchQueue, BatchReceiver, BatchSender};

/// A file found by the walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// How a walk ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryStatus {
    /// Every reachable directory was visited.
    Completed,
    /// The cancellation token fired or the consumer went away.
    Cancelled,
    /// The root itself could not be listed; nothing was posted.
    RootUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryOutcome {
    pub status: DiscoveryStatus,
    pub files_posted: u64,
    pub dirs_skipped: u64,
}

/// Predicate deciding whether a path is handed to the updater.
pub type FileFilter = dyn Fn(&Path) -> bool + Send + Sync;

/// Walks a root depth-first in lexicographic order, posting matching files
/// into a bounded queue.
///
/// A `Discoverer` holds no per-walk state, so the same instance can be
/// restarted for a fresh pass at any time.
pub struct Discoverer {
    fs: Arc<dyn FileSystem>,
}

impl fmt::Debug for Discoverer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Discoverer").finish_non_exhaustive()
    }
}

impl Discoverer {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self { fs }
    }

    /// Walk `root`, posting every file accepted by `filter`.
    ///
    /// The sender is always completed before returning, whatever the outcome.
    pub async fn walk(
        &self,
        root: &Path,
        filter: &FileFilter,
        mut sender: BatchSender<DiscoveredFile>,
        cancel: &CancellationToken,
    ) -> DiscoveryOutcome {
        let mut outcome = DiscoveryOutcome {
            status: DiscoveryStatus::Completed,
            files_posted: 0,
            dirs_skipped: 0,
        };

        let mut stack = match self.list_dir(root).await {
            Ok(entries) => vec![entries.into_iter()],
            Err(err) => {
                warn!(root = %root.display(), error = %err, "source root unavailable");
                outcome.status = DiscoveryStatus::RootUnavailable;
                sender.complete();
                return outcome;
            }
        };

        while let Some(entries) = stack.last_mut() {
            let Some(path) = entries.next() else {
                stack.pop();
                continue;
            };
            if cancel.is_cancelled() {
                outcome.status = DiscoveryStatus::Cancelled;
                break;
            }

            let metadata = match self.fs.metadata(&path).await {
                Ok(metadata) => metadata,
                Err(err) => {
                    debug!(path = %path.display(), error = %err, "skipping unreadable entry");
                    continue;
                }
            };

            if metadata.is_dir {
                if metadata.is_symlink {
                    debug!(path = %path.display(), "not following symlinked directory");
                    continue;
                }
                match self.list_dir(&path).await {
                    Ok(children) => stack.push(children.into_iter()),
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "skipping unreadable directory");
                        outcome.dirs_skipped += 1;
                    }
                }
                continue;
            }

            if !metadata.is_file || !filter(&path) {
                continue;
            }

            let file = DiscoveredFile {
                modified: metadata
                    .modified
                    .map(DateTime::<Utc>::from)
                    .unwrap_or(DateTime::UNIX_EPOCH),
                size: metadata.len,
                path,
            };

            let posted = tokio::select! {
                biased;
                _ = cancel.cancelled() => false,
                posted = sender.post(file) => posted,
            };
            if !posted {
                outcome.status = DiscoveryStatus::Cancelled;
                break;
            }
            outcome.files_posted += 1;
        }

        sender.complete();
        outcome
    }

    async fn list_dir(&self, path: &Path) -> crate::error::Result<Vec<PathBuf>> {
        let mut stream = self.fs.read_dir(path).await?;
        let mut entries = Vec::new();
        while let Some(entry) = stream.next_entry().await? {
            entries.push(entry);
        }
        entries.sort();
        Ok(entries)
    }
}

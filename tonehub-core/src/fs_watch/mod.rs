//! Filesystem watch for source roots.
//!
//! A thin wrapper around `notify` that debounces raw notifications per source
//! into a single [`ReconcilerCommand::SourceChanged`]. Paths are not
//! forwarded; the reconciler only needs to know which source to rescan.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use notify::event::EventKind;
use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{RwLock, mpsc};
use tokio::task::{JoinHandle, spawn_blocking};
use tokio::time::{Duration, timeout};
use tonehub_model::{Source, SourceId};
use tracing::{debug, warn};

use crate::config::WatchConfig;
use crate::error::{IndexError, Result};
use crate::reconciler::ReconcilerCommand;

/// Registry of per-source `notify` watchers.
pub struct SourceWatchService {
    config: WatchConfig,
    commands: mpsc::Sender<ReconcilerCommand>,
    sources: Arc<RwLock<HashMap<SourceId, SourceWatch>>>,
}

impl fmt::Debug for SourceWatchService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("SourceWatchService");
        debug.field("config", &self.config);
        match self.sources.try_read() {
            Ok(guard) => {
                let active = guard.values().filter(|watch| watch.watcher.is_some()).count();
                debug
                    .field("source_count", &guard.len())
                    .field("active_watchers", &active);
            }
            Err(_) => {
                debug.field("sources", &"<locked>");
            }
        }
        debug.finish()
    }
}

impl SourceWatchService {
    pub fn new(config: WatchConfig, commands: mpsc::Sender<ReconcilerCommand>) -> Self {
        Self {
            config,
            commands,
            sources: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start watching `source`'s root recursively. A source that is already
    /// registered is left as is.
    ///
    /// The `notify` watcher is built in the background because recursive
    /// registration walks the whole tree.
    pub async fn register(&self, source: &Source) -> Result<()> {
        if self.sources.read().await.contains_key(&source.id) {
            return Ok(());
        }

        let source_id = source.id;
        let root = source.location.clone();
        let capacity = self.config.channel_capacity.max(1);
        let (tx, rx) = mpsc::channel::<WatchMessage>(capacity);

        let flush_task = spawn_debounce_loop(
            source_id,
            rx,
            self.commands.clone(),
            self.config.debounce_window(),
        );

        {
            let mut guard = self.sources.write().await;
            if guard.contains_key(&source_id) {
                flush_task.abort();
                return Ok(());
            }
            guard.insert(
                source_id,
                SourceWatch {
                    watcher: None,
                    flush_task,
                },
            );
        }

        let sources = Arc::clone(&self.sources);
        tokio::spawn(async move {
            let build = spawn_blocking(move || init_watcher(root, tx)).await;
            let mut guard = sources.write().await;
            match build {
                Ok(Ok(watcher)) => {
                    if let Some(entry) = guard.get_mut(&source_id) {
                        entry.watcher = Some(watcher);
                    }
                }
                Ok(Err(err)) => {
                    warn!(%source_id, error = %err, "filesystem watch unavailable");
                    if let Some(entry) = guard.remove(&source_id) {
                        entry.shutdown();
                    }
                }
                Err(join_err) => {
                    warn!(%source_id, error = %join_err, "watcher initialization panicked");
                    if let Some(entry) = guard.remove(&source_id) {
                        entry.shutdown();
                    }
                }
            }
        });

        Ok(())
    }

    pub async fn unregister(&self, id: SourceId) {
        if let Some(watch) = self.sources.write().await.remove(&id) {
            watch.shutdown();
        }
    }

    pub async fn shutdown(&self) {
        let mut guard = self.sources.write().await;
        let watches: Vec<_> = guard.drain().map(|(_, watch)| watch).collect();
        drop(guard);
        for watch in watches {
            watch.shutdown();
        }
    }

    pub async fn watched_count(&self) -> usize {
        self.sources.read().await.len()
    }
}

struct SourceWatch {
    watcher: Option<RecommendedWatcher>,
    flush_task: JoinHandle<()>,
}

impl SourceWatch {
    fn shutdown(self) {
        self.flush_task.abort();
        // Dropping the watcher stops its notify stream.
    }
}

#[derive(Debug)]
enum WatchMessage {
    Event(Event),
    Error(String),
}

fn spawn_debounce_loop(
    source_id: SourceId,
    mut rx: mpsc::Receiver<WatchMessage>,
    commands: mpsc::Sender<ReconcilerCommand>,
    window: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut pending = false;
        loop {
            let msg = if pending {
                match timeout(window, rx.recv()).await {
                    Ok(msg) => msg,
                    Err(_) => {
                        pending = false;
                        if !flush(source_id, &commands).await {
                            break;
                        }
                        continue;
                    }
                }
            } else {
                rx.recv().await
            };

            let Some(msg) = msg else {
                if pending {
                    flush(source_id, &commands).await;
                }
                break;
            };

            match msg {
                WatchMessage::Event(event) => {
                    if is_mutation(&event.kind) {
                        pending = true;
                    }
                }
                WatchMessage::Error(error) => {
                    // Lost events cannot be reconstructed; rescan instead.
                    warn!(%source_id, %error, "filesystem watch error");
                    pending = true;
                }
            }
        }
    })
}

async fn flush(source_id: SourceId, commands: &mpsc::Sender<ReconcilerCommand>) -> bool {
    debug!(%source_id, "debounced filesystem change");
    commands
        .send(ReconcilerCommand::SourceChanged(source_id))
        .await
        .is_ok()
}

fn is_mutation(kind: &EventKind) -> bool {
    !matches!(kind, EventKind::Access(_))
}

fn init_watcher(
    root: PathBuf,
    tx: mpsc::Sender<WatchMessage>,
) -> Result<RecommendedWatcher> {
    let mut watcher = RecommendedWatcher::new(
        move |res: std::result::Result<Event, notify::Error>| {
            let msg = match res {
                Ok(event) => WatchMessage::Event(event),
                Err(err) => WatchMessage::Error(err.to_string()),
            };
            // A full channel already holds a pending change for this source.
            let _ = tx.try_send(msg);
        },
        NotifyConfig::default(),
    )
    .map_err(|err| {
        IndexError::Watch(format!(
            "failed to create watcher for {}: {}",
            root.display(),
            err
        ))
    })?;

    watcher
        .watch(&root, RecursiveMode::Recursive)
        .map_err(|err| IndexError::Watch(format!("failed to watch {}: {}", root.display(), err)))?;

    Ok(watcher)
}

//! Source reconciliation loop.
//!
//! One task owns every per-source [`SourceSlot`] and is the only place that
//! starts or cancels passes. It wakes on four inputs:
//!
//! * the poll interval, which diffs the source list and rescans idle sources,
//! * commands from a [`ReconcilerHandle`] or the filesystem watcher,
//! * pass reports from finished pass tasks,
//! * the shutdown token.
//!
//! A filesystem notification cancels and restarts a running pass. A tick
//! never does; it leaves the running pass to finish.

mod diff;
mod pass;
mod state;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tonehub_model::{Source, SourceId};
use tracing::{debug, error, info, warn};

use crate::catalog::{CatalogUpdater, OrphanSweeper};
use crate::config::IndexerConfig;
use crate::discovery::{Discoverer, FileSystem, RealFs};
use crate::error::{IndexError, Result};
use crate::events::{Generation, IndexObserver, TracingObserver};
#[cfg(feature = "fs-watch")]
use crate::fs_watch::SourceWatchService;
use crate::metadata::ExtractorRegistry;
use crate::repository::CatalogRepository;

pub use diff::{SourceDiff, diff_sources};
pub use pass::{PassOutcome, PassReport};

use pass::{PassContext, spawn_pass};
use state::{DrainingPasses, SourceSlot};

/// Input accepted by the reconciliation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcilerCommand {
    /// Something changed under this source's root.
    SourceChanged(SourceId),
    /// Run a reconciliation tick now.
    ReconcileNow,
}

const COMMAND_CHANNEL_CAPACITY: usize = 256;

/// Builder for the reconciliation loop.
pub struct SourceReconciler {
    repository: Arc<dyn CatalogRepository>,
    extractors: ExtractorRegistry,
    fs: Arc<dyn FileSystem>,
    observer: Arc<dyn IndexObserver>,
    config: IndexerConfig,
}

impl fmt::Debug for SourceReconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceReconciler")
            .field("extractors", &self.extractors)
            .field("observer", &self.observer)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SourceReconciler {
    pub fn new(
        repository: Arc<dyn CatalogRepository>,
        extractors: ExtractorRegistry,
        config: IndexerConfig,
    ) -> Self {
        Self {
            repository,
            extractors,
            fs: Arc::new(RealFs::new()),
            observer: Arc::new(TracingObserver),
            config,
        }
    }

    pub fn with_filesystem(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn IndexObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Validate the configuration and start the loop on the current runtime.
    pub fn spawn(self) -> Result<ReconcilerHandle> {
        self.config.validate()?;
        if self.extractors.is_empty() {
            return Err(IndexError::Config("no format extractors registered".into()));
        }

        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let ctx = Arc::new(PassContext {
            repository: Arc::clone(&self.repository),
            discoverer: Discoverer::new(Arc::clone(&self.fs)),
            updater: CatalogUpdater::new(
                Arc::clone(&self.repository),
                self.extractors,
                Arc::clone(&self.fs),
                Arc::clone(&self.observer),
            )
            .with_max_tag_bytes(self.config.max_tag_bytes),
            sweeper: OrphanSweeper::new(
                Arc::clone(&self.repository),
                Arc::clone(&self.observer),
                self.config.orphan_grace(),
            ),
            observer: self.observer,
            batch_size: self.config.batch_size,
            queue_capacity: self.config.queue_capacity,
        });

        #[cfg(feature = "fs-watch")]
        let watch = self
            .config
            .watch
            .enabled
            .then(|| SourceWatchService::new(self.config.watch.clone(), command_tx.clone()));

        let poll_interval = self.config.poll_interval();
        let reconciler = ReconcileLoop {
            repository: self.repository,
            ctx,
            slots: HashMap::new(),
            draining: DrainingPasses::default(),
            generation: Generation(0),
            poll_interval,
            // Rescans line up with ticks: a source becomes due on the tick
            // before its interval would be overshot.
            due_after: self.config.rescan_interval().saturating_sub(poll_interval),
            shutdown: shutdown.clone(),
            commands: command_rx,
            reports: report_rx,
            report_tx,
            #[cfg(feature = "fs-watch")]
            watch,
        };

        let task = tokio::spawn(reconciler.run());
        Ok(ReconcilerHandle {
            commands: command_tx,
            shutdown,
            task: Arc::new(Mutex::new(Some(task))),
        })
    }
}

/// Cloneable control surface of a running reconciler.
#[derive(Clone, Debug)]
pub struct ReconcilerHandle {
    commands: mpsc::Sender<ReconcilerCommand>,
    shutdown: CancellationToken,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ReconcilerHandle {
    /// Cancel and restart the source's pass if one is running, or start one
    /// if it is idle.
    pub async fn notify_source_changed(&self, id: SourceId) -> Result<()> {
        self.send(ReconcilerCommand::SourceChanged(id)).await
    }

    pub async fn reconcile_now(&self) -> Result<()> {
        self.send(ReconcilerCommand::ReconcileNow).await
    }

    /// Cancel every pass and wait until all of them and the loop have ended.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.lock().await.take() {
            if let Err(err) = task.await {
                warn!(error = %err, "reconciler task ended abnormally");
            }
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    async fn send(&self, command: ReconcilerCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| IndexError::Internal("reconciler is not running".into()))
    }
}

struct ReconcileLoop {
    repository: Arc<dyn CatalogRepository>,
    ctx: Arc<PassContext>,
    slots: HashMap<SourceId, SourceSlot>,
    draining: DrainingPasses,
    generation: Generation,
    poll_interval: Duration,
    due_after: Duration,
    shutdown: CancellationToken,
    commands: mpsc::Receiver<ReconcilerCommand>,
    reports: mpsc::UnboundedReceiver<PassReport>,
    report_tx: mpsc::UnboundedSender<PassReport>,
    #[cfg(feature = "fs-watch")]
    watch: Option<SourceWatchService>,
}

impl ReconcileLoop {
    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(poll_interval_ms = self.poll_interval.as_millis() as u64, "reconciler started");

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                Some(report) = self.reports.recv() => self.on_report(report),
                Some(command) = self.commands.recv() => self.on_command(command).await,
                _ = ticker.tick() => self.reconcile().await,
            }
        }

        self.stop().await;
        info!("reconciler stopped");
    }

    async fn on_command(&mut self, command: ReconcilerCommand) {
        match command {
            ReconcilerCommand::ReconcileNow => self.reconcile().await,
            ReconcilerCommand::SourceChanged(id) => {
                let Some(slot) = self.slots.get_mut(&id) else {
                    debug!(source_id = %id, "change for unknown source, reconciling");
                    self.reconcile().await;
                    return;
                };
                if !slot.source.enabled {
                    return;
                }
                if slot.is_running() {
                    info!(source_id = %id, "source changed mid-pass, restarting");
                    slot.cancel();
                    slot.pending_restart = true;
                } else {
                    self.start_pass(id);
                }
            }
        }
    }

    fn on_report(&mut self, report: PassReport) {
        let Some(slot) = self.slots.get_mut(&report.source_id) else {
            debug!(source_id = %report.source_id, generation = %report.generation, "report for removed source");
            self.draining.forget(report.source_id);
            return;
        };
        if slot.running_generation() != Some(report.generation) {
            debug!(source_id = %report.source_id, generation = %report.generation, "stale pass report");
            return;
        }

        if let Some(task) = slot.finish(Instant::now()) {
            self.draining.park(report.source_id, task);
        }
        if slot.pending_restart {
            self.start_pass(report.source_id);
        }
    }

    /// Diff the source list and start whatever is due.
    async fn reconcile(&mut self) {
        self.draining.prune();
        let sources = match self.repository.list_sources().await {
            Ok(sources) => sources,
            Err(err) => {
                error!(error = %err, "failed to list sources, keeping last-known list");
                return;
            }
        };

        let known: HashMap<SourceId, Source> = self
            .slots
            .iter()
            .map(|(id, slot)| (*id, slot.source.clone()))
            .collect();
        let diff = diff_sources(&known, &sources);
        if !diff.is_empty() {
            info!(
                added = diff.added.len(),
                changed = diff.changed.len(),
                removed = diff.removed.len(),
                "source list changed"
            );
        }

        for id in diff.removed {
            if let Some(slot) = self.slots.remove(&id) {
                if let Some(task) = slot.retire() {
                    self.draining.park(id, task);
                }
            }
            self.unwatch(id).await;
        }

        for source in diff.changed {
            let id = source.id;
            self.unwatch(id).await;
            if source.enabled {
                self.watch(&source).await;
            }
            let Some(slot) = self.slots.get_mut(&id) else {
                continue;
            };
            slot.source = source;
            if slot.is_running() {
                slot.cancel();
                slot.pending_restart = slot.source.enabled;
            } else if slot.source.enabled {
                self.start_pass(id);
            }
        }

        for source in diff.added {
            let id = source.id;
            if source.enabled {
                self.watch(&source).await;
            }
            self.slots.insert(id, SourceSlot::new(source));
            self.start_pass(id);
        }

        let now = Instant::now();
        let due: Vec<SourceId> = diff
            .unchanged
            .into_iter()
            .filter(|id| {
                self.slots
                    .get(id)
                    .is_some_and(|slot| slot.source.enabled && slot.is_due(now, self.due_after))
            })
            .collect();
        for id in due {
            self.start_pass(id);
        }
    }

    fn start_pass(&mut self, id: SourceId) {
        let Some(slot) = self.slots.get_mut(&id) else {
            return;
        };
        if !slot.source.enabled || slot.is_running() {
            return;
        }

        self.generation = self.generation.next();
        let generation = self.generation;
        let token = self.shutdown.child_token();
        let previous = self.draining.take(id);
        let task = spawn_pass(
            Arc::clone(&self.ctx),
            slot.source.clone(),
            generation,
            token.clone(),
            previous,
            self.report_tx.clone(),
        );
        debug!(source_id = %id, %generation, "pass scheduled");

        slot.phase = state::SlotPhase::Running {
            generation,
            token,
            task,
        };
        slot.pending_restart = false;
    }

    async fn stop(&mut self) {
        let mut tasks: Vec<JoinHandle<()>> = self.draining.drain().collect();
        for (_, slot) in self.slots.drain() {
            if let Some(task) = slot.retire() {
                tasks.push(task);
            }
        }
        for result in join_all(tasks).await {
            if let Err(err) = result {
                warn!(error = %err, "pass task ended abnormally during shutdown");
            }
        }

        #[cfg(feature = "fs-watch")]
        if let Some(watch) = &self.watch {
            watch.shutdown().await;
        }
    }

    #[cfg(feature = "fs-watch")]
    async fn watch(&self, source: &Source) {
        if let Some(watch) = &self.watch {
            if let Err(err) = watch.register(source).await {
                warn!(source_id = %source.id, error = %err, "failed to watch source");
            }
        }
    }

    #[cfg(not(feature = "fs-watch"))]
    async fn watch(&self, _source: &Source) {}

    #[cfg(feature = "fs-watch")]
    async fn unwatch(&self, id: SourceId) {
        if let Some(watch) = &self.watch {
            watch.unregister(id).await;
        }
    }

    #[cfg(not(feature = "fs-watch"))]
    async fn unwatch(&self, _id: SourceId) {}
}

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonehub_model::{Source, SourceId};
use tracing::{debug, warn};

use crate::catalog::{CatalogUpdater, OrphanSweeper, SweepStats, UpdateStats};
use crate::discovery::{BatchQueue, Discoverer, DiscoveryStatus};
use crate::error::IndexError;
use crate::events::{Generation, IndexEvent, IndexObserver};
use crate::repository::CatalogRepository;

/// How a pass ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PassOutcome {
    Completed {
        update: UpdateStats,
        sweep: SweepStats,
    },
    Cancelled {
        update: UpdateStats,
    },
    Failed {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PassReport {
    pub source_id: SourceId,
    pub generation: Generation,
    pub outcome: PassOutcome,
}

/// Shared collaborators of every pass.
pub(crate) struct PassContext {
    pub repository: Arc<dyn CatalogRepository>,
    pub discoverer: Discoverer,
    pub updater: CatalogUpdater,
    pub sweeper: OrphanSweeper,
    pub observer: Arc<dyn IndexObserver>,
    pub batch_size: usize,
    pub queue_capacity: usize,
}

impl fmt::Debug for PassContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PassContext")
            .field("updater", &self.updater)
            .field("sweeper", &self.sweeper)
            .field("batch_size", &self.batch_size)
            .field("queue_capacity", &self.queue_capacity)
            .finish_non_exhaustive()
    }
}

/// Spawn one pass. It waits for `previous` before touching anything so two
/// passes of a source never overlap, and always sends exactly one report.
pub(crate) fn spawn_pass(
    ctx: Arc<PassContext>,
    source: Source,
    generation: Generation,
    token: CancellationToken,
    previous: Option<JoinHandle<()>>,
    reports: mpsc::UnboundedSender<PassReport>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Some(previous) = previous {
            if let Err(err) = previous.await {
                warn!(source_id = %source.id, error = %err, "previous pass ended abnormally");
            }
        }

        let outcome = run_pass(&ctx, &source, generation, &token).await;
        let event = match &outcome {
            PassOutcome::Completed { update, sweep } => IndexEvent::PassCompleted {
                source_id: source.id,
                generation,
                update: *update,
                sweep: *sweep,
            },
            PassOutcome::Cancelled { update } => IndexEvent::PassCancelled {
                source_id: source.id,
                generation,
                update: *update,
            },
            PassOutcome::Failed { reason } => IndexEvent::PassFailed {
                source_id: source.id,
                generation,
                reason: reason.clone(),
            },
        };
        ctx.observer.on_event(&event);

        let report = PassReport {
            source_id: source.id,
            generation,
            outcome,
        };
        if reports.send(report).is_err() {
            debug!(source_id = %source.id, %generation, "reconciler gone, dropping pass report");
        }
    })
}

async fn run_pass(
    ctx: &PassContext,
    source: &Source,
    generation: Generation,
    token: &CancellationToken,
) -> PassOutcome {
    let mut update = UpdateStats::default();
    let mut unrefreshed = HashSet::new();
    if token.is_cancelled() {
        return PassOutcome::Cancelled { update };
    }
    if let Err(err) = source.validate() {
        return PassOutcome::Failed {
            reason: err.to_string(),
        };
    }

    ctx.observer.on_event(&IndexEvent::PassStarted {
        source_id: source.id,
        generation,
    });
    let pass_start = Utc::now();

    // The walk stops when the pass is cancelled or the consumer gives up.
    let walk_token = token.child_token();
    let (sender, mut receiver) = BatchQueue::bounded(ctx.queue_capacity, ctx.batch_size);
    let extractors = ctx.updater.extractors().clone();
    let filter = move |path: &std::path::Path| extractors.supports(path);

    let walk = ctx
        .discoverer
        .walk(&source.location, &filter, sender, &walk_token);

    let consume = async {
        let mut failure: Option<IndexError> = None;
        loop {
            let batch = receiver.next_batch().await;
            if batch.is_empty() {
                break;
            }
            if let Err(err) = ctx
                .updater
                .update_batch(source, batch, token, &mut update, &mut unrefreshed)
                .await
            {
                if !err.is_cancellation() {
                    failure = Some(err);
                }
                walk_token.cancel();
                receiver.close();
                break;
            }
        }
        failure
    };

    let (discovery, failure) = tokio::join!(walk, consume);

    if token.is_cancelled() {
        return PassOutcome::Cancelled { update };
    }
    if let Some(err) = failure {
        return PassOutcome::Failed {
            reason: format!("catalog read failed: {err}"),
        };
    }
    match discovery.status {
        DiscoveryStatus::Completed => {}
        DiscoveryStatus::RootUnavailable => {
            return PassOutcome::Failed {
                reason: format!("source root {} is unavailable", source.location.display()),
            };
        }
        DiscoveryStatus::Cancelled => return PassOutcome::Cancelled { update },
    }

    // Sweeping disables entries, so only do it for the source as scanned.
    match ctx.repository.get_source(source.id).await {
        Ok(Some(current)) if current.revision() == source.revision() => {}
        Ok(_) => {
            debug!(source_id = %source.id, %generation, "source edited during the pass, not sweeping");
            return PassOutcome::Cancelled { update };
        }
        Err(err) => {
            return PassOutcome::Failed {
                reason: format!("could not revalidate source: {err}"),
            };
        }
    }

    debug!(
        source_id = %source.id,
        %generation,
        files = discovery.files_posted,
        dirs_skipped = discovery.dirs_skipped,
        "discovery finished, sweeping orphans"
    );
    match ctx
        .sweeper
        .sweep(source.id, pass_start, &unrefreshed, token)
        .await {
        Ok(sweep) => PassOutcome::Completed { update, sweep },
        Err(err) if err.is_cancellation() => PassOutcome::Cancelled { update },
        Err(err) => PassOutcome::Failed {
            reason: format!("orphan sweep failed: {err}"),
        },
    }
}

//! Pass and per-file outcome events.
//!
//! Nothing in the pipeline reports errors to a caller; everything observable
//! flows through an [`IndexObserver`].

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tonehub_model::{EntryId, FormatCategory, SourceId};
use tracing::{debug, info, warn};

use crate::catalog::{SweepStats, UpdateStats};

/// Monotonic per-reconciler pass counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Generation(pub u64);

impl Generation {
    pub fn next(self) -> Self {
        Generation(self.0 + 1)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a file was resolved against the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexOutcome {
    Created,
    Updated,
    Moved,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum IndexEvent {
    PassStarted {
        source_id: SourceId,
        generation: Generation,
    },
    PassCompleted {
        source_id: SourceId,
        generation: Generation,
        update: UpdateStats,
        sweep: SweepStats,
    },
    PassCancelled {
        source_id: SourceId,
        generation: Generation,
        update: UpdateStats,
    },
    PassFailed {
        source_id: SourceId,
        generation: Generation,
        reason: String,
    },
    FileIndexed {
        source_id: SourceId,
        entry_id: EntryId,
        location: String,
        outcome: IndexOutcome,
    },
    FileSkipped {
        source_id: SourceId,
        path: PathBuf,
        reason: String,
    },
    FileFiltered {
        source_id: SourceId,
        path: PathBuf,
        format: FormatCategory,
    },
    EntryDisabled {
        source_id: SourceId,
        entry_id: EntryId,
        location: String,
    },
    EntryDeleted {
        source_id: SourceId,
        entry_id: EntryId,
        location: String,
    },
    TagsCollected {
        count: u64,
    },
}

/// Receives every [`IndexEvent`]. Called inline from pass tasks, so
/// implementations must be cheap and must not block.
pub trait IndexObserver: Send + Sync + fmt::Debug {
    fn on_event(&self, event: &IndexEvent);
}

/// Logs events with structured `tracing` fields.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl IndexObserver for TracingObserver {
    fn on_event(&self, event: &IndexEvent) {
        match event {
            IndexEvent::PassStarted {
                source_id,
                generation,
            } => info!(%source_id, %generation, "pass started"),
            IndexEvent::PassCompleted {
                source_id,
                generation,
                update,
                sweep,
            } => info!(
                %source_id,
                %generation,
                created = update.created,
                updated = update.updated,
                moved = update.moved,
                unchanged = update.unchanged,
                skipped = update.skipped,
                failed = update.failed,
                filtered = update.filtered,
                disabled = sweep.disabled,
                deleted = sweep.deleted,
                "pass completed"
            ),
            IndexEvent::PassCancelled {
                source_id,
                generation,
                update,
            } => info!(
                %source_id,
                %generation,
                processed = update.processed(),
                "pass cancelled"
            ),
            IndexEvent::PassFailed {
                source_id,
                generation,
                reason,
            } => warn!(%source_id, %generation, %reason, "pass failed"),
            IndexEvent::FileIndexed {
                source_id,
                location,
                outcome,
                ..
            } => debug!(%source_id, %location, ?outcome, "file indexed"),
            IndexEvent::FileSkipped {
                source_id,
                path,
                reason,
            } => warn!(%source_id, path = %path.display(), %reason, "file skipped"),
            IndexEvent::FileFiltered {
                source_id,
                path,
                format,
            } => debug!(%source_id, path = %path.display(), %format, "file filtered"),
            IndexEvent::EntryDisabled {
                source_id,
                location,
                ..
            } => debug!(%source_id, %location, "entry disabled"),
            IndexEvent::EntryDeleted {
                source_id,
                location,
                ..
            } => debug!(%source_id, %location, "entry deleted"),
            IndexEvent::TagsCollected { count } => {
                debug!(count, "orphan tags collected")
            }
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopIndexObserver;

impl IndexObserver for NoopIndexObserver {
    fn on_event(&self, _event: &IndexEvent) {}
}
